//! Vectorized primitives over contiguous `f32` buffers.
//!
//! [`VectorOps`] is a small capability object: it probes the CPU once at
//! construction and afterwards dispatches `add`/`mul`/`dot`/`max` to the
//! fastest available backend. The drivers construct one and hand it to layers
//! through the per-call context, so there is no process-global state and tests
//! can force the portable backend explicitly.
//!
//! Buffers may have any alignment; the wide paths use unaligned loads.

/// Backend selected for the vectorized primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Portable,
    #[cfg(target_arch = "x86_64")]
    Avx,
}

/// Hardware-selected implementations of element-wise add/mul, dot product and
/// scalar max over `f32` slices.
#[derive(Clone, Copy)]
pub struct VectorOps {
    backend: Backend,
}

impl VectorOps {
    /// Probe the CPU and pick the fastest backend.
    pub fn auto() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx") {
                return Self {
                    backend: Backend::Avx,
                };
            }
        }
        Self {
            backend: Backend::Portable,
        }
    }

    /// Force the portable scalar backend.
    pub fn portable() -> Self {
        Self {
            backend: Backend::Portable,
        }
    }

    /// Name of the active backend, for diagnostics.
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Portable => "portable",
            #[cfg(target_arch = "x86_64")]
            Backend::Avx => "avx",
        }
    }

    /// `dst[i] += src[i]`
    pub fn add(&self, src: &[f32], dst: &mut [f32]) {
        assert_eq!(src.len(), dst.len(), "add: length mismatch");
        match self.backend {
            Backend::Portable => portable::add(src, dst),
            #[cfg(target_arch = "x86_64")]
            // Safety: the Avx backend is only selected after detection.
            Backend::Avx => unsafe { avx::add(src, dst) },
        }
    }

    /// `dst[i] *= src[i]`
    pub fn mul(&self, src: &[f32], dst: &mut [f32]) {
        assert_eq!(src.len(), dst.len(), "mul: length mismatch");
        match self.backend {
            Backend::Portable => portable::mul(src, dst),
            #[cfg(target_arch = "x86_64")]
            Backend::Avx => unsafe { avx::mul(src, dst) },
        }
    }

    /// Dot product of `a` and `b`.
    pub fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "dot: length mismatch");
        match self.backend {
            Backend::Portable => portable::dot(a, b),
            #[cfg(target_arch = "x86_64")]
            Backend::Avx => unsafe { avx::dot(a, b) },
        }
    }

    /// `dst[i] = max(src[i], alpha)`
    pub fn max(&self, src: &[f32], alpha: f32, dst: &mut [f32]) {
        assert_eq!(src.len(), dst.len(), "max: length mismatch");
        match self.backend {
            Backend::Portable => portable::max(src, alpha, dst),
            #[cfg(target_arch = "x86_64")]
            Backend::Avx => unsafe { avx::max(src, alpha, dst) },
        }
    }
}

impl Default for VectorOps {
    fn default() -> Self {
        Self::auto()
    }
}

mod portable {
    pub fn add(src: &[f32], dst: &mut [f32]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d += *s;
        }
    }

    pub fn mul(src: &[f32], dst: &mut [f32]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d *= *s;
        }
    }

    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    pub fn max(src: &[f32], alpha: f32, dst: &mut [f32]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s.max(alpha);
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod avx {
    use std::arch::x86_64::*;

    const LANES: usize = 8;

    #[target_feature(enable = "avx")]
    pub unsafe fn add(src: &[f32], dst: &mut [f32]) {
        let n = src.len();
        let mut i = 0;
        while i + LANES <= n {
            let s = _mm256_loadu_ps(src.as_ptr().add(i));
            let d = _mm256_loadu_ps(dst.as_ptr().add(i));
            _mm256_storeu_ps(dst.as_mut_ptr().add(i), _mm256_add_ps(d, s));
            i += LANES;
        }
        while i < n {
            dst[i] += src[i];
            i += 1;
        }
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn mul(src: &[f32], dst: &mut [f32]) {
        let n = src.len();
        let mut i = 0;
        while i + LANES <= n {
            let s = _mm256_loadu_ps(src.as_ptr().add(i));
            let d = _mm256_loadu_ps(dst.as_ptr().add(i));
            _mm256_storeu_ps(dst.as_mut_ptr().add(i), _mm256_mul_ps(d, s));
            i += LANES;
        }
        while i < n {
            dst[i] *= src[i];
            i += 1;
        }
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let mut acc = _mm256_setzero_ps();
        let mut i = 0;
        while i + LANES <= n {
            let x = _mm256_loadu_ps(a.as_ptr().add(i));
            let y = _mm256_loadu_ps(b.as_ptr().add(i));
            acc = _mm256_add_ps(acc, _mm256_mul_ps(x, y));
            i += LANES;
        }
        let mut lanes = [0.0f32; LANES];
        _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
        let mut sum: f32 = lanes.iter().sum();
        while i < n {
            sum += a[i] * b[i];
            i += 1;
        }
        sum
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn max(src: &[f32], alpha: f32, dst: &mut [f32]) {
        let n = src.len();
        let floor = _mm256_set1_ps(alpha);
        let mut i = 0;
        while i + LANES <= n {
            let s = _mm256_loadu_ps(src.as_ptr().add(i));
            _mm256_storeu_ps(dst.as_mut_ptr().add(i), _mm256_max_ps(s, floor));
            i += LANES;
        }
        while i < n {
            dst[i] = src[i].max(alpha);
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(n: usize, start: f32) -> Vec<f32> {
        (0..n).map(|i| start + i as f32 * 0.37).collect()
    }

    #[test]
    fn add_accumulates_elementwise() {
        let ops = VectorOps::auto();
        let src = vec![1.0, 2.0, 3.0];
        let mut dst = vec![10.0, 20.0, 30.0];
        ops.add(&src, &mut dst);
        assert_eq!(dst, vec![11.0, 22.0, 33.0]);
    }

    #[test]
    fn mul_scales_elementwise() {
        let ops = VectorOps::auto();
        let src = vec![2.0, 0.5, -1.0];
        let mut dst = vec![3.0, 8.0, 7.0];
        ops.mul(&src, &mut dst);
        assert_eq!(dst, vec![6.0, 4.0, -7.0]);
    }

    #[test]
    fn dot_matches_manual_sum() {
        let ops = VectorOps::auto();
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];
        assert_relative_eq!(ops.dot(&a, &b), 70.0, epsilon = 1e-5);
    }

    #[test]
    fn max_clamps_below_alpha() {
        let ops = VectorOps::auto();
        let src = vec![-1.0, 0.5, -0.2, 2.0];
        let mut dst = vec![0.0; 4];
        ops.max(&src, 0.0, &mut dst);
        assert_eq!(dst, vec![0.0, 0.5, 0.0, 2.0]);
    }

    #[test]
    fn empty_slices_are_noops() {
        let ops = VectorOps::auto();
        let mut dst: Vec<f32> = vec![];
        ops.add(&[], &mut dst);
        ops.mul(&[], &mut dst);
        ops.max(&[], 0.0, &mut dst);
        assert_eq!(ops.dot(&[], &[]), 0.0);
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn add_rejects_mismatched_lengths() {
        let ops = VectorOps::auto();
        let mut dst = vec![0.0; 2];
        ops.add(&[1.0, 2.0, 3.0], &mut dst);
    }

    // Lengths past the 8-lane boundary plus a remainder exercise both the wide
    // path and the scalar tail on every backend.
    #[test]
    fn auto_agrees_with_portable_on_odd_lengths() {
        let auto = VectorOps::auto();
        let portable = VectorOps::portable();

        for n in [1, 7, 8, 9, 16, 23, 64, 100] {
            let a = ramp(n, -3.0);
            let b = ramp(n, 1.5);

            let mut da = b.clone();
            let mut dp = b.clone();
            auto.add(&a, &mut da);
            portable.add(&a, &mut dp);
            assert_eq!(da, dp, "add mismatch at n={}", n);

            let mut ma = b.clone();
            let mut mp = b.clone();
            auto.mul(&a, &mut ma);
            portable.mul(&a, &mut mp);
            assert_eq!(ma, mp, "mul mismatch at n={}", n);

            let mut xa = vec![0.0; n];
            let mut xp = vec![0.0; n];
            auto.max(&a, 0.25, &mut xa);
            portable.max(&a, 0.25, &mut xp);
            assert_eq!(xa, xp, "max mismatch at n={}", n);

            assert_relative_eq!(
                auto.dot(&a, &b),
                portable.dot(&a, &b),
                epsilon = 1e-3,
                max_relative = 1e-5
            );
        }
    }
}
