//! Seedable xorshift random number generator.
//!
//! Every stochastic choice in the engine (weight initialization, dropout
//! masks, epoch shuffling) flows through one explicitly seeded generator so
//! training runs are reproducible without pulling in an external crate.

use std::time::{SystemTime, UNIX_EPOCH};

// Xorshift has an all-zero fixed point, so a zero seed is remapped.
const DEFAULT_SEED: u64 = 0x9e3779b97f4a7c15;

/// Xorshift64 generator with explicit seeding.
#[derive(Clone, Debug)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a generator from an explicit seed (zero falls back to a fixed
    /// constant).
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { DEFAULT_SEED } else { seed },
        }
    }

    /// Create a generator seeded from the wall clock.
    pub fn from_time() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self::new(nanos)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform sample in `[0, 1)` with 24 bits of precision.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 * (1.0 / (1u64 << 24) as f32)
    }

    /// Uniform sample in `[low, high)`.
    pub fn uniform(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Integer sample in `[0, upper)`; returns 0 when `upper` is 0.
    pub fn index(&mut self, upper: usize) -> usize {
        if upper == 0 {
            0
        } else {
            (self.next_u64() % upper as u64) as usize
        }
    }

    /// Fill `data` with uniform samples from `[-limit, limit)`.
    pub fn fill_symmetric(&mut self, data: &mut [f32], limit: f32) {
        for v in data.iter_mut() {
            *v = self.uniform(-limit, limit);
        }
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle(&mut self, data: &mut [usize]) {
        for i in (1..data.len()).rev() {
            let j = self.index(i + 1);
            data.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = SimpleRng::new(42);
        let mut b = SimpleRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn zero_seed_is_remapped() {
        let mut a = SimpleRng::new(0);
        let mut b = SimpleRng::new(DEFAULT_SEED);
        assert_eq!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn next_f32_stays_in_unit_interval() {
        let mut rng = SimpleRng::new(12345);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn uniform_respects_bounds() {
        let mut rng = SimpleRng::new(67890);
        for _ in 0..1000 {
            let v = rng.uniform(-2.5, 1.5);
            assert!(v >= -2.5 && v < 1.5);
        }
    }

    #[test]
    fn index_stays_below_upper() {
        let mut rng = SimpleRng::new(11111);
        for _ in 0..1000 {
            assert!(rng.index(10) < 10);
        }
        assert_eq!(rng.index(0), 0);
    }

    #[test]
    fn fill_symmetric_respects_limit() {
        let mut rng = SimpleRng::new(7);
        let mut data = vec![0.0f32; 256];
        rng.fill_symmetric(&mut data, 0.25);
        assert!(data.iter().all(|v| v.abs() <= 0.25));
        // A 256-element fill should not come out all zeros.
        assert!(data.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = SimpleRng::new(33333);
        let mut data: Vec<usize> = (0..10).collect();
        let original = data.clone();
        rng.shuffle(&mut data);

        let mut sorted = data.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, original);
        assert_ne!(data, original);
    }

    #[test]
    fn shuffle_handles_degenerate_sizes() {
        let mut rng = SimpleRng::new(44444);
        let mut empty: Vec<usize> = vec![];
        rng.shuffle(&mut empty);
        assert!(empty.is_empty());

        let mut single = vec![42];
        rng.shuffle(&mut single);
        assert_eq!(single, vec![42]);
    }
}
