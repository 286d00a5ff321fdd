//! Row-major BLAS helpers backing the fully-connected fast path.
//!
//! The fully-connected layer runs its three batched products (forward,
//! previous-delta, weight-gradient accumulation) through `sgemm`; everything
//! else in the crate uses the vectorized primitives in [`super::vector`].

use cblas::{sgemm, Layout, Transpose};

/// `C = alpha * op(A) * op(B) + beta * C`, all matrices row-major.
///
/// `m`, `n`, `k` are the dimensions after transposition: `op(A)` is `m x k`,
/// `op(B)` is `k x n`, `C` is `m x n`. Leading dimensions are those of the
/// stored (untransposed) matrices.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    transpose_a: bool,
    b: &[f32],
    ldb: usize,
    transpose_b: bool,
    c: &mut [f32],
    ldc: usize,
    alpha: f32,
    beta: f32,
) {
    debug_assert!(c.len() >= m * ldc.max(1) - ldc.saturating_sub(n));

    let trans_a = if transpose_a {
        Transpose::Ordinary
    } else {
        Transpose::None
    };
    let trans_b = if transpose_b {
        Transpose::Ordinary
    } else {
        Transpose::None
    };

    unsafe {
        sgemm(
            Layout::RowMajor,
            trans_a,
            trans_b,
            m as i32,
            n as i32,
            k as i32,
            alpha,
            a,
            lda as i32,
            b,
            ldb as i32,
            beta,
            c,
            ldc as i32,
        );
    }
}

/// Add `bias` to every row of a `rows x cols` row-major matrix.
pub fn add_bias(data: &mut [f32], rows: usize, cols: usize, bias: &[f32]) {
    debug_assert_eq!(bias.len(), cols);
    for row in data.chunks_exact_mut(cols).take(rows) {
        for (value, b) in row.iter_mut().zip(bias) {
            *value += *b;
        }
    }
}

/// Accumulate the column sums of a `rows x cols` row-major matrix into `out`.
///
/// `out` is added to, not overwritten, so repeated calls sum contributions the
/// same way the gradient accumulators do.
pub fn accumulate_rows(data: &[f32], rows: usize, cols: usize, out: &mut [f32]) {
    debug_assert_eq!(out.len(), cols);
    for row in data.chunks_exact(cols).take(rows) {
        for (value, sum) in row.iter().zip(out.iter_mut()) {
            *sum += *value;
        }
    }
}
