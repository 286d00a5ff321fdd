//! Numeric building blocks: vectorized primitives, BLAS helpers and
//! data-parallel loops.

pub mod gemm;
pub mod parallel;
pub mod vector;

pub use vector::VectorOps;
