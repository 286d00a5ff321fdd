//! Data-parallel loop helpers.
//!
//! Layers process batches as flat buffers cut into equal chunks (one per
//! sample, kernel or channel). These helpers run a body over those chunks,
//! either serially or on the rayon pool, guaranteeing each invocation owns a
//! disjoint mutable slice. The `parallel` flag lets callers switch the pool
//! off where the work is too small to pay for it.

use rayon::prelude::*;

/// Run `body(index, chunk)` over consecutive `chunk_len`-sized chunks of
/// `data`.
pub fn for_each_chunk<T, F>(data: &mut [T], chunk_len: usize, parallel: bool, body: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    assert!(chunk_len > 0, "chunk_len must be positive");
    debug_assert_eq!(data.len() % chunk_len, 0);

    if parallel {
        data.par_chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(i, chunk)| body(i, chunk));
    } else {
        for (i, chunk) in data.chunks_mut(chunk_len).enumerate() {
            body(i, chunk);
        }
    }
}

/// Run `body(index, a_chunk, b_chunk)` over two buffers cut into the same
/// number of chunks (`a_len` and `b_len` elements respectively).
///
/// Used where a unit of work writes two destinations at once, e.g. a pooling
/// output together with its winner-index record, or a kernel's weight
/// gradients together with its bias gradient.
pub fn for_each_chunk_pair<T, U, F>(
    a: &mut [T],
    a_len: usize,
    b: &mut [U],
    b_len: usize,
    parallel: bool,
    body: F,
) where
    T: Send,
    U: Send,
    F: Fn(usize, &mut [T], &mut [U]) + Sync + Send,
{
    assert!(a_len > 0 && b_len > 0, "chunk lengths must be positive");
    debug_assert_eq!(a.len() / a_len, b.len() / b_len);

    if parallel {
        a.par_chunks_mut(a_len)
            .zip(b.par_chunks_mut(b_len))
            .enumerate()
            .for_each(|(i, (ca, cb))| body(i, ca, cb));
    } else {
        for (i, (ca, cb)) in a.chunks_mut(a_len).zip(b.chunks_mut(b_len)).enumerate() {
            body(i, ca, cb);
        }
    }
}
