//! Round-robin job distribution.
//!
//! Job `i` of the input goes to slice `i mod W`. Each slice keeps the
//! relative order of its jobs, so a worker processes its rows in sheet order.

use std::num::NonZeroUsize;

/// Split `jobs` into exactly `workers` ordered slices, round-robin.
///
/// Slices may be empty when there are fewer jobs than workers.
pub fn distribute<T>(jobs: Vec<T>, workers: NonZeroUsize) -> Vec<Vec<T>> {
    let count = workers.get();
    let per_slice = jobs.len().div_ceil(count);
    let mut slices: Vec<Vec<T>> = (0..count).map(|_| Vec::with_capacity(per_slice)).collect();

    for (i, job) in jobs.into_iter().enumerate() {
        slices[i % count].push(job);
    }

    slices
}
