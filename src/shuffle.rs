//! Uniform random permutations computed by several threads without locks.
//!
//! The array is cut into one contiguous block per worker. Every worker shuffles its
//! own block, then blocks are merged pairwise along a binary tree with a randomized
//! riffle until worker `0` owns the whole, uniformly shuffled, array.
//!
//! Workers coordinate through one status slot each, holding the amount of tree levels
//! the worker has finished. A worker waiting on its sibling spins on that slot: the
//! wait is short and bounded since the sibling never waits on anything but its own
//! subtree, and every worker always publishes its level before it moves on or leaves.

use std::{
    hint,
    ops::Range,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Arrays shorter than this are shuffled by a single thread.
pub const DEFAULT_MIN_PARALLEL_LEN: usize = 1024;

/// Shuffles `data` in place with the Fisher–Yates algorithm.
pub fn fisher_yates<T, R: Rng + ?Sized>(data: &mut [T], rng: &mut R) {
    for i in (1..data.len()).rev() {
        let j = rng.random_range(0..=i);
        data.swap(i, j);
    }
}

/// Merges the two uniformly shuffled halves `data[..mid]` and `data[mid..]` into a
/// uniform shuffle of the whole slice.
///
/// A fair coin decides on every step whether the next slot keeps the left element in
/// place or takes the next element of the right half. Once one side runs out, every
/// remaining element is swapped with a uniformly drawn earlier position, so running
/// out early doesn't bias the result.
///
/// # Panics
/// If `mid` is greater than `data.len()`.
pub fn riffle_merge<T, R: Rng + ?Sized>(data: &mut [T], mid: usize, rng: &mut R) {
    assert!(mid <= data.len(), "riffle midpoint {mid} out of bounds");

    let end = data.len();
    let (mut u, mut v) = (0, mid);

    loop {
        if rng.random_bool(0.5) {
            if v == end {
                break;
            }
            data.swap(u, v);
            v += 1;
        } else if u == v {
            break;
        }
        u += 1;
    }

    while u < end {
        let i = rng.random_range(0..=u);
        data.swap(i, u);
        u += 1;
    }
}

/// A configurable parallel shuffle.
#[derive(Debug, Clone, Copy)]
pub struct ParallelShuffle {
    threads: usize,
    min_parallel_len: usize,
    seed: u64,
}

impl ParallelShuffle {
    /// Creates a new `ParallelShuffle`.
    ///
    /// # Arguments
    /// * `threads` - The amount of workers, zero is treated as one.
    /// * `seed` - The seed every worker derives its own random generator from.
    ///
    /// # Returns
    /// A new `ParallelShuffle` instance using `DEFAULT_MIN_PARALLEL_LEN`.
    pub fn new(threads: usize, seed: u64) -> Self {
        Self {
            threads: threads.max(1),
            min_parallel_len: DEFAULT_MIN_PARALLEL_LEN,
            seed,
        }
    }

    /// Overrides the length under which the shuffle runs on a single thread.
    pub fn min_parallel_len(mut self, len: usize) -> Self {
        self.min_parallel_len = len;
        self
    }

    /// Shuffles `data` in place.
    ///
    /// The result only depends on the seed, the amount of threads and the input, never
    /// on the interleaving of the workers.
    pub fn run<T: Send>(&self, data: &mut [T]) {
        let threads = self.threads.min(data.len().max(1));

        if threads == 1 || data.len() < self.min_parallel_len {
            let mut rng = worker_rng(self.seed, 0);
            fisher_yates(data, &mut rng);
            return;
        }

        debug!(threads = threads, len = data.len(); "parallel shuffle");

        let len = data.len();
        let shared = SharedSlice::new(data);
        let status: Vec<AtomicUsize> = (0..threads).map(|_| AtomicUsize::new(0)).collect();

        thread::scope(|s| {
            for worker in 0..threads {
                let shared = &shared;
                let status = &status;
                let seed = self.seed;

                s.spawn(move || shuffle_task(shared, len, worker, threads, status, seed));
            }
        });
    }
}

/// Shuffles `data` in place using `threads` workers seeded from `seed`.
pub fn parallel_shuffle<T: Send>(data: &mut [T], threads: usize, seed: u64) {
    ParallelShuffle::new(threads, seed).run(data);
}

/// Spreads the seeds of the workers so that runs with nearby seeds share no stream.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

fn worker_rng(seed: u64, worker: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(SEED_STRIDE.wrapping_mul(worker as u64)))
}

/// The range of the `block`-th block out of `threads`, the last one absorbs the remainder.
fn block_range(len: usize, block: usize, threads: usize) -> Range<usize> {
    let size = len / threads;
    let start = block * size;
    let end = if block + 1 == threads { len } else { start + size };
    start..end
}

/// The body of a single shuffle worker.
///
/// `status[w]` holds `l + 1` once worker `w` finished tree level `l`, i.e. once its
/// range covers the blocks `w..w + 2^l`.
fn shuffle_task<T>(
    shared: &SharedSlice<T>,
    len: usize,
    worker: usize,
    threads: usize,
    status: &[AtomicUsize],
    seed: u64,
) {
    let mut rng = worker_rng(seed, worker);
    let start = block_range(len, worker, threads).start;
    let mut end = block_range(len, worker, threads).end;

    // SAFETY: Blocks are disjoint and this worker is the only one touching its own.
    let block = unsafe { shared.range_mut(start..end) };
    fisher_yates(block, &mut rng);
    status[worker].store(1, Ordering::Release);

    let mut level = 1;
    while (1 << (level - 1)) < threads {
        let half = 1 << (level - 1);
        if worker & half != 0 {
            // Right child, our parent absorbs our range from here on.
            return;
        }

        let sibling = worker + half;
        if sibling < threads {
            while status[sibling].load(Ordering::Acquire) < level {
                hint::spin_loop();
            }

            let last = (sibling + half).min(threads) - 1;
            let mid = end;
            end = block_range(len, last, threads).end;

            // SAFETY: The sibling published it finished this level's prerequisites and
            //         never touches its range again, the union `start..end` is ours.
            let merged = unsafe { shared.range_mut(start..end) };
            riffle_merge(merged, mid - start, &mut rng);
        }

        status[worker].store(level + 1, Ordering::Release);
        level += 1;
    }
}

/// A slice handed to several threads that carve disjoint mutable ranges out of it.
struct SharedSlice<T> {
    ptr: *mut T,
    len: usize,
}

// SAFETY: Access to the elements goes through `range_mut`, whose callers guarantee
//         exclusive ownership of the ranges they take.
unsafe impl<T: Send> Send for SharedSlice<T> {}
unsafe impl<T: Send> Sync for SharedSlice<T> {}

impl<T> SharedSlice<T> {
    fn new(data: &mut [T]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
        }
    }

    /// Returns the elements in `range`.
    ///
    /// # Safety
    /// No other live reference may overlap `range` while the returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn range_mut(&self, range: Range<usize>) -> &mut [T] {
        assert!(range.start <= range.end && range.end <= self.len);

        // SAFETY: The range is in bounds and the caller guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(range.start), range.len()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut data: Vec<u32>) -> Vec<u32> {
        data.sort_unstable();
        data
    }

    #[test]
    fn fisher_yates_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut data: Vec<u32> = (0..100).collect();
        fisher_yates(&mut data, &mut rng);
        assert_eq!(sorted(data), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn riffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(5);
        for mid in [0, 1, 7, 13, 20] {
            let mut data: Vec<u32> = (0..20).collect();
            riffle_merge(&mut data, mid, &mut rng);
            assert_eq!(sorted(data), (0..20).collect::<Vec<_>>());
        }
    }

    #[test]
    fn block_ranges_cover_the_array() {
        let ranges: Vec<_> = (0..3).map(|b| block_range(10, b, 3)).collect();
        assert_eq!(ranges, [0..3, 3..6, 6..10]);
    }

    #[test]
    fn parallel_shuffle_is_a_permutation() {
        for threads in [1, 2, 3, 4, 5, 8] {
            let mut data: Vec<u32> = (0..5_000).collect();
            parallel_shuffle(&mut data, threads, 11);
            assert_eq!(sorted(data), (0..5_000).collect::<Vec<_>>(), "threads={threads}");
        }
    }

    #[test]
    fn parallel_shuffle_is_deterministic_per_seed() {
        let run = || {
            let mut data: Vec<u32> = (0..64).collect();
            ParallelShuffle::new(3, 42).min_parallel_len(0).run(&mut data);
            data
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn more_threads_than_elements() {
        let mut data = vec![1u32, 2];
        ParallelShuffle::new(8, 1).min_parallel_len(0).run(&mut data);
        assert_eq!(sorted(data), [1, 2]);

        let mut empty: Vec<u32> = Vec::new();
        parallel_shuffle(&mut empty, 4, 1);
        assert!(empty.is_empty());
    }
}
