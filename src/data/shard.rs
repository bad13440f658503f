use std::ops::Range;

/// The indices of `total` items that `worker` owns out of `workers`.
///
/// Shards are contiguous and in worker order. The first `total % workers` shards take
/// one extra item, so sizes never differ by more than one.
///
/// # Panics
/// If `worker` isn't below `workers`.
pub fn shard_range(total: usize, worker: usize, workers: usize) -> Range<usize> {
    assert!(
        worker < workers,
        "worker {worker} out of range for {workers} workers"
    );

    let (size, extra) = (total / workers, total % workers);
    let start = |w: usize| w * size + w.min(extra);

    start(worker)..start(worker + 1)
}
