use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread::ScopedJoinHandle,
};

use log::{debug, error};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{RingSync, SamplingPolicy, SolverConfig};
use crate::{
    error::{Result, SolverErr},
    model::Model,
    shuffle::{ParallelShuffle, fisher_yates},
    storage::WildWeights,
};

const WORKER_STREAM: u64 = 0xD1B5_4A32_D192_ED03;

/// What a single worker trains on.
pub(crate) struct Assignment<'a> {
    /// Global worker id.
    pub id: usize,
    /// Indices of the training points this worker owns.
    pub shard: &'a [usize],
    /// The weights this worker updates in place.
    pub weights: &'a WildWeights,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WorkerStats {
    pub epochs: usize,
    pub steps: u64,
}

/// Permutes the indices of `len` training points, so that shards don't depend on the
/// order of the dataset.
pub(crate) fn training_order(len: usize, threads: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    ParallelShuffle::new(threads, seed).run(&mut order);
    order
}

fn worker_rng(seed: u64, worker: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ WORKER_STREAM.wrapping_mul(worker as u64 + 1))
}

/// The epoch loop of a Hogwild worker.
///
/// The stop flag is checked before every point. When `ring` is given, the worker
/// takes part in the token ring after every step, and before returning hands a held
/// token back and retires from the ring.
///
/// # Returns
/// The amount of work done, or a `TokenProtocol` error after raising the stop flag.
pub(crate) fn train(
    model: &dyn Model,
    config: &SolverConfig,
    seed: u64,
    stop: &AtomicBool,
    assignment: Assignment<'_>,
    mut ring: Option<RingSync<'_>>,
) -> Result<WorkerStats> {
    let Assignment {
        id,
        shard,
        weights,
    } = assignment;

    let points = model.dataset().points();
    let mut rng = worker_rng(seed, id);
    let mut scratch = vec![0.; model.scratch_len()];
    let mut order = shard.to_vec();
    let mut learning_rate = config.learning_rate;
    let mut stats = WorkerStats::default();

    'epochs: for _ in 0..config.max_epochs.get() {
        match config.sampling {
            SamplingPolicy::Shuffle => fisher_yates(&mut order, &mut rng),
            SamplingPolicy::WithReplacement => {
                for idx in order.iter_mut() {
                    *idx = shard[rng.random_range(0..shard.len())];
                }
            }
        }

        for &idx in &order {
            if stop.load(Ordering::Relaxed) {
                break 'epochs;
            }

            model.gradient_step(&points[idx], weights, learning_rate, &mut scratch);
            stats.steps += 1;

            if let Some(sync) = ring.as_mut() {
                if let Err(e) = sync.after_step() {
                    error!(worker = id; "aborting run: {e}");
                    stop.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }

        stats.epochs += 1;
        learning_rate *= config.step_decay;
    }

    if let Some(Err(e)) = ring.map(RingSync::finish) {
        stop.store(true, Ordering::Release);
        return Err(e);
    }

    debug!(worker = id, epochs = stats.epochs, steps = stats.steps; "worker done");
    Ok(stats)
}

/// Joins every worker of a run.
///
/// # Returns
/// The first error any worker reported, or `WorkerPanicked`.
pub(crate) fn join_workers(
    handles: Vec<(usize, ScopedJoinHandle<'_, Result<WorkerStats>>)>,
) -> Result<WorkerStats> {
    let mut total = WorkerStats::default();
    let mut first_err = None;

    for (worker, handle) in handles {
        match handle.join() {
            Ok(Ok(stats)) => {
                total.epochs = total.epochs.max(stats.epochs);
                total.steps += stats.steps;
            }
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(_) => {
                first_err.get_or_insert(SolverErr::WorkerPanicked { worker });
            }
        }
    }

    first_err.map_or(Ok(total), Err)
}
