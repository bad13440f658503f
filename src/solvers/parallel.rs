use std::{
    fmt,
    num::NonZeroUsize,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use log::{error, info};

use super::{
    ConvergenceMonitor, SgdResult, Solver, SolverConfig, Trace, check_inputs, conclude,
    worker::{self, Assignment},
};
use crate::{
    data::shard_range,
    error::Result,
    model::Model,
    storage::WildWeights,
    topology::{CoreBinder, NumaConfig, WorkerSlot, assign_cores},
};

/// Hogwild SGD: every worker updates the same weights without any synchronization.
///
/// The training set is split in one contiguous shard per worker and worker `i` is
/// bound to the `i`-th core of the topology, node by node.
pub struct ParallelSgdSolver {
    config: SolverConfig,
    slots: Vec<WorkerSlot>,
    binder: Box<dyn CoreBinder>,
}

impl ParallelSgdSolver {
    /// Creates a new `ParallelSgdSolver`.
    ///
    /// # Arguments
    /// * `config` - The hyper parameters of the run.
    /// * `threads` - The amount of workers.
    /// * `numa` - The topology the workers are placed on.
    /// * `binder` - Pins every worker to its core.
    ///
    /// # Returns
    /// The solver, or `NotEnoughCores` if the topology can't host `threads` workers.
    pub fn new(
        config: SolverConfig,
        threads: NonZeroUsize,
        numa: &NumaConfig,
        binder: Box<dyn CoreBinder>,
    ) -> Result<Self> {
        let slots = assign_cores(threads.get(), numa)?;

        Ok(Self {
            config,
            slots,
            binder,
        })
    }

    pub fn threads(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }
}

impl fmt::Debug for ParallelSgdSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelSgdSolver")
            .field("config", &self.config)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl Solver for ParallelSgdSolver {
    fn name(&self) -> &str {
        "parallel"
    }

    fn solve(
        &self,
        train: &dyn Model,
        test: &dyn Model,
        initial: &[f32],
        target_loss: f32,
    ) -> Result<SgdResult> {
        check_inputs(train, test, initial)?;

        let config = &self.config;
        let threads = self.threads();
        let seed = config.run_seed();
        let order = worker::training_order(train.dataset().len(), threads, seed);
        let weights = WildWeights::from_slice(initial);
        let stop = AtomicBool::new(false);

        info!(
            solver = self.name(),
            threads = threads,
            points = order.len(),
            seed = seed;
            "starting run"
        );

        let trace = thread::scope(|s| -> Result<Trace> {
            let snapshot = |out: &mut [f32]| {
                if let Err(e) = weights.pull(out) {
                    error!("monitor snapshot failed: {e}");
                }
            };
            let monitor = ConvergenceMonitor::spawn(
                s,
                &config.monitor,
                target_loss,
                test,
                &stop,
                config.record_weights,
                snapshot,
            )?;

            let mut handles = Vec::with_capacity(threads);
            for &slot in &self.slots {
                let (order, weights, stop) = (&order, &weights, &stop);
                let binder = &*self.binder;

                let spawned = thread::Builder::new()
                    .name(format!("sgd-worker-{}", slot.worker))
                    .spawn_scoped(s, move || {
                        binder.bind_current_thread(slot.core);
                        let assignment = Assignment {
                            id: slot.worker,
                            shard: &order[shard_range(order.len(), slot.worker, threads)],
                            weights,
                        };
                        worker::train(train, config, seed, stop, assignment, None)
                    });

                match spawned {
                    Ok(handle) => handles.push((slot.worker, handle)),
                    Err(e) => {
                        stop.store(true, Ordering::Release);
                        return Err(e.into());
                    }
                }
            }

            let joined = worker::join_workers(handles);
            let trace = monitor.finish()?;
            let stats = joined?;

            info!(epochs = stats.epochs, steps = stats.steps; "workers joined");
            Ok(trace)
        })?;

        Ok(conclude(
            self.name(),
            test,
            weights.to_vec(),
            trace,
            target_loss,
            config.record_weights,
        ))
    }
}
