use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use log::{error, info};

use super::{
    ConvergenceMonitor, SgdResult, Solver, SolverConfig, Trace, check_inputs, conclude,
    worker::{self, Assignment},
};
use crate::{error::Result, model::Model, storage::WildWeights};

/// Single threaded SGD, the baseline every parallel solver is compared against.
///
/// The epoch loop runs on the calling thread while the convergence monitor samples
/// the weights from its own.
#[derive(Debug, Clone)]
pub struct SequentialSgdSolver {
    config: SolverConfig,
}

impl SequentialSgdSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }
}

impl Solver for SequentialSgdSolver {
    fn name(&self) -> &str {
        "sequential"
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
        let seed = config.run_seed();
        let order = worker::training_order(train.dataset().len(), 1, seed);
        let weights = WildWeights::from_slice(initial);
        let stop = AtomicBool::new(false);

        info!(solver = self.name(), points = order.len(), seed = seed; "starting run");

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

            let assignment = Assignment {
                id: 0,
                shard: &order,
                weights: &weights,
            };
            let outcome = worker::train(train, config, seed, &stop, assignment, None);

            stop.store(true, Ordering::Release);
            let trace = monitor.finish()?;
            outcome?;
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
