mod cluster;
mod config;
mod monitor;
mod parallel;
pub mod ring;
mod sequential;
mod worker;

pub use cluster::{ClusterParallelSgdSolver, ClusterRun};
pub use config::{MonitorConfig, SamplingPolicy, SolverConfig};
pub use monitor::{ConvergenceMonitor, Trace, TracePoint};
pub use parallel::ParallelSgdSolver;
pub use ring::{ClusterReplica, RingCoordinator, RingSync};
pub use sequential::SequentialSgdSolver;

use log::{info, warn};

use crate::{
    error::{Result, SolverErr},
    model::Model,
};

/// The outcome of a solve call.
#[derive(Debug, Clone)]
pub struct SgdResult {
    pub weights: Vec<f32>,
    pub trace: Trace,
}

impl SgdResult {
    /// The test loss of the final weights.
    pub fn final_loss(&self) -> Option<f32> {
        self.trace.last().map(|p| p.loss)
    }
}

/// A strategy minimizing a model's loss with stochastic gradient descent.
pub trait Solver: Send + Sync {
    /// A short name for logs and reports.
    fn name(&self) -> &str;

    /// Trains the weights until the test loss reaches `target_loss` or the epoch
    /// budget runs out.
    ///
    /// # Arguments
    /// * `train` - The model whose gradients drive the updates.
    /// * `test` - The model the convergence monitor evaluates.
    /// * `initial` - The starting weights, `train.size()` entries long.
    /// * `target_loss` - The test loss at or below which the run stops.
    ///
    /// # Returns
    /// The final weights and the loss trace, or an error if the inputs are
    /// inconsistent or the run failed.
    fn solve(
        &self,
        train: &dyn Model,
        test: &dyn Model,
        initial: &[f32],
        target_loss: f32,
    ) -> Result<SgdResult>;
}

/// Checks that the models and the initial weights agree on the dimensionality.
fn check_inputs(train: &dyn Model, test: &dyn Model, initial: &[f32]) -> Result<()> {
    if train.size() != test.size() {
        return Err(SolverErr::ModelMismatch {
            train: train.size(),
            test: test.size(),
        });
    }

    if initial.len() != train.size() {
        return Err(SolverErr::WeightsMismatch {
            got: initial.len(),
            expected: train.size(),
        });
    }

    Ok(())
}

/// Records the final weights in the trace and logs the outcome of the run.
fn conclude(
    solver: &str,
    test: &dyn Model,
    weights: Vec<f32>,
    mut trace: Trace,
    target_loss: f32,
    record_weights: bool,
) -> SgdResult {
    let loss = test.loss(&weights);
    trace.record(loss, record_weights.then_some(&weights[..]));

    let elapsed = trace.last().map(|p| p.elapsed).unwrap_or_default();
    if loss <= target_loss {
        info!(
            solver = solver,
            loss = loss,
            elapsed_ms = elapsed.as_millis() as u64;
            "run converged"
        );
    } else {
        warn!(
            solver = solver,
            loss = loss,
            target = target_loss;
            "epoch budget exhausted before reaching the target loss"
        );
    }

    SgdResult { weights, trace }
}
