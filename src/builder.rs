use std::{io::Read, time::Duration};

use crate::{
    error::{Result, SolverErr},
    solvers::{
        ClusterParallelSgdSolver, MonitorConfig, ParallelSgdSolver, SamplingPolicy,
        SequentialSgdSolver, Solver, SolverConfig,
    },
    specs::{SamplingSpec, SolverSpec, StrategySpec},
    topology::{CoreBinder, NumaConfig, default_binder},
};

/// Builds `Solver`s given a specification.
#[derive(Debug, Clone)]
pub struct SolverBuilder {
    numa: NumaConfig,
}

impl SolverBuilder {
    /// Creates a new `SolverBuilder`.
    ///
    /// # Arguments
    /// * `numa` - The topology every solver gets validated against.
    ///
    /// # Returns
    /// A new `SolverBuilder` instance.
    pub fn new(numa: NumaConfig) -> Self {
        Self { numa }
    }

    /// Builds a new `Solver` following a spec, pinning its workers to their cores
    /// where the platform supports it.
    ///
    /// # Arguments
    /// * `spec` - The specification of the solver.
    ///
    /// # Returns
    /// A new solver or a `SolverErr` if the spec is invalid or doesn't fit the
    /// topology.
    pub fn build(&self, spec: &SolverSpec) -> Result<Box<dyn Solver>> {
        self.build_with_binder(spec, default_binder())
    }

    /// Builds a new `Solver` following a spec whose workers get pinned by `binder`.
    pub fn build_with_binder(
        &self,
        spec: &SolverSpec,
        binder: Box<dyn CoreBinder>,
    ) -> Result<Box<dyn Solver>> {
        let config = self.resolve_config(spec)?;

        let solver: Box<dyn Solver> = match spec.strategy {
            StrategySpec::Sequential => Box::new(SequentialSgdSolver::new(config)),
            StrategySpec::Parallel { threads } => {
                Box::new(ParallelSgdSolver::new(config, threads, &self.numa, binder)?)
            }
            StrategySpec::Cluster {
                threads,
                max_cluster_size,
                steps_before_token_pass,
            } => Box::new(ClusterParallelSgdSolver::new(
                config,
                threads,
                max_cluster_size,
                steps_before_token_pass,
                &self.numa,
                binder,
            )?),
        };

        Ok(solver)
    }

    /// Reads a JSON spec and builds the solver it describes.
    pub fn from_json<R: Read>(&self, reader: R) -> Result<Box<dyn Solver>> {
        let spec: SolverSpec = serde_json::from_reader(reader)?;
        self.build(&spec)
    }

    /// Resolves the `SolverConfig` shared by every strategy.
    ///
    /// # Arguments
    /// * `spec` - The specification of the solver.
    ///
    /// # Returns
    /// The config or an `InvalidSpec` error describing the first invalid field.
    fn resolve_config(&self, spec: &SolverSpec) -> Result<SolverConfig> {
        if !(spec.learning_rate.is_finite() && spec.learning_rate > 0.) {
            return Err(SolverErr::InvalidSpec(format!(
                "learning rate must be positive, got {}",
                spec.learning_rate
            )));
        }

        if !(spec.step_decay.is_finite() && spec.step_decay > 0.) {
            return Err(SolverErr::InvalidSpec(format!(
                "step decay must be positive, got {}",
                spec.step_decay
            )));
        }

        if spec.monitor_interval_ms == 0 {
            return Err(SolverErr::InvalidSpec(
                "monitor interval must be at least 1ms".to_string(),
            ));
        }

        let sampling = match spec.sampling {
            SamplingSpec::Shuffle => SamplingPolicy::Shuffle,
            SamplingSpec::WithReplacement => SamplingPolicy::WithReplacement,
        };
        let monitor = MonitorConfig::new(Duration::from_millis(spec.monitor_interval_ms));

        let mut config = SolverConfig::new(spec.learning_rate, spec.max_epochs)
            .with_step_decay(spec.step_decay)
            .with_sampling(sampling)
            .with_monitor(monitor)
            .with_recorded_weights(spec.record_weights);
        config.seed = spec.seed;

        Ok(config)
    }
}
