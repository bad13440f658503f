//! Serializable descriptions of solvers, resolved by `SolverBuilder`.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// The specification for the `SamplingPolicy` of a solver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingSpec {
    #[default]
    Shuffle,
    WithReplacement,
}

/// The specification for the strategy of a `Solver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategySpec {
    Sequential,
    Parallel {
        threads: NonZeroUsize,
    },
    Cluster {
        threads: NonZeroUsize,
        max_cluster_size: NonZeroUsize,
        steps_before_token_pass: NonZeroUsize,
    },
}

/// The specification for the `Solver` trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSpec {
    pub strategy: StrategySpec,
    pub learning_rate: f32,
    #[serde(default = "default_step_decay")]
    pub step_decay: f32,
    pub max_epochs: NonZeroUsize,
    #[serde(default)]
    pub sampling: SamplingSpec,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub record_weights: bool,
}

fn default_step_decay() -> f32 {
    1.
}

fn default_monitor_interval_ms() -> u64 {
    50
}
