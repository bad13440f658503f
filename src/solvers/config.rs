use std::{num::NonZeroUsize, time::Duration};

/// How a worker picks the points of an epoch out of its shard.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    /// Every point of the shard exactly once, in a freshly shuffled order.
    #[default]
    Shuffle,
    /// As many points as the shard holds, drawn independently with replacement.
    WithReplacement,
}

/// Execution bounds of the convergence monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    interval: Duration,
}

impl MonitorConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

    /// Creates a new monitor configuration.
    ///
    /// # Args
    /// * `interval` - The wall clock time between two samples of the weights.
    ///
    /// # Returns
    /// A `MonitorConfig` instance.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

/// The hyper parameters shared by every solver.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub learning_rate: f32,
    /// Factor the learning rate gets multiplied by after every epoch.
    pub step_decay: f32,
    pub max_epochs: NonZeroUsize,
    pub sampling: SamplingPolicy,
    pub monitor: MonitorConfig,
    /// The seed of the run, `None` draws one from the OS.
    pub seed: Option<u64>,
    /// Whether trace points keep a copy of the sampled weights.
    pub record_weights: bool,
}

impl SolverConfig {
    /// Creates a new solver configuration with a constant learning rate, shuffled
    /// epochs, the default monitor and a random seed.
    ///
    /// # Args
    /// * `learning_rate` - The initial length of every gradient step.
    /// * `max_epochs` - The amount of epochs after which workers give up.
    ///
    /// # Returns
    /// A `SolverConfig` instance.
    pub fn new(learning_rate: f32, max_epochs: NonZeroUsize) -> Self {
        Self {
            learning_rate,
            step_decay: 1.,
            max_epochs,
            sampling: SamplingPolicy::default(),
            monitor: MonitorConfig::default(),
            seed: None,
            record_weights: false,
        }
    }

    pub fn with_step_decay(mut self, step_decay: f32) -> Self {
        self.step_decay = step_decay;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_recorded_weights(mut self, record: bool) -> Self {
        self.record_weights = record;
        self
    }

    /// Resolves the seed of a single run.
    pub(crate) fn run_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}
