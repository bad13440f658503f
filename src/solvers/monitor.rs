use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, Scope, ScopedJoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use super::MonitorConfig;
use crate::{
    error::{Result, SolverErr},
    model::Model,
};

/// A sample of a run: the test loss at some point in time.
#[derive(Debug, Clone)]
pub struct TracePoint {
    /// Time since the run started.
    pub elapsed: Duration,
    pub loss: f32,
    /// The sampled weights, only kept when the solver records them.
    pub weights: Option<Arc<[f32]>>,
}

/// The chronological samples of a run.
#[derive(Debug, Clone)]
pub struct Trace {
    started: Instant,
    points: Vec<TracePoint>,
}

impl Trace {
    /// Starts a new, empty trace at the current instant.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            points: Vec::new(),
        }
    }

    /// Appends a sample taken now.
    pub fn record(&mut self, loss: f32, weights: Option<&[f32]>) {
        self.points.push(TracePoint {
            elapsed: self.started.elapsed(),
            loss,
            weights: weights.map(Arc::from),
        });
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The most recent sample.
    pub fn last(&self) -> Option<&TracePoint> {
        self.points.last()
    }
}

/// Wakes the monitor up early once the workers are done.
#[derive(Default)]
struct Wakeup {
    done: Mutex<bool>,
    cond: Condvar,
}

/// A background thread that samples the weights of a run, evaluates their test loss
/// and raises the stop flag once it reaches the target.
///
/// It only ever reads the weights. The snapshots it takes may mix values from before
/// and after concurrent updates, which is fine for a convergence check.
pub struct ConvergenceMonitor<'scope> {
    handle: ScopedJoinHandle<'scope, Trace>,
    wakeup: Arc<Wakeup>,
}

impl<'scope> ConvergenceMonitor<'scope> {
    /// Spawns the monitor inside `scope`.
    ///
    /// # Arguments
    /// * `scope` - The scope of the run, the monitor borrows from it.
    /// * `config` - The sampling interval.
    /// * `target_loss` - The test loss at or below which the run stops.
    /// * `test` - The model evaluating the test loss.
    /// * `stop` - The run's cancellation flag.
    /// * `record_weights` - Whether trace points keep the sampled weights.
    /// * `snapshot` - Copies the current weights of the run into its argument.
    ///
    /// # Returns
    /// The running monitor or an io error if the thread couldn't be spawned.
    pub fn spawn<'env, F>(
        scope: &'scope Scope<'scope, 'env>,
        config: &MonitorConfig,
        target_loss: f32,
        test: &'env dyn Model,
        stop: &'env AtomicBool,
        record_weights: bool,
        mut snapshot: F,
    ) -> Result<Self>
    where
        F: FnMut(&mut [f32]) + Send + 'scope,
    {
        let wakeup = Arc::new(Wakeup::default());
        let interval = config.interval();
        let mut trace = Trace::start();

        let handle = {
            let wakeup = Arc::clone(&wakeup);

            thread::Builder::new()
                .name("sgd-monitor".into())
                .spawn_scoped(scope, move || {
                    let mut weights = test.create_weights();

                    loop {
                        {
                            let mut done = wakeup.done.lock();
                            if !*done {
                                wakeup.cond.wait_for(&mut done, interval);
                            }
                            if *done {
                                break;
                            }
                        }

                        snapshot(&mut weights);
                        let loss = test.loss(&weights);
                        trace.record(loss, record_weights.then_some(&weights[..]));
                        debug!(loss = loss, samples = trace.len(); "monitor sample");

                        if loss <= target_loss {
                            info!(loss = loss, target = target_loss; "target loss reached");
                            stop.store(true, Ordering::Release);
                            break;
                        }

                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                    }

                    trace
                })?
        };

        Ok(Self { handle, wakeup })
    }

    /// Stops the monitor and waits for it.
    ///
    /// # Returns
    /// The trace gathered so far.
    pub fn finish(self) -> Result<Trace> {
        *self.wakeup.done.lock() = true;
        self.wakeup.cond.notify_all();

        self.handle.join().map_err(|_| SolverErr::MonitorPanicked)
    }
}
