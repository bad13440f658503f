use std::{
    fmt,
    num::NonZeroUsize,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use log::info;

use super::{
    ConvergenceMonitor, RingCoordinator, RingSync, SgdResult, Solver, SolverConfig, Trace,
    check_inputs, conclude,
    worker::{self, Assignment},
};
use crate::{
    data::shard_range,
    error::Result,
    model::Model,
    ops,
    topology::{CoreBinder, NumaConfig, WorkerSlot, extract_clusters},
};

/// The outcome of a cluster run along with the state of the ring once every worker
/// joined.
#[derive(Debug, Clone)]
pub struct ClusterRun {
    pub result: SgdResult,
    /// Every cluster's weights at join time, in cluster order.
    pub replicas: Vec<Vec<f32>>,
    /// The token value at join time.
    pub final_token: isize,
}

/// Hogwild SGD inside NUMA local clusters, each training a private replica of the
/// weights, with the replicas averaged asynchronously over a token ring.
///
/// A single cluster degenerates into `ParallelSgdSolver`: the ring is never set up.
pub struct ClusterParallelSgdSolver {
    config: SolverConfig,
    clusters: Vec<Vec<WorkerSlot>>,
    threads: usize,
    steps_before_token_pass: usize,
    binder: Box<dyn CoreBinder>,
}

impl ClusterParallelSgdSolver {
    /// Creates a new `ClusterParallelSgdSolver`.
    ///
    /// # Arguments
    /// * `config` - The hyper parameters of the run.
    /// * `threads` - The total amount of workers.
    /// * `max_cluster_size` - The most workers a cluster may hold.
    /// * `steps_before_token_pass` - How many gradient steps a worker holds the token.
    /// * `numa` - The topology the clusters are carved from.
    /// * `binder` - Pins every worker to its core.
    ///
    /// # Returns
    /// The solver, or `NotEnoughCores` / `ClusterTooLarge` if the topology can't host
    /// the requested layout.
    pub fn new(
        config: SolverConfig,
        threads: NonZeroUsize,
        max_cluster_size: NonZeroUsize,
        steps_before_token_pass: NonZeroUsize,
        numa: &NumaConfig,
        binder: Box<dyn CoreBinder>,
    ) -> Result<Self> {
        let clusters = extract_clusters(threads.get(), max_cluster_size.get(), numa)?;

        Ok(Self {
            config,
            clusters,
            threads: threads.get(),
            steps_before_token_pass: steps_before_token_pass.get(),
            binder,
        })
    }

    pub fn clusters(&self) -> &[Vec<WorkerSlot>] {
        &self.clusters
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Runs the solver and also reports the state of the ring after the run.
    ///
    /// # Arguments
    /// See `Solver::solve`.
    ///
    /// # Returns
    /// The run's result, the replicas at join time and the final token.
    pub fn solve_detailed(
        &self,
        train: &dyn Model,
        test: &dyn Model,
        initial: &[f32],
        target_loss: f32,
    ) -> Result<ClusterRun> {
        check_inputs(train, test, initial)?;

        let config = &self.config;
        let threads = self.threads;
        let seed = config.run_seed();
        let order = worker::training_order(train.dataset().len(), threads, seed);
        let sizes: Vec<usize> = self.clusters.iter().map(Vec::len).collect();
        let ring = RingCoordinator::new(&sizes, initial);
        let ringless = ring.clusters() == 1;
        let stop = AtomicBool::new(false);

        info!(
            solver = self.name(),
            threads = threads,
            clusters = ring.clusters(),
            beta = ring.beta(),
            lambda = ring.lambda(),
            seed = seed;
            "starting run"
        );

        let trace = thread::scope(|s| -> Result<Trace> {
            let ring = &ring;
            let monitor = ConvergenceMonitor::spawn(
                s,
                &config.monitor,
                target_loss,
                test,
                &stop,
                config.record_weights,
                move |out: &mut [f32]| ring.average_into(out),
            )?;

            let mut handles = Vec::with_capacity(threads);
            for (cluster, slots) in self.clusters.iter().enumerate() {
                for (position, &slot) in slots.iter().enumerate() {
                    let (order, stop) = (&order, &stop);
                    let binder = &*self.binder;
                    let sync = (!ringless).then(|| {
                        RingSync::new(
                            ring,
                            cluster,
                            slot.worker,
                            position,
                            self.steps_before_token_pass,
                        )
                    });

                    let spawned = thread::Builder::new()
                        .name(format!("sgd-worker-{}", slot.worker))
                        .spawn_scoped(s, move || {
                            binder.bind_current_thread(slot.core);
                            let assignment = Assignment {
                                id: slot.worker,
                                shard: &order[shard_range(order.len(), slot.worker, threads)],
                                weights: &ring.replica(cluster).current,
                            };
                            worker::train(train, config, seed, stop, assignment, sync)
                        });

                    match spawned {
                        Ok(handle) => handles.push((slot.worker, handle)),
                        Err(e) => {
                            stop.store(true, Ordering::Release);
                            return Err(e.into());
                        }
                    }
                }
            }

            let joined = worker::join_workers(handles);
            let trace = monitor.finish()?;
            let stats = joined?;

            info!(epochs = stats.epochs, steps = stats.steps; "workers joined");
            Ok(trace)
        })?;

        let replicas = ring.snapshot_replicas();
        let mut weights = vec![0.; initial.len()];
        ops::mean_into(&mut weights, &replicas);

        let result = conclude(
            self.name(),
            test,
            weights,
            trace,
            target_loss,
            config.record_weights,
        );

        Ok(ClusterRun {
            result,
            replicas,
            final_token: ring.token(),
        })
    }
}

impl fmt::Debug for ClusterParallelSgdSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterParallelSgdSolver")
            .field("config", &self.config)
            .field("clusters", &self.clusters)
            .field("steps_before_token_pass", &self.steps_before_token_pass)
            .finish_non_exhaustive()
    }
}

impl Solver for ClusterParallelSgdSolver {
    fn name(&self) -> &str {
        "cluster"
    }

    fn solve(
        &self,
        train: &dyn Model,
        test: &dyn Model,
        initial: &[f32],
        target_loss: f32,
    ) -> Result<SgdResult> {
        self.solve_detailed(train, test, initial, target_loss)
            .map(|run| run.result)
    }
}
