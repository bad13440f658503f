//! The token ring synchronizing cluster replicas.
//!
//! Clusters sit on a logical ring where cluster `c` feeds `(c + 1) % k`. A single
//! token decides which cluster may merge next: a non negative value `c` means
//! cluster `c` is eligible, `-(c + 1)` means cluster `c` is merging right now.
//! Every acquire and release is a single compare and swap that can't legitimately
//! fail, since at any time only one worker in the whole run is allowed to attempt it.
//! Moving an idle token off a cluster whose workers all left is the one transition
//! that may race, and losing that race is harmless.
//!
//! Workers never block on the token, they glance at it after every gradient step.
//! The ring always progresses: the holder releases after a bounded amount of steps,
//! or right away when the run is cancelled. Workers that leave the run retire from
//! the ring, so neither the designation inside a cluster nor the token ever waits on
//! a worker that is gone.
//!
//! Hand-offs and retirements both store their own flag before reading the other
//! side's, with sequentially consistent ordering, so at least one of them notices
//! the other and moves the designation or the token along.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};

use log::{debug, error};

use crate::{
    error::{Result, SolverErr},
    ops,
    storage::WildWeights,
};

const ROOT_TOLERANCE: f64 = 1e-10;

/// Finds the root of a non decreasing `f` inside `(0, 1)` by bisection.
pub fn find_root(f: impl Fn(f64) -> f64) -> f64 {
    let (mut lo, mut hi) = (0., 1.);

    while hi - lo > ROOT_TOLERANCE {
        let mid = (lo + hi) / 2.;
        if f(mid) < 0. {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    (lo + hi) / 2.
}

/// The share of a cluster's progress sent to its successor, the root of
/// `x^k + x - 1` in `(0, 1)`.
pub fn beta_for(clusters: usize) -> f64 {
    let k = clusters as i32;
    find_root(|x| x.powi(k) + x - 1.)
}

/// The blend factor of the successor's observed state, `1 - beta^(k - 1)`.
pub fn lambda_for(clusters: usize, beta: f64) -> f64 {
    1. - beta.powi(clusters as i32 - 1)
}

/// The token encoding "cluster `cluster` is merging".
#[inline]
pub fn busy(cluster: usize) -> isize {
    -(cluster as isize + 1)
}

#[inline]
pub fn is_busy(token: isize) -> bool {
    token < 0
}

/// One cluster's replica of the weights.
#[derive(Debug)]
pub struct ClusterReplica {
    /// The weights this cluster's workers train.
    pub current: WildWeights,
    /// The state at the last merge, blended with the successor's state.
    ///
    /// Only the token holder of this cluster touches it.
    pub last_synced: WildWeights,
    /// Position inside the cluster of the worker allowed to take the token next.
    ///
    /// Written by the token holder right before it releases the token, and by a
    /// retiring designated worker.
    pub next_worker: AtomicUsize,
    /// Positions of the workers that already left the run.
    retired: Box<[AtomicBool]>,
    live: AtomicUsize,
}

impl ClusterReplica {
    /// Creates the replica of a cluster of `workers` workers.
    pub fn new(initial: &[f32], workers: usize) -> Self {
        Self {
            current: WildWeights::from_slice(initial),
            last_synced: WildWeights::from_slice(initial),
            next_worker: AtomicUsize::new(0),
            retired: (0..workers).map(|_| AtomicBool::new(false)).collect(),
            live: AtomicUsize::new(workers),
        }
    }

    /// How many of the cluster's workers are still training.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// The first position after `from`, wrapping around up to `from` itself, whose
    /// worker hasn't retired.
    fn next_live_position(&self, from: usize) -> Option<usize> {
        let len = self.retired.len();
        (1..=len)
            .map(|offset| (from + offset) % len)
            .find(|&p| !self.retired[p].load(Ordering::SeqCst))
    }

    /// Moves the designation off `position` for as long as it points at a retired
    /// worker. Stops quietly when someone else already moved it.
    fn skip_retired_from(&self, mut position: usize) {
        while self.retired[position].load(Ordering::SeqCst) {
            let Some(next) = self.next_live_position(position) else {
                return;
            };

            if self
                .next_worker
                .compare_exchange(position, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            position = next;
        }
    }
}

/// Shared state of the ring for a single run.
#[derive(Debug)]
pub struct RingCoordinator {
    token: AtomicIsize,
    replicas: Vec<ClusterReplica>,
    beta: f32,
    lambda: f32,
}

impl RingCoordinator {
    /// Creates a new `RingCoordinator`.
    ///
    /// # Arguments
    /// * `cluster_sizes` - The amount of workers of every cluster, in ring order.
    /// * `initial` - The weights every replica starts from.
    ///
    /// # Returns
    /// A new coordinator whose token points at cluster `0`.
    ///
    /// # Panics
    /// If there are no clusters.
    pub fn new(cluster_sizes: &[usize], initial: &[f32]) -> Self {
        let clusters = cluster_sizes.len();
        assert!(clusters > 0, "a ring needs at least one cluster");

        let beta = beta_for(clusters);
        let lambda = lambda_for(clusters, beta);

        Self {
            token: AtomicIsize::new(0),
            replicas: cluster_sizes
                .iter()
                .map(|&workers| ClusterReplica::new(initial, workers))
                .collect(),
            beta: beta as f32,
            lambda: lambda as f32,
        }
    }

    pub fn clusters(&self) -> usize {
        self.replicas.len()
    }

    pub fn replicas(&self) -> &[ClusterReplica] {
        &self.replicas
    }

    pub fn replica(&self, cluster: usize) -> &ClusterReplica {
        &self.replicas[cluster]
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    /// The current token value.
    pub fn token(&self) -> isize {
        self.token.load(Ordering::SeqCst)
    }

    /// Writes the elementwise mean of every replica's current weights into `out`.
    ///
    /// # Panics
    /// If `out` isn't as long as the replicas.
    pub fn average_into(&self, out: &mut [f32]) {
        ops::mean_into(out, &self.snapshot_replicas());
    }

    /// Returns a snapshot of every replica's current weights.
    pub fn snapshot_replicas(&self) -> Vec<Vec<f32>> {
        self.replicas.iter().map(|r| r.current.to_vec()).collect()
    }

    fn successor(&self, cluster: usize) -> usize {
        (cluster + 1) % self.clusters()
    }

    /// The first cluster after `from`, wrapping around up to `from` itself, that
    /// still has workers training.
    fn next_live_cluster(&self, from: usize) -> Option<usize> {
        let k = self.clusters();
        (1..=k)
            .map(|offset| (from + offset) % k)
            .find(|&c| self.replicas[c].live_workers() > 0)
    }

    /// Passes an idle token on from `cluster` for as long as it sits on a cluster
    /// with no workers left. Stops quietly when someone else already moved it.
    fn skip_finished_cluster(&self, mut cluster: usize) {
        while self.replicas[cluster].live_workers() == 0 {
            let Some(next) = self.next_live_cluster(cluster) else {
                return;
            };

            if self
                .token
                .compare_exchange(
                    cluster as isize,
                    next as isize,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_err()
            {
                return;
            }

            debug!(from = cluster, to = next; "token skipped a finished cluster");
            cluster = next;
        }
    }

    /// Sends `beta` times the progress of `cluster` since its last merge to its
    /// successor, then blends what the successor held into `last_synced`.
    ///
    /// Only the token holder of `cluster` may call this.
    fn merge(&self, cluster: usize) {
        let own = &self.replicas[cluster];
        let next = &self.replicas[self.successor(cluster)];
        let (beta, lambda) = (self.beta, self.lambda);

        for i in 0..own.current.len() {
            let last = own.last_synced.get(i);
            let delta = own.current.get(i) - last;
            let observed = next.current.fetch_add(i, beta * delta);
            own.last_synced
                .set(i, lambda * observed + (1. - lambda) * last + beta * delta);
        }
    }

    fn transition(&self, cluster: usize, worker: usize, from: isize, to: isize) -> Result<()> {
        match self
            .token
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(found) => {
                error!(
                    cluster = cluster,
                    worker = worker,
                    expected = from,
                    found = found;
                    "token transition failed"
                );
                Err(SolverErr::TokenProtocol {
                    cluster,
                    worker,
                    expected: from,
                    found,
                })
            }
        }
    }
}

/// The ring protocol as seen by a single worker.
///
/// `Unlocked → (acquire, merge) → Locked for steps_before_token_pass steps →
/// (release) → Unlocked`. `finish` releases a held token and retires the worker from
/// the ring. It must be called when the worker exits for any reason other than a
/// protocol error.
#[derive(Debug)]
pub struct RingSync<'a> {
    ring: &'a RingCoordinator,
    cluster: usize,
    /// Global worker id, for diagnostics.
    worker: usize,
    /// Position inside the cluster.
    position: usize,
    steps_before_token_pass: usize,
    locked: bool,
    step: usize,
}

impl<'a> RingSync<'a> {
    /// Creates the protocol state of a worker.
    ///
    /// # Arguments
    /// * `ring` - The run's coordinator.
    /// * `cluster` - The worker's cluster.
    /// * `worker` - The worker's global id.
    /// * `position` - The worker's position inside its cluster.
    /// * `steps_before_token_pass` - How many steps the token is held for.
    pub fn new(
        ring: &'a RingCoordinator,
        cluster: usize,
        worker: usize,
        position: usize,
        steps_before_token_pass: usize,
    ) -> Self {
        Self {
            ring,
            cluster,
            worker,
            position,
            steps_before_token_pass: steps_before_token_pass.max(1),
            locked: false,
            step: 0,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Advances the protocol after a gradient step.
    ///
    /// # Returns
    /// A `TokenProtocol` error if a token transition failed.
    pub fn after_step(&mut self) -> Result<()> {
        if !self.locked && self.try_acquire()? {
            self.ring.merge(self.cluster);
        }

        self.step += 1;

        if self.locked && self.step >= self.steps_before_token_pass {
            self.release()?;
        }

        Ok(())
    }

    /// Releases the token if this worker holds it, then retires the worker.
    pub fn finish(mut self) -> Result<()> {
        if self.locked {
            self.release()?;
        }

        self.retire();
        Ok(())
    }

    fn try_acquire(&mut self) -> Result<bool> {
        let token = self.ring.token();
        let replica = self.ring.replica(self.cluster);

        if is_busy(token)
            || token as usize != self.cluster
            || replica.next_worker.load(Ordering::SeqCst) != self.position
        {
            return Ok(false);
        }

        self.ring
            .transition(self.cluster, self.worker, token, busy(self.cluster))?;

        self.locked = true;
        self.step = 0;
        Ok(true)
    }

    fn release(&mut self) -> Result<()> {
        let replica = self.ring.replica(self.cluster);
        let next_position = replica
            .next_live_position(self.position)
            .unwrap_or(self.position);
        replica.next_worker.store(next_position, Ordering::SeqCst);
        replica.skip_retired_from(next_position);

        let successor = self
            .ring
            .next_live_cluster(self.cluster)
            .unwrap_or(self.cluster);
        self.locked = false;
        self.ring.transition(
            self.cluster,
            self.worker,
            busy(self.cluster),
            successor as isize,
        )?;
        self.ring.skip_finished_cluster(successor);

        debug!(
            cluster = self.cluster,
            worker = self.worker,
            next = successor;
            "token passed"
        );
        Ok(())
    }

    fn retire(&self) {
        let replica = self.ring.replica(self.cluster);
        replica.retired[self.position].store(true, Ordering::SeqCst);
        replica.skip_retired_from(self.position);

        if replica.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.ring.skip_finished_cluster(self.cluster);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beta_is_the_root() {
        for k in 1..=64 {
            let beta = beta_for(k);
            assert!(beta > 0. && beta < 1., "k={k} beta={beta}");
            assert!((beta.powi(k as i32) + beta - 1.).abs() < 1e-9, "k={k}");
        }
    }

    #[test]
    fn known_constants() {
        assert!((beta_for(1) - 0.5).abs() < 1e-9);
        let golden = (5f64.sqrt() - 1.) / 2.;
        assert!((beta_for(2) - golden).abs() < 1e-9);
        assert!((lambda_for(2, golden) - (1. - golden)).abs() < 1e-9);
        assert_eq!(lambda_for(1, 0.5), 0.);
    }

    #[test]
    fn busy_encoding() {
        assert_eq!(busy(0), -1);
        assert_eq!(busy(3), -4);
        assert!(is_busy(busy(0)));
        assert!(!is_busy(0));
    }

    #[test]
    fn merge_moves_beta_of_the_progress() {
        let ring = RingCoordinator::new(&[1, 1], &[0., 0.]);
        ring.replica(0).current.set(0, 1.);

        let mut sync = RingSync::new(&ring, 0, 0, 0, 10);
        sync.after_step().unwrap();

        let (beta, lambda) = (ring.beta(), ring.lambda());
        assert!(sync.is_locked());
        assert_eq!(ring.token(), busy(0));
        assert_eq!(ring.replica(1).current.get(0), beta);
        assert_eq!(ring.replica(0).last_synced.get(0), (1. - lambda) * 0. + beta);
        assert_eq!(ring.replica(1).current.get(1), 0.);
    }

    #[test]
    fn token_cycles_through_clusters_and_workers() {
        let ring = RingCoordinator::new(&[2, 2], &[0.]);

        // Two workers per cluster, the token is held for two steps.
        let mut a0 = RingSync::new(&ring, 0, 0, 0, 2);
        let mut a1 = RingSync::new(&ring, 0, 1, 1, 2);
        let mut b0 = RingSync::new(&ring, 1, 2, 0, 2);
        let mut b1 = RingSync::new(&ring, 1, 3, 1, 2);

        a1.after_step().unwrap();
        assert_eq!(ring.token(), 0, "only the designated worker takes the token");

        a0.after_step().unwrap();
        assert!(a0.is_locked());
        b0.after_step().unwrap();
        assert!(!b0.is_locked());

        a0.after_step().unwrap();
        assert!(!a0.is_locked());
        assert_eq!(ring.token(), 1);
        assert_eq!(ring.replica(0).next_worker.load(Ordering::SeqCst), 1);

        b1.after_step().unwrap();
        assert!(!b1.is_locked());
        b0.after_step().unwrap();
        assert!(b0.is_locked());
        b0.after_step().unwrap();
        assert_eq!(ring.token(), 0);

        a0.after_step().unwrap();
        assert!(!a0.is_locked());
        a1.after_step().unwrap();
        assert!(a1.is_locked());
    }

    #[test]
    fn finish_releases_a_held_token() {
        let ring = RingCoordinator::new(&[1, 1, 1], &[0.]);
        let mut sync = RingSync::new(&ring, 0, 0, 0, usize::MAX);

        sync.after_step().unwrap();
        assert_eq!(ring.token(), busy(0));

        sync.finish().unwrap();
        assert_eq!(ring.token(), 1);
    }

    #[test]
    fn average_of_replicas() {
        let ring = RingCoordinator::new(&[1, 1], &[1., 2.]);
        ring.replica(1).current.set(0, 3.);

        let mut out = [0.; 2];
        ring.average_into(&mut out);
        assert_eq!(out, [2., 2.]);
        assert_eq!(ring.snapshot_replicas(), vec![vec![1., 2.], vec![3., 2.]]);
    }

    #[test]
    fn retired_designated_worker_passes_the_designation_on() {
        let ring = RingCoordinator::new(&[1, 2], &[0.]);
        let mut a = RingSync::new(&ring, 0, 0, 0, 1);
        let b0 = RingSync::new(&ring, 1, 1, 0, 1);
        let mut b1 = RingSync::new(&ring, 1, 2, 1, 1);

        // b0 owns no points and leaves before ever stepping.
        b0.finish().unwrap();
        assert_eq!(ring.replica(1).next_worker.load(Ordering::SeqCst), 1);
        assert_eq!(ring.replica(1).live_workers(), 1);

        for _ in 0..3 {
            a.after_step().unwrap();
            assert_eq!(ring.token(), 1);

            b1.after_step().unwrap();
            assert_eq!(ring.token(), 0, "b1 must take and pass the token");
            assert_eq!(ring.replica(1).next_worker.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn release_skips_retired_workers() {
        let ring = RingCoordinator::new(&[3, 1], &[0.]);
        let mut a0 = RingSync::new(&ring, 0, 0, 0, 1);
        let a1 = RingSync::new(&ring, 0, 1, 1, 1);
        let mut a2 = RingSync::new(&ring, 0, 2, 2, 1);
        let mut b = RingSync::new(&ring, 1, 3, 0, 1);

        a1.finish().unwrap();
        a0.after_step().unwrap();
        assert_eq!(ring.replica(0).next_worker.load(Ordering::SeqCst), 2);

        b.after_step().unwrap();
        a2.after_step().unwrap();
        assert_eq!(ring.token(), 1);
        assert_eq!(ring.replica(0).next_worker.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn token_skips_finished_clusters() {
        let ring = RingCoordinator::new(&[1, 1, 1], &[0.]);
        let mut a = RingSync::new(&ring, 0, 0, 0, 1);
        let b = RingSync::new(&ring, 1, 1, 0, 1);
        let c = RingSync::new(&ring, 2, 2, 0, 1);

        b.finish().unwrap();
        a.after_step().unwrap();
        assert_eq!(ring.token(), 2);

        // The token already waits on cluster 2 when its last worker leaves.
        c.finish().unwrap();
        assert_eq!(ring.token(), 0);

        a.after_step().unwrap();
        assert_eq!(ring.token(), 0, "a lone live cluster keeps merging");

        a.finish().unwrap();
        assert_eq!(ring.token(), 0);
        assert!(!is_busy(ring.token()));
    }

    #[test]
    fn corrupted_token_is_reported() {
        let ring = RingCoordinator::new(&[1, 1], &[0.]);
        let mut sync = RingSync::new(&ring, 0, 0, 0, 5);
        sync.after_step().unwrap();

        ring.token.store(1, Ordering::Release);
        let err = sync.finish().unwrap_err();
        assert!(matches!(
            err,
            SolverErr::TokenProtocol {
                cluster: 0,
                expected: -1,
                found: 1,
                ..
            }
        ));
    }
}
