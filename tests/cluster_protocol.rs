use std::{num::NonZeroUsize, time::Duration};

use ring_sgd::{
    ClusterParallelSgdSolver, NumaConfig, SolverConfig,
    data::{DataPoint, Dataset},
    model::{LinearRegression, Model},
    ops,
    solvers::{MonitorConfig, SamplingPolicy, ring::is_busy},
    topology::NoBinding,
};

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn model() -> LinearRegression {
    let points = (0..32)
        .map(|i| {
            let x = i as f32 / 32.;
            DataPoint::dense(vec![x, 1. - x], 3. * x - 1.)
        })
        .collect();

    LinearRegression::new(Dataset::new(points), 2)
}

#[test]
fn token_is_released_when_cancelled_while_held() {
    let model = model();
    let config = SolverConfig::new(0.01, nz(usize::MAX))
        .with_monitor(MonitorConfig::new(Duration::from_millis(10)))
        .with_seed(1);

    // The first holder never passes the token on its own, the monitor stops the run
    // on its first sample.
    let solver = ClusterParallelSgdSolver::new(
        config,
        nz(4),
        nz(1),
        nz(usize::MAX),
        &NumaConfig::single_node(4),
        Box::new(NoBinding),
    )
    .unwrap();

    let initial = model.create_weights();
    let run = solver
        .solve_detailed(&model, &model, &initial, f32::MAX)
        .unwrap();

    assert!(!is_busy(run.final_token), "busy token {}", run.final_token);
    assert!((0..4).contains(&run.final_token), "token {}", run.final_token);
}

#[test]
fn workers_without_points_leave_the_ring() {
    // Three points over four workers: the second worker of cluster 1 owns nothing
    // and exits right away.
    let points = (0..3)
        .map(|i| DataPoint::dense(vec![i as f32, 1.], 2. * i as f32))
        .collect();
    let model = LinearRegression::new(Dataset::new(points), 2);
    let config = SolverConfig::new(0.01, nz(2000)).with_seed(5);

    let solver = ClusterParallelSgdSolver::new(
        config,
        nz(4),
        nz(2),
        nz(1),
        &NumaConfig::single_node(4),
        Box::new(NoBinding),
    )
    .unwrap();
    let sizes: Vec<usize> = solver.clusters().iter().map(Vec::len).collect();
    assert_eq!(sizes, [2, 2]);

    let initial = model.create_weights();
    let run = solver
        .solve_detailed(&model, &model, &initial, -1.)
        .unwrap();

    assert!(!is_busy(run.final_token), "busy token {}", run.final_token);
    assert!(run.replicas.iter().flatten().all(|w| w.is_finite()));
    assert_ne!(run.replicas[1], initial, "cluster 1 never trained");
}

#[test]
fn result_is_the_mean_of_the_replicas() {
    let model = model();
    let config = SolverConfig::new(0.05, nz(50))
        .with_sampling(SamplingPolicy::WithReplacement)
        .with_seed(9);

    let solver = ClusterParallelSgdSolver::new(
        config,
        nz(3),
        nz(1),
        nz(1),
        &NumaConfig::single_node(3),
        Box::new(NoBinding),
    )
    .unwrap();

    let initial = model.create_weights();
    let run = solver
        .solve_detailed(&model, &model, &initial, -1.)
        .unwrap();

    assert_eq!(run.replicas.len(), 3);
    assert!((0..3).contains(&run.final_token));

    let mut mean = vec![0.; initial.len()];
    for replica in &run.replicas {
        ops::add(&mut mean, replica);
    }
    ops::divide(&mut mean, 3.);

    for (got, expected) in run.result.weights.iter().zip(&mean) {
        assert!((got - expected).abs() < 1e-6, "{got} != {expected}");
    }
}

#[test]
fn clusters_follow_the_topology() {
    let numa = NumaConfig::new([(0, vec![0, 1, 2]), (1, vec![3, 4, 5])].into());
    let config = SolverConfig::new(0.1, nz(1));

    let solver =
        ClusterParallelSgdSolver::new(config, nz(5), nz(2), nz(10), &numa, Box::new(NoBinding))
            .unwrap();

    let sizes: Vec<usize> = solver.clusters().iter().map(Vec::len).collect();
    assert_eq!(sizes, [2, 1, 2]);
    assert!(solver.clusters()[..2].iter().flatten().all(|s| s.node == 0));
}
