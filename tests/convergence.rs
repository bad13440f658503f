use std::num::NonZeroUsize;

use ring_sgd::{
    ClusterParallelSgdSolver, NumaConfig, ParallelSgdSolver, SequentialSgdSolver, Solver,
    SolverConfig,
    data::{DataPoint, Dataset},
    model::{LinearRegression, Model},
    topology::NoBinding,
};

/// Never reached, runs always exhaust their epoch budget.
const UNREACHABLE_LOSS: f32 = -1.;

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// A noiseless 4x4 grid on the plane `y = 2·x1 - x2 + 0.5`.
fn grid() -> LinearRegression {
    let ticks = [-1., -1. / 3., 1. / 3., 1.];
    let points = ticks
        .iter()
        .flat_map(|&x1| ticks.iter().map(move |&x2| (x1, x2)))
        .map(|(x1, x2)| DataPoint::dense(vec![x1, x2], 2. * x1 - x2 + 0.5))
        .collect();

    LinearRegression::new(Dataset::new(points), 2)
}

/// The 4 corners of the unit square on the same plane.
fn corners() -> LinearRegression {
    let points = [(0., 0.), (1., 0.), (0., 1.), (1., 1.)]
        .into_iter()
        .map(|(x1, x2): (f32, f32)| DataPoint::dense(vec![x1, x2], 2. * x1 - x2 + 0.5))
        .collect();

    LinearRegression::new(Dataset::new(points), 2)
}

fn config(epochs: usize) -> SolverConfig {
    SolverConfig::new(0.05, nz(epochs)).with_seed(7)
}

fn solve(solver: &dyn Solver, model: &LinearRegression) -> (Vec<f32>, f32) {
    let initial = model.create_weights();
    let result = solver
        .solve(model, model, &initial, UNREACHABLE_LOSS)
        .unwrap();

    let loss = model.loss(&result.weights);
    let reported = result.final_loss().unwrap();
    assert!((reported - loss).abs() <= 1e-6 * loss.max(1.), "{reported} != {loss}");
    (result.weights, loss)
}

#[test]
fn sequential_fits_a_tiny_problem() {
    let model = corners();
    let solver = SequentialSgdSolver::new(config(500));

    let (weights, loss) = solve(&solver, &model);

    assert!(loss < 1e-6, "loss {loss}");
    for (w, expected) in weights.iter().zip([2., -1., 0.5]) {
        assert!((w - expected).abs() < 1e-2, "{weights:?}");
    }
}

#[test]
fn parallel_solvers_match_the_sequential_baseline() {
    const BAND: f32 = 1e-4;

    let model = grid();
    let numa = NumaConfig::single_node(2);

    let sequential = SequentialSgdSolver::new(config(400));
    let parallel =
        ParallelSgdSolver::new(config(400), nz(2), &numa, Box::new(NoBinding)).unwrap();
    let cluster = ClusterParallelSgdSolver::new(
        config(400),
        nz(2),
        nz(1),
        nz(16),
        &numa,
        Box::new(NoBinding),
    )
    .unwrap();
    assert_eq!(cluster.clusters().len(), 2);

    let (_, baseline) = solve(&sequential, &model);
    let (_, hogwild) = solve(&parallel, &model);
    let (_, ring) = solve(&cluster, &model);

    assert!(baseline < BAND, "sequential loss {baseline}");
    assert!((hogwild - baseline).abs() < BAND, "parallel loss {hogwild}");
    assert!((ring - baseline).abs() < BAND, "cluster loss {ring}");
}

#[test]
fn single_cluster_is_plain_hogwild() {
    let model = grid();
    let numa = NumaConfig::single_node(1);

    let parallel =
        ParallelSgdSolver::new(config(30), nz(1), &numa, Box::new(NoBinding)).unwrap();
    let cluster = ClusterParallelSgdSolver::new(
        config(30),
        nz(1),
        nz(1),
        nz(4),
        &numa,
        Box::new(NoBinding),
    )
    .unwrap();

    let (hogwild, _) = solve(&parallel, &model);
    let (ring, _) = solve(&cluster, &model);

    assert_eq!(hogwild, ring);
}

#[test]
fn rejects_mismatched_inputs() {
    let model = grid();
    let solver = SequentialSgdSolver::new(config(1));

    let err = solver.solve(&model, &model, &[0.; 2], 0.).unwrap_err();
    assert!(matches!(
        err,
        ring_sgd::SolverErr::WeightsMismatch {
            got: 2,
            expected: 3
        }
    ));
}
