use std::{env, fs::File, io, io::BufReader, num::NonZeroUsize};

use log::info;
use rand::{SeedableRng, rngs::StdRng};

use ring_sgd::{
    NumaConfig, SolverBuilder,
    data::synthetic,
    model::{LinearRegression, Model},
    specs::{SolverSpec, StrategySpec},
};

const POINTS: usize = 20_000;
const TRUE_WEIGHTS: [f32; 4] = [1.5, -2., 0.5, 3.];
const TRUE_BIAS: f32 = 0.25;
const NOISE_STD: f32 = 0.1;
const TARGET_LOSS: f32 = 0.006;

fn default_spec(numa: &NumaConfig) -> SolverSpec {
    let threads = NonZeroUsize::new(numa.total_cores().min(4)).unwrap_or(NonZeroUsize::MIN);

    SolverSpec {
        strategy: StrategySpec::Parallel { threads },
        learning_rate: 0.01,
        step_decay: 0.9,
        max_epochs: NonZeroUsize::new(50).unwrap_or(NonZeroUsize::MIN),
        sampling: Default::default(),
        monitor_interval_ms: 50,
        seed: Some(42),
        record_weights: false,
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let numa = NumaConfig::detect();
    info!(nodes = numa.nodes().len(), cores = numa.total_cores(); "topology detected");

    let spec = match env::args().nth(1) {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None => default_spec(&numa),
    };

    let solver = SolverBuilder::new(numa).build(&spec)?;

    let mut rng = StdRng::seed_from_u64(spec.seed.unwrap_or(0));
    let dataset = synthetic::linear(&mut rng, POINTS, &TRUE_WEIGHTS, TRUE_BIAS, NOISE_STD)
        .map_err(io::Error::other)?;
    let (train, test) = dataset.split(0.8).map_err(io::Error::other)?;

    let features = TRUE_WEIGHTS.len();
    let train = LinearRegression::new(train, features);
    let test = LinearRegression::new(test, features);

    let initial = train.create_weights();
    let result = solver.solve(&train, &test, &initial, TARGET_LOSS)?;

    info!(
        solver = solver.name(),
        samples = result.trace.len(),
        loss = result.final_loss().unwrap_or(f32::NAN);
        "done"
    );
    info!("weights: {:?}", result.weights);

    Ok(())
}
