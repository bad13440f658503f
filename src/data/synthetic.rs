//! Synthetic datasets for smoke runs and tests.

use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError, Uniform};

use super::{DataPoint, Dataset};

/// Generates a dense linear regression dataset `y = w·x + bias + noise`.
///
/// Features are drawn uniformly from `[-1, 1)`.
///
/// # Arguments
/// * `rng` - A random number generator.
/// * `n` - The amount of points to generate.
/// * `weights` - The true coefficients, one per feature.
/// * `bias` - The true intercept.
/// * `noise_std` - The standard deviation of the gaussian label noise.
///
/// # Returns
/// The dataset or a `NormalError` if `noise_std` is not finite.
pub fn linear<R: Rng>(
    rng: &mut R,
    n: usize,
    weights: &[f32],
    bias: f32,
    noise_std: f32,
) -> Result<Dataset, NormalError> {
    let noise = Normal::new(0., noise_std)?;
    let Ok(features) = Uniform::new(-1f32, 1.) else {
        unreachable!("[-1, 1) is a valid range");
    };

    let points = (0..n)
        .map(|_| {
            let x: Vec<f32> = weights.iter().map(|_| features.sample(rng)).collect();
            let y = x.iter().zip(weights).map(|(x, w)| x * w).sum::<f32>() + bias;
            DataPoint::dense(x, y + noise.sample(rng))
        })
        .collect();

    Ok(Dataset::new(points))
}
