mod linear;
mod logistic;
mod multiclass;

pub use linear::LinearRegression;
pub use logistic::LogisticRegression;
pub use multiclass::MulticlassLogisticRegression;

use rayon::prelude::*;

use crate::{
    data::{DataPoint, Dataset},
    storage::{Weights, WildWeights},
};

/// A loss function over a dataset, able to take single point gradient steps.
///
/// A model owns no weights. Workers own a scratch buffer of `scratch_len` entries,
/// sized once when they spawn, and lend it to every call that needs temporary space.
pub trait Model: Sync {
    /// Returns the dataset this model evaluates.
    fn dataset(&self) -> &Dataset;

    /// Returns the length of the weight vector this model works with.
    fn size(&self) -> usize;

    /// Returns the length of the per-worker scratch buffer.
    fn scratch_len(&self) -> usize {
        0
    }

    /// Computes the loss of a single point.
    ///
    /// # Arguments
    /// * `point` - The data point to evaluate.
    /// * `weights` - The model's weights.
    /// * `scratch` - A buffer of `scratch_len` entries.
    fn point_loss(&self, point: &DataPoint, weights: &[f32], scratch: &mut [f32]) -> f32;

    /// Takes a gradient step over a single point, **`weights` get updated in place**.
    ///
    /// The weights may be concurrently updated by other workers, implementations must
    /// only touch the slots the point's features map to.
    ///
    /// # Arguments
    /// * `point` - The data point to learn from.
    /// * `weights` - The shared weights.
    /// * `learning_rate` - The length of the step.
    /// * `scratch` - A buffer of `scratch_len` entries.
    fn gradient_step(
        &self,
        point: &DataPoint,
        weights: &WildWeights,
        learning_rate: f32,
        scratch: &mut [f32],
    );

    /// Computes the mean loss over the whole dataset.
    fn loss(&self, weights: &[f32]) -> f32 {
        let points = self.dataset().points();
        if points.is_empty() {
            return 0.;
        }

        let total: f64 = points
            .par_iter()
            .map_init(
                || vec![0.; self.scratch_len()],
                |scratch, p| self.point_loss(p, weights, scratch) as f64,
            )
            .sum();

        (total / points.len() as f64) as f32
    }

    /// Returns a zeroed weight vector of the model's dimensionality.
    fn create_weights(&self) -> Vec<f32> {
        vec![0.; self.size()]
    }
}

/// Computes `w[offset..offset + block - 1]·x + w[offset + block - 1]`, a linear form
/// whose bias sits in the last slot of its block.
#[inline]
fn affine<W: Weights + ?Sized>(weights: &W, offset: usize, block: usize, point: &DataPoint) -> f32 {
    let dot: f32 = point
        .features()
        .map(|(i, x)| x * weights.get(offset + i))
        .sum();

    dot + weights.get(offset + block - 1)
}

/// Applies `w -= coef * x` over a block, bias included.
#[inline]
fn descend(weights: &WildWeights, offset: usize, block: usize, point: &DataPoint, coef: f32) {
    for (i, x) in point.features() {
        weights.add(offset + i, -x * coef);
    }
    weights.add(offset + block - 1, -coef);
}
