use super::{Model, affine, descend};
use crate::{
    data::{DataPoint, Dataset},
    storage::WildWeights,
};

/// Least squares linear regression, `loss = (w·x + b - y)² / 2`.
///
/// The weight vector holds one coefficient per feature followed by the bias.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    dataset: Dataset,
    features: usize,
}

impl LinearRegression {
    /// Creates a new `LinearRegression`.
    ///
    /// # Arguments
    /// * `dataset` - The points to fit.
    /// * `features` - The amount of features, must cover every index in `dataset`.
    pub fn new(dataset: Dataset, features: usize) -> Self {
        Self { dataset, features }
    }

    fn block(&self) -> usize {
        self.features + 1
    }
}

impl Model for LinearRegression {
    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn size(&self) -> usize {
        self.block()
    }

    fn point_loss(&self, point: &DataPoint, weights: &[f32], _: &mut [f32]) -> f32 {
        let err = affine(weights, 0, self.block(), point) - point.label();
        err * err / 2.
    }

    fn gradient_step(
        &self,
        point: &DataPoint,
        weights: &WildWeights,
        learning_rate: f32,
        _: &mut [f32],
    ) {
        let err = affine(weights, 0, self.block(), point) - point.label();
        descend(weights, 0, self.block(), point, learning_rate * err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> LinearRegression {
        let dataset = Dataset::new(vec![
            DataPoint::dense(vec![1., 0.], 3.),
            DataPoint::dense(vec![0., 1.], -1.),
        ]);
        LinearRegression::new(dataset, 2)
    }

    #[test]
    fn loss_at_zero_weights() {
        let model = model();
        // ((3)² / 2 + (1)² / 2) / 2
        assert!((model.loss(&model.create_weights()) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn gradient_step_moves_towards_label() {
        let model = model();
        let weights = WildWeights::zeros(model.size());
        let point = model.dataset().get(0);

        model.gradient_step(point, &weights, 0.5, &mut []);

        // err = -3, step = 0.5 * -3 => w0 += 1.5, b += 1.5
        assert_eq!(weights.to_vec(), vec![1.5, 0., 1.5]);
    }
}
