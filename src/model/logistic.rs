use super::{Model, affine, descend};
use crate::{
    data::{DataPoint, Dataset},
    storage::WildWeights,
};

/// Binary logistic regression, evaluated with the 0/1 misclassification loss.
///
/// Labels are expected to be `0` or `1`. The weight vector holds one coefficient per
/// feature followed by the bias.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    dataset: Dataset,
    features: usize,
}

impl LogisticRegression {
    /// Creates a new `LogisticRegression`.
    ///
    /// # Arguments
    /// * `dataset` - The points to classify.
    /// * `features` - The amount of features, must cover every index in `dataset`.
    pub fn new(dataset: Dataset, features: usize) -> Self {
        Self { dataset, features }
    }

    fn block(&self) -> usize {
        self.features + 1
    }

    /// Predicts the class of `point`.
    pub fn predict(&self, point: &DataPoint, weights: &[f32]) -> f32 {
        if affine(weights, 0, self.block(), point) >= 0. { 1. } else { 0. }
    }
}

impl Model for LogisticRegression {
    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn size(&self) -> usize {
        self.block()
    }

    fn point_loss(&self, point: &DataPoint, weights: &[f32], _: &mut [f32]) -> f32 {
        (point.label() - self.predict(point, weights)).abs()
    }

    fn gradient_step(
        &self,
        point: &DataPoint,
        weights: &WildWeights,
        learning_rate: f32,
        _: &mut [f32],
    ) {
        let z = affine(weights, 0, self.block(), point);
        let sigmoid = 1. / (1. + (-z).exp());
        descend(weights, 0, self.block(), point, learning_rate * (sigmoid - point.label()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_a_separable_problem() {
        let dataset = Dataset::new(vec![
            DataPoint::dense(vec![2.], 1.),
            DataPoint::dense(vec![-2.], 0.),
        ]);
        let model = LogisticRegression::new(dataset, 1);
        let weights = WildWeights::zeros(model.size());

        for _ in 0..50 {
            for p in model.dataset().points() {
                model.gradient_step(p, &weights, 0.5, &mut []);
            }
        }

        assert_eq!(model.loss(&weights.to_vec()), 0.);
    }
}
