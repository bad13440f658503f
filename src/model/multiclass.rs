use super::{Model, affine, descend};
use crate::{
    data::{DataPoint, Dataset},
    storage::{Weights, WildWeights},
};

/// Multinomial logistic regression over `classes` classes, evaluated with the 0/1 loss.
///
/// The last class is the reference one, so the weights hold `classes - 1` blocks of
/// `features + 1` entries each (coefficients followed by the bias). Labels are the
/// class index.
#[derive(Debug, Clone)]
pub struct MulticlassLogisticRegression {
    dataset: Dataset,
    classes: usize,
    block: usize,
}

impl MulticlassLogisticRegression {
    /// Creates a new `MulticlassLogisticRegression`.
    ///
    /// # Arguments
    /// * `dataset` - The points to classify.
    /// * `classes` - The amount of classes, at least two.
    /// * `features` - The amount of features, must cover every index in `dataset`.
    ///
    /// # Panics
    /// If `classes` is lower than two.
    pub fn new(dataset: Dataset, classes: usize, features: usize) -> Self {
        assert!(classes >= 2, "a classifier needs at least two classes");

        Self {
            dataset,
            classes,
            block: features + 1,
        }
    }

    /// Writes the probability of each non reference class into `probs`.
    fn probabilities<W: Weights + ?Sized>(
        &self,
        weights: &W,
        point: &DataPoint,
        probs: &mut [f32],
    ) {
        let mut sum = 1.;
        for (c, p) in probs.iter_mut().enumerate() {
            *p = affine(weights, c * self.block, self.block, point).exp();
            sum += *p;
        }

        probs.iter_mut().for_each(|p| *p /= sum);
    }

    /// Predicts the class of `point`.
    ///
    /// # Arguments
    /// * `point` - The point to classify.
    /// * `weights` - The model's weights.
    /// * `scratch` - A buffer of `classes - 1` entries.
    pub fn predict(&self, point: &DataPoint, weights: &[f32], scratch: &mut [f32]) -> f32 {
        self.probabilities(weights, point, scratch);

        let reference = 1. - scratch.iter().sum::<f32>();
        let (best, best_prob) = scratch
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |(bi, bp), (i, &p)| if p > bp { (i, p) } else { (bi, bp) });

        if reference > best_prob {
            (self.classes - 1) as f32
        } else {
            best as f32
        }
    }
}

impl Model for MulticlassLogisticRegression {
    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn size(&self) -> usize {
        (self.classes - 1) * self.block
    }

    fn scratch_len(&self) -> usize {
        self.classes - 1
    }

    fn point_loss(&self, point: &DataPoint, weights: &[f32], scratch: &mut [f32]) -> f32 {
        if self.predict(point, weights, scratch) == point.label() { 0. } else { 1. }
    }

    fn gradient_step(
        &self,
        point: &DataPoint,
        weights: &WildWeights,
        learning_rate: f32,
        scratch: &mut [f32],
    ) {
        self.probabilities(weights, point, scratch);

        let k = point.label() as usize;
        if let Some(p) = scratch.get_mut(k) {
            *p -= 1.;
        }

        for (c, &p) in scratch.iter().enumerate() {
            descend(weights, c * self.block, self.block, point, learning_rate * p);
        }
    }
}
