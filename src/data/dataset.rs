use super::{DataErr, Result};

/// A single labeled sample with a sparse feature vector.
///
/// Points are immutable once built and shared read-only by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    indices: Box<[u32]>,
    values: Box<[f32]>,
    label: f32,
}

impl DataPoint {
    /// Creates a new sparse `DataPoint`.
    ///
    /// # Arguments
    /// * `indices` - The feature indices with a non zero value.
    /// * `values` - The value of each feature in `indices`.
    /// * `label` - The expected output.
    ///
    /// # Returns
    /// A new `DataPoint` or a `DataErr` if `indices` and `values` have different lengths.
    pub fn sparse(indices: Vec<u32>, values: Vec<f32>, label: f32) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(DataErr::LengthMismatch {
                indices: indices.len(),
                values: values.len(),
            });
        }

        Ok(Self {
            indices: indices.into_boxed_slice(),
            values: values.into_boxed_slice(),
            label,
        })
    }

    /// Creates a `DataPoint` where every feature is present.
    pub fn dense(values: Vec<f32>, label: f32) -> Self {
        let indices = (0..values.len() as u32).collect();

        Self {
            indices,
            values: values.into_boxed_slice(),
            label,
        }
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn label(&self) -> f32 {
        self.label
    }

    /// Iterates over the `(feature index, value)` pairs of this point.
    #[inline]
    pub fn features(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices
            .iter()
            .zip(self.values.iter())
            .map(|(&i, &x)| (i as usize, x))
    }
}

/// An in-memory collection of data points.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    points: Vec<DataPoint>,
}

impl Dataset {
    pub fn new(points: Vec<DataPoint>) -> Self {
        Self { points }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// Returns the point at `idx` (panics if out of bounds).
    #[inline]
    pub fn get(&self, idx: usize) -> &DataPoint {
        &self.points[idx]
    }

    /// Returns the amount of features spanned by the dataset, that is the highest
    /// feature index plus one.
    pub fn features(&self) -> usize {
        self.points
            .iter()
            .flat_map(|p| p.indices().iter().copied())
            .max()
            .map_or(0, |max| max as usize + 1)
    }

    /// Splits the dataset in two, keeping the order of the points.
    ///
    /// # Arguments
    /// * `part` - The fraction of points that go to the first dataset.
    ///
    /// # Returns
    /// The `(first, second)` pair or a `DataErr` if `part` isn't inside `(0, 1)`.
    pub fn split(&self, part: f64) -> Result<(Dataset, Dataset)> {
        if !(part > 0. && part < 1.) {
            return Err(DataErr::InvalidSplit(part));
        }

        let n = (self.len() as f64 * part) as usize;
        let first = Dataset::new(self.points[..n].to_vec());
        let second = Dataset::new(self.points[n..].to_vec());
        Ok((first, second))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_rejects_length_mismatch() {
        assert!(DataPoint::sparse(vec![0, 1], vec![1.], 0.).is_err());
    }

    #[test]
    fn features_is_max_index_plus_one() {
        let points = vec![
            DataPoint::sparse(vec![0, 7], vec![1., 1.], 1.).unwrap(),
            DataPoint::dense(vec![1., 2.], 0.),
        ];

        assert_eq!(Dataset::new(points).features(), 8);
        assert_eq!(Dataset::default().features(), 0);
    }

    #[test]
    fn split_keeps_order() {
        let points = (0..10).map(|i| DataPoint::dense(vec![i as f32], 0.)).collect();
        let (train, test) = Dataset::new(points).split(0.8).unwrap();

        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert_eq!(test.get(0).values(), &[8.]);
    }

    #[test]
    fn split_rejects_invalid_fraction() {
        let dataset = Dataset::default();
        assert!(dataset.split(0.).is_err());
        assert!(dataset.split(1.).is_err());
    }
}
