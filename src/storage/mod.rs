mod error;
mod wild;

pub use error::{Result, SizeMismatchErr};
pub use wild::WildWeights;

/// Read access to a weight vector, regardless of how it is stored.
pub trait Weights {
    /// Returns the amount of slots in the vector.
    fn len(&self) -> usize;

    /// Returns the value at slot `i`.
    ///
    /// # Panics
    /// If `i` is out of bounds.
    fn get(&self, i: usize) -> f32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Weights for [f32] {
    #[inline]
    fn len(&self) -> usize {
        <[f32]>::len(self)
    }

    #[inline]
    fn get(&self, i: usize) -> f32 {
        self[i]
    }
}
