use std::sync::atomic::{AtomicU32, Ordering};

use super::{Result, SizeMismatchErr, Weights};

/// A dense weight vector updated by many threads without locks.
///
/// It embraces race conditions: workers read and write individual slots
/// simultaneously and updates from different threads may overwrite each other.
/// Every slot is an `AtomicU32` holding the bits of an `f32`, so racing accesses are
/// well defined, but apart from `fetch_add` **no operation is synchronized**:
/// `add` is a plain load followed by a plain store.
///
/// `fetch_add` is the only true read-modify-write. It's meant for writers that are
/// foreign to the threads doing the in place updates and can't afford to lose their
/// contribution.
#[derive(Debug)]
pub struct WildWeights {
    slots: Box<[AtomicU32]>,
}

impl WildWeights {
    /// Creates a new `WildWeights` vector.
    ///
    /// # Arguments
    /// * `weights` - The initial state of the weights.
    ///
    /// # Returns
    /// A new `WildWeights` instance.
    pub fn from_slice(weights: &[f32]) -> Self {
        let slots = weights.iter().map(|w| AtomicU32::new(w.to_bits())).collect();
        Self { slots }
    }

    /// Creates a zeroed `WildWeights` vector of `len` slots.
    pub fn zeros(len: usize) -> Self {
        let slots = (0..len).map(|_| AtomicU32::new(0f32.to_bits())).collect();
        Self { slots }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reads slot `i`.
    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        f32::from_bits(self.slots[i].load(Ordering::Relaxed))
    }

    /// Overwrites slot `i` with `value`.
    #[inline]
    pub fn set(&self, i: usize, value: f32) {
        self.slots[i].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Adds `delta` to slot `i` without synchronization.
    ///
    /// A concurrent writer of the same slot may have its update overwritten, this is the
    /// Hogwild contract and the reason this is cheap.
    #[inline]
    pub fn add(&self, i: usize, delta: f32) {
        let slot = &self.slots[i];
        let value = f32::from_bits(slot.load(Ordering::Relaxed)) + delta;
        slot.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Atomically adds `delta` to slot `i`.
    ///
    /// # Returns
    /// The value the slot held right before the addition.
    #[inline]
    pub fn fetch_add(&self, i: usize, delta: f32) -> f32 {
        let slot = &self.slots[i];
        let mut current = slot.load(Ordering::Relaxed);

        loop {
            let next = (f32::from_bits(current) + delta).to_bits();
            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(prev) => return f32::from_bits(prev),
                Err(actual) => current = actual,
            }
        }
    }

    /// Copies the weights into the provided destination buffer.
    ///
    /// Concurrent writers may be mid-update, the snapshot is only eventually consistent.
    ///
    /// # Arguments
    /// * `out` - A mutable slice where the weights will be copied.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if `out` isn't the same size as this vector.
    pub fn pull(&self, out: &mut [f32]) -> Result<()> {
        if self.len() != out.len() {
            return Err(SizeMismatchErr {
                got: out.len(),
                expected: self.len(),
            });
        }

        out.iter_mut()
            .zip(self.slots.iter())
            .for_each(|(o, slot)| *o = f32::from_bits(slot.load(Ordering::Relaxed)));

        Ok(())
    }

    /// Returns an owned snapshot of the weights.
    pub fn to_vec(&self) -> Vec<f32> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}

impl Weights for WildWeights {
    #[inline]
    fn len(&self) -> usize {
        self.len()
    }

    #[inline]
    fn get(&self, i: usize) -> f32 {
        self.get(i)
    }
}
