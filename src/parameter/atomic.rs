use std::sync::atomic::{AtomicU32, Ordering};

// -------------------------------------------------------------------------------------------------

/// A `f32` which can be shared and mutated across threads without locks.
///
/// Stores the float's bit pattern in an [`AtomicU32`]. Loads and stores are relaxed: parameter
/// values are independent of each other and are only required to become visible eventually,
/// with the last write winning.
#[derive(Debug, Default)]
pub struct AtomicFloat(AtomicU32);

impl AtomicFloat {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Store a new value and return the previous one.
    #[inline]
    pub fn swap(&self, value: f32) -> f32 {
        f32::from_bits(self.0.swap(value.to_bits(), Ordering::Relaxed))
    }
}

impl From<f32> for AtomicFloat {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_store() {
        let value = AtomicFloat::new(0.25);
        assert_eq!(value.load(), 0.25);
        value.store(-3.5);
        assert_eq!(value.load(), -3.5);
        assert_eq!(value.swap(1.0), -3.5);
        assert_eq!(value.load(), 1.0);
        // bit patterns survive as is
        value.store(f32::NEG_INFINITY);
        assert_eq!(value.load(), f32::NEG_INFINITY);
    }
}
