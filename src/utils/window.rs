use std::f32::consts::PI;

use assume::assume;

use crate::{utils::zeroed_buffer, Error};

// -------------------------------------------------------------------------------------------------

/// Precomputed, immutable Hann window lookup table for grain envelopes.
///
/// The table is built once, off the audio thread, and then shared read-only via an `Arc`
/// between all engines which need it. Lookups linearly interpolate between the table entries.
#[derive(Debug, Clone)]
pub struct WindowTable {
    table: Box<[f32]>,
}

impl WindowTable {
    /// Default number of table entries.
    pub const DEFAULT_SIZE: usize = 4096;
    /// Smallest valid number of table entries.
    pub const MIN_SIZE: usize = 2;

    /// Create a new Hann window table with the given number of entries.
    pub fn new(size: usize) -> Result<Self, Error> {
        if size < Self::MIN_SIZE {
            return Err(Error::ParameterError(format!(
                "Window table size must be >= {}, but is {size}",
                Self::MIN_SIZE
            )));
        }
        let mut table = zeroed_buffer::<f32>(size)?;
        hann_window(&mut table, false);
        Ok(Self {
            table: table.into_boxed_slice(),
        })
    }

    /// Number of table entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Always false: tables have at least `MIN_SIZE` entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Evaluate the window at the given normalized phase. Phases outside of \[0, 1\] are clamped.
    #[inline]
    pub fn lookup(&self, phase: f32) -> f32 {
        let len = self.table.len();
        assume!(unsafe: len >= Self::MIN_SIZE, "table size is checked in constructor");

        let max_index = len - 1;
        let index_float = phase.clamp(0.0, 1.0) * max_index as f32;
        let index = (index_float as usize).min(max_index - 1);
        let fraction = index_float - index as f32;

        assume!(unsafe: index + 1 < len);
        let a = self.table[index];
        let b = self.table[index + 1];
        a + (b - a) * fraction
    }
}

impl Default for WindowTable {
    fn default() -> Self {
        let mut table = vec![0.0; Self::DEFAULT_SIZE];
        hann_window(&mut table, false);
        Self {
            table: table.into_boxed_slice(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Fill the given buffer with a Hann window.
///
/// A symmetric window starts and ends with zero. A periodic window omits the trailing zero,
/// which is what overlap-add analysis and synthesis needs.
pub fn hann_window(buffer: &mut [f32], periodic: bool) {
    let len = buffer.len();
    if len <= 1 {
        buffer.fill(1.0);
        return;
    }
    let denominator = if periodic { len } else { len - 1 } as f32;
    for (i, w) in buffer.iter_mut().enumerate() {
        *w = 0.5 * (1.0 - (2.0 * PI * i as f32 / denominator).cos());
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup() {
        let window = WindowTable::default();
        assert_eq!(window.len(), WindowTable::DEFAULT_SIZE);
        assert!(window.lookup(0.0).abs() < 1e-6);
        assert!(window.lookup(1.0).abs() < 1e-6);
        assert!((window.lookup(0.5) - 1.0).abs() < 1e-5);
        // symmetric
        for phase in [0.1, 0.25, 0.33, 0.4] {
            assert!((window.lookup(phase) - window.lookup(1.0 - phase)).abs() < 1e-4);
        }
        // clamped
        assert_eq!(window.lookup(-1.0), window.lookup(0.0));
        assert_eq!(window.lookup(2.0), window.lookup(1.0));
    }

    #[test]
    fn table_interpolates() {
        let window = WindowTable::new(3).unwrap(); // [0, 1, 0]
        assert!((window.lookup(0.25) - 0.5).abs() < 1e-6);
        assert!((window.lookup(0.75) - 0.5).abs() < 1e-6);
        assert!(WindowTable::new(1).is_err());
    }

    #[test]
    fn periodic_hann_sums_to_constant() {
        // periodic Hann at 75% overlap sums to 2.0, its square to 1.5
        let mut window = [0.0; 64];
        hann_window(&mut window, true);
        let hop = 16;
        for offset in 0..hop {
            let sum: f32 = (0..4).map(|k| window[offset + k * hop]).sum();
            let sum_sq: f32 = (0..4).map(|k| window[offset + k * hop].powi(2)).sum();
            assert!((sum - 2.0).abs() < 1e-5);
            assert!((sum_sq - 1.5).abs() < 1e-5);
        }
    }
}
