use std::sync::Arc;

use realfft::{num_complex::Complex, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{utils::zeroed_buffer, Error};

// -------------------------------------------------------------------------------------------------

/// Power of two sized forward and inverse real FFT with preallocated work buffers.
///
/// None of the transform functions allocate, so they can be used in real-time threads.
/// The inverse transform is unnormalized: `inverse(forward(x)) == size * x`.
pub struct FftTransform {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FftTransform {
    /// Smallest supported FFT size.
    pub const MIN_SIZE: usize = 16;
    /// Largest supported FFT size.
    pub const MAX_SIZE: usize = 1 << 16;

    /// Plan a new transform of the given size. `size` must be a power of two.
    pub fn new(size: usize) -> Result<Self, Error> {
        if !size.is_power_of_two() || !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(Error::ParameterError(format!(
                "FFT size must be a power of two in range {}..={}, but is {size}",
                Self::MIN_SIZE,
                Self::MAX_SIZE
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_scratch_len()
            .max(inverse.get_scratch_len());
        Ok(Self {
            size,
            forward,
            inverse,
            input: zeroed_buffer(size)?,
            spectrum: zeroed_buffer(size / 2 + 1)?,
            scratch: zeroed_buffer(scratch_len)?,
        })
    }

    /// Number of time domain samples.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of frequency bins: `size / 2 + 1`.
    pub fn bin_count(&self) -> usize {
        self.size / 2 + 1
    }

    /// Forward transform `size` real samples into `bin_count` complex bins.
    /// The input is left untouched.
    pub fn forward(&mut self, input: &[f32], spectrum: &mut [Complex<f32>]) -> Result<(), Error> {
        if input.len() != self.size {
            return Err(realfft::FftError::InputBuffer(self.size, input.len()).into());
        }
        self.input.copy_from_slice(input);
        self.forward
            .process_with_scratch(&mut self.input, spectrum, &mut self.scratch)?;
        Ok(())
    }

    /// Inverse transform `bin_count` complex bins into `size` real samples.
    /// The imaginary parts of the DC and Nyquist bins are ignored.
    pub fn inverse(&mut self, spectrum: &[Complex<f32>], output: &mut [f32]) -> Result<(), Error> {
        if spectrum.len() != self.bin_count() {
            return Err(realfft::FftError::InputBuffer(self.bin_count(), spectrum.len()).into());
        }
        self.spectrum.copy_from_slice(spectrum);
        let last = self.spectrum.len() - 1;
        self.spectrum[0].im = 0.0;
        self.spectrum[last].im = 0.0;
        self.inverse
            .process_with_scratch(&mut self.spectrum, output, &mut self.scratch)?;
        Ok(())
    }

    /// Multiply the given buffer sample by sample with a window.
    pub fn apply_window(buffer: &mut [f32], window: &[f32]) {
        for (s, w) in buffer.iter_mut().zip(window) {
            *s *= *w;
        }
    }

    /// Convert complex bins to magnitudes and phases in range \[-π, π\].
    pub fn to_polar(spectrum: &[Complex<f32>], magnitude: &mut [f32], phase: &mut [f32]) {
        for ((bin, m), p) in spectrum.iter().zip(magnitude.iter_mut()).zip(phase.iter_mut()) {
            *m = bin.norm();
            *p = bin.arg();
        }
    }

    /// Convert magnitudes and phases back to complex bins.
    pub fn from_polar(magnitude: &[f32], phase: &[f32], spectrum: &mut [Complex<f32>]) {
        for ((bin, m), p) in spectrum.iter_mut().zip(magnitude).zip(phase) {
            *bin = Complex::from_polar(*m, *p);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    #[test]
    fn invalid_sizes() {
        assert!(FftTransform::new(0).is_err());
        assert!(FftTransform::new(1000).is_err());
        assert!(FftTransform::new(8).is_err());
        assert!(FftTransform::new(2048).is_ok());
    }

    #[test]
    fn round_trip() {
        let mut rng = SmallRng::seed_from_u64(1);
        for size in [16, 256, 2048] {
            let mut fft = FftTransform::new(size).unwrap();
            let input = (0..size)
                .map(|_| rng.random_range(-1.0f32..=1.0))
                .collect::<Vec<_>>();
            let mut spectrum = vec![Complex::default(); fft.bin_count()];
            let mut output = vec![0.0; size];
            fft.forward(&input, &mut spectrum).unwrap();
            fft.inverse(&spectrum, &mut output).unwrap();
            let scale = 1.0 / size as f32;
            for (x, y) in input.iter().zip(output.iter()) {
                assert!((x - y * scale).abs() <= 1e-4 * x.abs().max(1.0));
            }
        }
    }

    #[test]
    fn polar_round_trip() {
        let spectrum = [
            Complex::new(1.0, 0.0),
            Complex::new(0.0, -2.0),
            Complex::new(-3.0, 4.0),
        ];
        let (mut magnitude, mut phase) = ([0.0; 3], [0.0; 3]);
        FftTransform::to_polar(&spectrum, &mut magnitude, &mut phase);
        assert_eq!(magnitude, [1.0, 2.0, 5.0]);
        assert!(phase.iter().all(|p| p.abs() <= std::f32::consts::PI));

        let mut back = [Complex::default(); 3];
        FftTransform::from_polar(&magnitude, &phase, &mut back);
        for (a, b) in spectrum.iter().zip(back.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn wrong_buffer_sizes_fail() {
        let mut fft = FftTransform::new(16).unwrap();
        let mut spectrum = vec![Complex::default(); 9];
        assert!(fft.forward(&[0.0; 8], &mut spectrum).is_err());
        let mut output = [0.0; 16];
        assert!(fft.inverse(&spectrum[..4], &mut output).is_err());
    }
}
