//! Per-bin spectral transforms, operating on magnitude and phase slices of a single frame.

use std::f32::consts::{PI, TAU};

use crate::{utils::zeroed_buffer, Error};

// -------------------------------------------------------------------------------------------------

/// Largest blur radius in bins, reached at a blur amount of 1.
pub const MAX_BLUR_RADIUS: f32 = 10.0;

/// Phase increment in radians which frozen bins advance by per frame.
pub const FREEZE_PHASE_INCREMENT: f32 = 0.01;

// -------------------------------------------------------------------------------------------------

/// Wrap the given phase into its principal argument range \[-π, π\].
#[inline]
pub fn wrap_phase(phase: f32) -> f32 {
    phase - TAU * (phase / TAU).round()
}

/// Linearly resample an arbitrary length mask onto `output.len()` bins, clamping all mask
/// values into range \[0, 1\].
///
/// An empty mask leaves `output` untouched, a single value mask is applied uniformly.
pub fn resample_mask(mask: &[f32], output: &mut [f32]) {
    match mask.len() {
        0 => (),
        1 => output.fill(mask[0].clamp(0.0, 1.0)),
        mask_len => {
            let last = output.len().saturating_sub(1).max(1) as f32;
            let step = (mask_len - 1) as f32 / last;
            for (index, value) in output.iter_mut().enumerate() {
                let position = index as f32 * step;
                let left = (position as usize).min(mask_len - 1);
                let right = (left + 1).min(mask_len - 1);
                let fraction = position - left as f32;
                let resampled = mask[left] + (mask[right] - mask[left]) * fraction;
                *value = resampled.clamp(0.0, 1.0);
            }
        }
    }
}

/// Reduce a row-major `width x height` image of brightness values to one mask value per row,
/// so that the bottom row maps to the lowest frequency bin.
///
/// Returns false and leaves `rows` untouched when the dimensions don't match the data.
pub fn image_rows_to_mask(data: &[f32], width: usize, height: usize, rows: &mut Vec<f32>) -> bool {
    if width == 0 || height == 0 || width.checked_mul(height) != Some(data.len()) {
        return false;
    }
    rows.clear();
    rows.extend(
        data.chunks_exact(width)
            .rev()
            .map(|row| row.iter().sum::<f32>() / width as f32),
    );
    true
}

/// Multiply magnitudes with the given, already resampled mask.
pub fn apply_mask(magnitude: &mut [f32], mask: &[f32]) {
    for (m, v) in magnitude.iter_mut().zip(mask) {
        *m *= *v;
    }
}

/// Smear magnitudes across neighbouring bins with a `1 / (1 + |offset|)` weight and a radius
/// of up to [`MAX_BLUR_RADIUS`] bins (truncated, so amounts below 0.1 don't blur), then crossfade original and blurred magnitudes by `amount`.
///
/// `scratch` must be at least as long as `magnitude`.
pub fn blur(magnitude: &mut [f32], scratch: &mut [f32], amount: f32) {
    let amount = amount.clamp(0.0, 1.0);
    let radius = (amount * MAX_BLUR_RADIUS) as isize;
    if radius == 0 {
        return;
    }
    let bins = magnitude.len();
    let original = &mut scratch[..bins];
    original.copy_from_slice(magnitude);
    for (bin, value) in magnitude.iter_mut().enumerate() {
        let mut sum = 0.0;
        let mut weights = 0.0;
        for offset in -radius..=radius {
            let neighbour = bin as isize + offset;
            if neighbour < 0 || neighbour >= bins as isize {
                continue;
            }
            let weight = 1.0 / (1.0 + offset.unsigned_abs() as f32);
            sum += original[neighbour as usize] * weight;
            weights += weight;
        }
        let blurred = sum / weights;
        *value = original[bin] + (blurred - original[bin]) * amount;
    }
}

/// Warp magnitudes along the bin axis by `2^(semitones / 12)` with linear interpolation.
/// Phases are left untouched. Bins which map beyond the spectrum get silenced.
///
/// `scratch` must be at least as long as `magnitude`.
pub fn formant_shift(magnitude: &mut [f32], scratch: &mut [f32], semitones: f32) {
    if semitones == 0.0 {
        return;
    }
    let factor = 2.0f32.powf(semitones / 12.0);
    let bins = magnitude.len();
    let original = &mut scratch[..bins];
    original.copy_from_slice(magnitude);
    for (bin, value) in magnitude.iter_mut().enumerate() {
        let position = bin as f32 / factor;
        let left = position as usize;
        if left + 1 >= bins {
            *value = if left < bins { original[left] } else { 0.0 };
            continue;
        }
        let fraction = position - left as f32;
        *value = original[left] + (original[left + 1] - original[left]) * fraction;
    }
}

// -------------------------------------------------------------------------------------------------

/// Accumulates phases of a frozen spectrum. Magnitudes are never touched, so a frozen spectrum
/// still follows the input's spectral envelope, but loses its measured phase motion.
pub struct SpectralFreeze {
    phase: Box<[f32]>,
    active: bool,
}

impl SpectralFreeze {
    pub fn new(bins: usize) -> Result<Self, Error> {
        Ok(Self {
            phase: zeroed_buffer(bins)?.into_boxed_slice(),
            active: false,
        })
    }

    /// True while phases get accumulated instead of measured.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Process a frame's phases. When `enabled`, replaces each bin's phase with an accumulator
    /// which advances by [`FREEZE_PHASE_INCREMENT`] per frame. Else tracks the measured phases,
    /// so a new freeze continues from the most recent phase of each bin.
    pub fn process(&mut self, phase: &mut [f32], enabled: bool) {
        self.active = enabled;
        if !enabled {
            self.phase.copy_from_slice(phase);
            return;
        }
        for (accumulated, p) in self.phase.iter_mut().zip(phase.iter_mut()) {
            *accumulated = wrap_phase(*accumulated + FREEZE_PHASE_INCREMENT);
            *p = *accumulated;
        }
    }

    pub fn reset(&mut self) {
        self.phase.fill(0.0);
        self.active = false;
    }
}

// -------------------------------------------------------------------------------------------------

/// Phase vocoder pitch shifter: estimates each bin's true frequency from the phase difference
/// to the previous frame, moves it to the bin at `bin * ratio` and re-accumulates the phases.
pub struct PhaseVocoder {
    previous_phase: Box<[f32]>,
    phase_sum: Box<[f32]>,
    analysis_frequency: Box<[f32]>,
    synthesis_magnitude: Box<[f32]>,
    synthesis_frequency: Box<[f32]>,
    /// Expected phase advance of bin 1 per hop.
    expected_advance: f32,
    /// fft_size / hop_size
    oversampling: f32,
}

impl PhaseVocoder {
    pub fn new(fft_size: usize, hop_size: usize) -> Result<Self, Error> {
        let bins = fft_size / 2 + 1;
        Ok(Self {
            previous_phase: zeroed_buffer(bins)?.into_boxed_slice(),
            phase_sum: zeroed_buffer(bins)?.into_boxed_slice(),
            analysis_frequency: zeroed_buffer(bins)?.into_boxed_slice(),
            synthesis_magnitude: zeroed_buffer(bins)?.into_boxed_slice(),
            synthesis_frequency: zeroed_buffer(bins)?.into_boxed_slice(),
            expected_advance: TAU * hop_size as f32 / fft_size as f32,
            oversampling: fft_size as f32 / hop_size as f32,
        })
    }

    /// Track phases of a frame which is not getting shifted, so switching to a shift later on
    /// continues without phase jumps.
    pub fn track(&mut self, phase: &[f32]) {
        self.previous_phase.copy_from_slice(phase);
        self.phase_sum.copy_from_slice(phase);
    }

    /// Shift the frame's bins by the given pitch ratio in place.
    pub fn process(&mut self, magnitude: &mut [f32], phase: &mut [f32], ratio: f32) {
        let bins = magnitude.len();

        // analysis: true frequency in (fractional) bins
        for bin in 0..bins {
            let delta = phase[bin] - self.previous_phase[bin];
            self.previous_phase[bin] = phase[bin];
            let deviation = wrap_phase(delta - bin as f32 * self.expected_advance);
            self.analysis_frequency[bin] = bin as f32 + deviation * self.oversampling / TAU;
        }

        // shift
        self.synthesis_magnitude.fill(0.0);
        self.synthesis_frequency.fill(0.0);
        for bin in 0..bins {
            let target = (bin as f32 * ratio).round() as usize;
            if target < bins {
                self.synthesis_magnitude[target] += magnitude[bin];
                self.synthesis_frequency[target] = self.analysis_frequency[bin] * ratio;
            }
        }

        // synthesis: accumulate phases from the shifted frequencies
        for bin in 0..bins {
            let deviation = self.synthesis_frequency[bin] - bin as f32;
            let advance = deviation * TAU / self.oversampling + bin as f32 * self.expected_advance;
            self.phase_sum[bin] = wrap_phase(self.phase_sum[bin] + advance);
            magnitude[bin] = self.synthesis_magnitude[bin];
            phase[bin] = self.phase_sum[bin];
        }
    }

    pub fn reset(&mut self) {
        self.previous_phase.fill(0.0);
        self.phase_sum.fill(0.0);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_wrapping() {
        for phase in [-100.0, -7.0, -PI, 0.0, 1.0, PI, 4.0, 50.0f32] {
            let wrapped = wrap_phase(phase);
            assert!((-PI - 1e-5..=PI + 1e-5).contains(&wrapped));
            // same angle
            assert!((wrapped.sin() - phase.sin()).abs() < 1e-3);
            assert!((wrapped.cos() - phase.cos()).abs() < 1e-3);
        }
    }

    #[test]
    fn mask_resampling() {
        for bins in [1, 2, 5, 1025] {
            let mut output = vec![0.0; bins];
            resample_mask(&[0.25], &mut output);
            assert!(output.iter().all(|v| *v == 0.25));
            resample_mask(&[], &mut output);
            assert!(output.iter().all(|v| *v == 0.25));
        }

        let mut output = [0.0; 5];
        resample_mask(&[0.0, 1.0], &mut output);
        assert_eq!(output, [0.0, 0.25, 0.5, 0.75, 1.0]);

        resample_mask(&[-1.0, 2.0, 0.5], &mut output);
        assert_eq!(output[0], 0.0);
        assert_eq!(output[2], 1.0);
        assert_eq!(output[4], 0.5);
    }

    #[test]
    fn image_mask_rows() {
        let mut rows = Vec::new();
        // 2 x 3 image: top row bright, bottom row dark
        let image = [1.0, 1.0, 0.5, 0.5, 0.0, 0.2];
        assert!(image_rows_to_mask(&image, 2, 3, &mut rows));
        assert_eq!(rows.len(), 3);
        assert!((rows[0] - 0.1).abs() < 1e-6);
        assert_eq!(rows[1], 0.5);
        assert_eq!(rows[2], 1.0);
        assert!(!image_rows_to_mask(&image, 4, 4, &mut rows));
        assert!(!image_rows_to_mask(&image, 0, 3, &mut rows));
    }

    #[test]
    fn blur_spreads_peaks() {
        let mut magnitude = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let mut scratch = [0.0; 7];
        blur(&mut magnitude, &mut scratch, 0.0);
        assert_eq!(magnitude, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        blur(&mut magnitude, &mut scratch, 0.09);
        assert_eq!(magnitude, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        blur(&mut magnitude, &mut scratch, 0.1);
        assert!(magnitude[3] < 1.0 && magnitude[2] > 0.0 && magnitude[1] == 0.0);
        magnitude = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];

        blur(&mut magnitude, &mut scratch, 1.0);
        assert!(magnitude[3] < 1.0);
        assert!(magnitude[2] > 0.0 && magnitude[4] > 0.0);
        assert!((magnitude[2] - magnitude[4]).abs() < 1e-6);
        assert!(magnitude[2] > magnitude[0]);
    }

    #[test]
    fn blur_keeps_flat_spectra() {
        let mut magnitude = [0.5; 32];
        let mut scratch = [0.0; 32];
        blur(&mut magnitude, &mut scratch, 0.7);
        assert!(magnitude.iter().all(|m| (m - 0.5).abs() < 1e-6));
    }

    #[test]
    fn formant_shift_moves_peaks() {
        let mut magnitude = [0.0; 16];
        magnitude[4] = 1.0;
        let mut scratch = [0.0; 16];
        formant_shift(&mut magnitude, &mut scratch, 12.0);
        assert_eq!(magnitude[8], 1.0);
        assert_eq!(magnitude[4], 0.0);

        formant_shift(&mut magnitude, &mut scratch, -12.0);
        assert_eq!(magnitude[4], 1.0);
        assert_eq!(magnitude[8], 0.0);
    }

    #[test]
    fn freeze_accumulates_phases() {
        let mut freeze = SpectralFreeze::new(4).unwrap();
        let mut phase = [0.5; 4];
        freeze.process(&mut phase, false);
        assert!(!freeze.is_active());
        assert_eq!(phase, [0.5; 4]);

        // measured phases get replaced, starting from the last tracked ones
        let mut phase = [2.0; 4];
        freeze.process(&mut phase, true);
        assert!(freeze.is_active());
        assert!(phase.iter().all(|p| (p - (0.5 + FREEZE_PHASE_INCREMENT)).abs() < 1e-6));
        let mut phase = [-1.0; 4];
        freeze.process(&mut phase, true);
        assert!(phase
            .iter()
            .all(|p| (p - (0.5 + 2.0 * FREEZE_PHASE_INCREMENT)).abs() < 1e-6));

        let mut phase = [3.0; 4];
        freeze.process(&mut phase, false);
        assert!(!freeze.is_active());
        assert_eq!(phase, [3.0; 4]);
    }

    #[test]
    fn unity_pitch_ratio_keeps_magnitudes() {
        let mut vocoder = PhaseVocoder::new(16, 4).unwrap();
        let mut magnitude = [0.0; 9];
        magnitude[2] = 1.0;
        magnitude[5] = 0.5;
        let mut phase = [0.3; 9];
        vocoder.process(&mut magnitude, &mut phase, 1.0);
        assert_eq!(magnitude[2], 1.0);
        assert_eq!(magnitude[5], 0.5);
        assert!(phase.iter().all(|p| p.abs() <= PI + 1e-5));
    }

    #[test]
    fn octave_up_doubles_bins() {
        let mut vocoder = PhaseVocoder::new(16, 4).unwrap();
        let mut magnitude = [0.0; 9];
        magnitude[2] = 1.0;
        let mut phase = [0.0; 9];
        vocoder.process(&mut magnitude, &mut phase, 2.0);
        assert_eq!(magnitude[4], 1.0);
        assert_eq!(magnitude[2], 0.0);
    }
}
