//! STFT based spectral effects: masking, blurring, freezing, pitch and formant shifting.

use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};

use four_cc::FourCC;
use realfft::num_complex::Complex;

use crate::{
    parameter::{FloatParameter, SharedFloatParameter},
    sync::{triple_buffer, TripleBufferInput, TripleBufferOutput},
    utils::{window::hann_window, zeroed_buffer},
    Error,
};

mod effects;
mod fft;

pub use effects::{wrap_phase, FREEZE_PHASE_INCREMENT, MAX_BLUR_RADIUS};
pub use fft::FftTransform;

use effects::{PhaseVocoder, SpectralFreeze};

// -------------------------------------------------------------------------------------------------

/// Spectral blur amount parameter id.
pub const SPECTRAL_BLUR: FourCC = FourCC(*b"sblr");
/// Pitch shift parameter id.
pub const PITCH_SHIFT: FourCC = FourCC(*b"pshf");
/// Formant shift parameter id.
pub const FORMANT_SHIFT: FourCC = FourCC(*b"fmnt");

// -------------------------------------------------------------------------------------------------

/// Bin transform which a [`SpectralProcessor`] applies.
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    strum::FromRepr,
)]
#[repr(u8)]
pub enum SpectralMode {
    /// Copies input to output. No FFT work is done and no latency is added.
    #[default]
    Bypass,
    /// Multiplies magnitudes with a mask.
    FrequencyMask,
    /// Smears magnitudes across neighbouring bins.
    SpectralBlur,
    /// Replaces measured phases with steadily advancing ones while freeze is enabled.
    SpectralFreeze,
    /// Phase vocoder pitch shift.
    PitchShift,
    /// Warps the spectral envelope.
    FormantShift,
}

// -------------------------------------------------------------------------------------------------

/// Construction time configuration of a [`SpectralProcessor`].
#[derive(Debug, Clone)]
pub struct SpectralConfig {
    /// FFT size as power of two exponent.
    pub fft_order: u32,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { fft_order: 11 }
    }
}

impl SpectralConfig {
    pub const MIN_FFT_ORDER: u32 = FftTransform::MIN_SIZE.trailing_zeros();
    pub const MAX_FFT_ORDER: u32 = FftTransform::MAX_SIZE.trailing_zeros();

    /// FFT size in samples.
    pub fn fft_size(&self) -> usize {
        1 << self.fft_order.min(Self::MAX_FFT_ORDER)
    }

    /// Frames between two consecutive spectral frames.
    pub fn hop_size(&self) -> usize {
        self.fft_size() / 4
    }

    /// Number of frequency bins.
    pub fn bin_count(&self) -> usize {
        self.fft_size() / 2 + 1
    }

    /// Validate all config values.
    pub fn validate(&self) -> Result<(), Error> {
        if !(Self::MIN_FFT_ORDER..=Self::MAX_FFT_ORDER).contains(&self.fft_order) {
            return Err(Error::ParameterError(format!(
                "FFT order must be in range {}..={}, but is {}",
                Self::MIN_FFT_ORDER,
                Self::MAX_FFT_ORDER,
                self.fft_order
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Thread-safe spectral parameters, shared between the audio thread and control threads.
#[derive(Debug)]
pub struct SpectralControls {
    mode: AtomicU8,
    freeze: AtomicBool,
    blur: SharedFloatParameter,
    pitch_shift: SharedFloatParameter,
    formant_shift: SharedFloatParameter,
}

impl Default for SpectralControls {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralControls {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(SpectralMode::default() as u8),
            freeze: AtomicBool::new(false),
            blur: SharedFloatParameter::from_description(FloatParameter::new(
                SPECTRAL_BLUR,
                "Spectral Blur",
                0.0..=1.0,
                0.0,
            )),
            pitch_shift: SharedFloatParameter::from_description(
                FloatParameter::new(PITCH_SHIFT, "Pitch Shift", -24.0..=24.0, 0.0).with_unit("st"),
            ),
            formant_shift: SharedFloatParameter::from_description(
                FloatParameter::new(FORMANT_SHIFT, "Formant Shift", -12.0..=12.0, 0.0)
                    .with_unit("st"),
            ),
        }
    }

    /// All float parameters, in display order.
    pub fn parameters(&self) -> [&SharedFloatParameter; 3] {
        [&self.blur, &self.pitch_shift, &self.formant_shift]
    }

    /// Look up a float parameter by its id.
    pub fn parameter(&self, id: FourCC) -> Option<&SharedFloatParameter> {
        self.parameters()
            .into_iter()
            .find(|p| p.description().id() == id)
    }

    pub fn mode(&self) -> SpectralMode {
        SpectralMode::from_repr(self.mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Switch the processing mode. Applied at the start of the next processed block.
    pub fn set_mode(&self, mode: SpectralMode) {
        let previous = self.mode.swap(mode as u8, Ordering::Relaxed);
        if previous != mode as u8 {
            log::debug!("Spectral mode changed to '{mode}'");
        }
    }

    pub fn freeze_enabled(&self) -> bool {
        self.freeze.load(Ordering::Relaxed)
    }

    /// Enable or disable phase accumulation in [`SpectralMode::SpectralFreeze`].
    pub fn set_freeze_enabled(&self, enabled: bool) {
        self.freeze.store(enabled, Ordering::Relaxed);
    }

    pub fn blur(&self) -> f32 {
        self.blur.value()
    }
    /// Set blur amount in range \[0, 1\].
    pub fn set_blur(&self, amount: f32) {
        self.blur.set_value(amount);
    }

    pub fn pitch_shift(&self) -> f32 {
        self.pitch_shift.value()
    }
    /// Set pitch shift in semitones, clamped to \[-24, 24\].
    pub fn set_pitch_shift(&self, semitones: f32) {
        self.pitch_shift.set_value(semitones);
    }

    pub fn formant_shift(&self) -> f32 {
        self.formant_shift.value()
    }
    /// Set formant shift in semitones, clamped to \[-12, 12\].
    pub fn set_formant_shift(&self, semitones: f32) {
        self.formant_shift.set_value(semitones);
    }

    /// Snapshot of all values for one block, with the given blur modulation offset applied.
    fn resolve(&self, blur_offset: f32) -> FrameSettings {
        FrameSettings {
            mode: self.mode(),
            freeze: self.freeze_enabled(),
            blur: self.blur.description().clamp_value(self.blur() + blur_offset),
            pitch_ratio: 2.0f32.powf(self.pitch_shift() / 12.0),
            formant_shift: self.formant_shift(),
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct FrameSettings {
    mode: SpectralMode,
    freeze: bool,
    blur: f32,
    pitch_ratio: f32,
    formant_shift: f32,
}

// -------------------------------------------------------------------------------------------------

/// Publishes frequency masks to a spectral processor. Lives on a non real-time thread.
///
/// Masks get resampled onto the processor's bin count here, so the audio thread only swaps
/// in ready to use masks.
pub struct SpectralMaskSender {
    input: TripleBufferInput<Box<[f32]>>,
    rows: Vec<f32>,
}

impl SpectralMaskSender {
    /// Publish a mask of any length. Values get clamped to \[0, 1\]. Empty masks are ignored,
    /// keeping the current mask.
    pub fn set_mask(&mut self, mask: &[f32]) {
        if mask.is_empty() {
            log::debug!("Ignoring empty spectral mask");
            return;
        }
        effects::resample_mask(mask, self.input.input_buffer());
        self.input.publish();
        log::debug!("Published spectral mask with {} values", mask.len());
    }

    /// Publish a mask from a row-major `width x height` image of brightness values: each row
    /// gets averaged, with the bottom row mapping to the lowest frequency. When the dimensions
    /// don't match the data, the data is used as a plain mask instead.
    pub fn apply_image_mask(&mut self, data: &[f32], width: usize, height: usize) {
        if effects::image_rows_to_mask(data, width, height, &mut self.rows) {
            effects::resample_mask(&self.rows, self.input.input_buffer());
            self.input.publish();
            log::debug!("Published spectral mask from {width}x{height} image");
        } else {
            log::debug!(
                "Image mask size {width}x{height} doesn't match data len {}, using it as mask",
                data.len()
            );
            self.set_mask(data);
        }
    }
}

fn mask_channel(bins: usize) -> Result<(SpectralMaskSender, TripleBufferOutput<Box<[f32]>>), Error> {
    let mut neutral = zeroed_buffer::<f32>(bins)?;
    neutral.fill(1.0);
    let (input, output) = triple_buffer(neutral.into_boxed_slice());
    let sender = SpectralMaskSender {
        input,
        rows: Vec::new(),
    };
    Ok((sender, output))
}

// -------------------------------------------------------------------------------------------------

/// Single channel STFT state: accumulators, FFT and per-mode bin state.
struct SpectralChannel {
    fft: FftTransform,
    hop_size: usize,
    window: Box<[f32]>,
    /// Inverse FFT, window and overlap gain compensation.
    scale: f32,
    input: Box<[f32]>,
    output: Box<[f32]>,
    frame: Box<[f32]>,
    spectrum: Box<[Complex<f32>]>,
    magnitude: Box<[f32]>,
    phase: Box<[f32]>,
    scratch: Box<[f32]>,
    freeze: SpectralFreeze,
    vocoder: PhaseVocoder,
    /// Samples gathered since the last frame.
    fill: usize,
    bypassed: bool,
}

impl SpectralChannel {
    fn new(config: &SpectralConfig) -> Result<Self, Error> {
        let fft_size = config.fft_size();
        let hop_size = config.hop_size();
        let bins = config.bin_count();
        let fft = FftTransform::new(fft_size)?;

        let mut window = zeroed_buffer::<f32>(fft_size)?;
        hann_window(&mut window, true);
        let overlap_gain = window.iter().map(|w| w * w).sum::<f32>() / hop_size as f32;
        let scale = 1.0 / (fft_size as f32 * overlap_gain);

        Ok(Self {
            fft,
            hop_size,
            window: window.into_boxed_slice(),
            scale,
            input: zeroed_buffer(fft_size)?.into_boxed_slice(),
            output: zeroed_buffer(fft_size)?.into_boxed_slice(),
            frame: zeroed_buffer(fft_size)?.into_boxed_slice(),
            spectrum: zeroed_buffer(bins)?.into_boxed_slice(),
            magnitude: zeroed_buffer(bins)?.into_boxed_slice(),
            phase: zeroed_buffer(bins)?.into_boxed_slice(),
            scratch: zeroed_buffer(bins)?.into_boxed_slice(),
            freeze: SpectralFreeze::new(bins)?,
            vocoder: PhaseVocoder::new(fft_size, hop_size)?,
            fill: 0,
            bypassed: true,
        })
    }

    fn reset(&mut self) {
        self.input.fill(0.0);
        self.output.fill(0.0);
        self.freeze.reset();
        self.vocoder.reset();
        self.fill = 0;
    }

    fn process(&mut self, buffer: &mut [f32], settings: &FrameSettings, mask: &[f32]) {
        if settings.mode == SpectralMode::Bypass {
            self.bypassed = true;
            return;
        }
        if self.bypassed {
            // don't replay audio which got accumulated before bypassing
            self.reset();
            self.bypassed = false;
        }
        let fft_size = self.fft.size();
        for sample in buffer.iter_mut() {
            self.input[fft_size - self.hop_size + self.fill] = *sample;
            *sample = self.output[self.fill];
            self.fill += 1;
            if self.fill == self.hop_size {
                self.fill = 0;
                self.process_frame(settings, mask);
            }
        }
    }

    fn process_frame(&mut self, settings: &FrameSettings, mask: &[f32]) {
        if self.transform_frame(settings, mask).is_err() {
            self.frame.fill(0.0);
        }
        let hop_size = self.hop_size;
        let fft_size = self.fft.size();

        self.output.copy_within(hop_size.., 0);
        self.output[fft_size - hop_size..].fill(0.0);
        for (o, f) in self.output.iter_mut().zip(self.frame.iter()) {
            *o += *f * self.scale;
        }
        self.input.copy_within(hop_size.., 0);
    }

    /// Analyse the input accumulator, apply the mode's bin transform and resynthesize the
    /// windowed frame into `self.frame`.
    fn transform_frame(&mut self, settings: &FrameSettings, mask: &[f32]) -> Result<(), Error> {
        self.frame.copy_from_slice(&self.input);
        FftTransform::apply_window(&mut self.frame, &self.window);
        self.fft.forward(&self.frame, &mut self.spectrum)?;
        FftTransform::to_polar(&self.spectrum, &mut self.magnitude, &mut self.phase);

        let (magnitude, phase) = (&mut *self.magnitude, &mut *self.phase);
        match settings.mode {
            SpectralMode::Bypass => {}
            SpectralMode::FrequencyMask => effects::apply_mask(magnitude, mask),
            SpectralMode::SpectralBlur => effects::blur(magnitude, &mut self.scratch, settings.blur),
            SpectralMode::SpectralFreeze => self.freeze.process(phase, settings.freeze),
            SpectralMode::PitchShift => self.vocoder.process(magnitude, phase, settings.pitch_ratio),
            SpectralMode::FormantShift => {
                effects::formant_shift(magnitude, &mut self.scratch, settings.formant_shift)
            }
        }
        // keep phase histories current, so switching modes continues without phase jumps
        if settings.mode != SpectralMode::PitchShift {
            self.vocoder.track(phase);
        }
        if settings.mode != SpectralMode::SpectralFreeze {
            self.freeze.process(phase, false);
        }

        FftTransform::from_polar(&self.magnitude, &self.phase, &mut self.spectrum);
        self.fft.inverse(&self.spectrum, &mut self.frame)?;
        FftTransform::apply_window(&mut self.frame, &self.window);
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Mono STFT effect processor.
///
/// `process` consumes and emits any number of samples: a new spectral frame is computed each
/// `fft_size / 4` samples and overlap-added into the output accumulator. All non bypass modes
/// delay the signal by exactly `fft_size` samples. Mode and parameters are read once per call.
pub struct SpectralProcessor {
    controls: Arc<SpectralControls>,
    mask: TripleBufferOutput<Box<[f32]>>,
    channel: SpectralChannel,
}

impl SpectralProcessor {
    /// Create a new processor and the sender which publishes masks to it.
    pub fn new(config: &SpectralConfig) -> Result<(Self, SpectralMaskSender), Error> {
        Self::with_controls(config, Arc::new(SpectralControls::new()))
    }

    /// Create a new processor which uses the given shared controls.
    pub fn with_controls(
        config: &SpectralConfig,
        controls: Arc<SpectralControls>,
    ) -> Result<(Self, SpectralMaskSender), Error> {
        config.validate()?;
        let (sender, mask) = mask_channel(config.bin_count())?;
        let channel = SpectralChannel::new(config)?;
        Ok((
            Self {
                controls,
                mask,
                channel,
            },
            sender,
        ))
    }

    /// Shared, thread-safe parameters of this processor.
    pub fn controls(&self) -> Arc<SpectralControls> {
        Arc::clone(&self.controls)
    }

    pub fn fft_size(&self) -> usize {
        self.channel.fft.size()
    }

    /// Delay in samples the current mode adds.
    pub fn latency(&self) -> usize {
        match self.controls.mode() {
            SpectralMode::Bypass => 0,
            _ => self.fft_size(),
        }
    }

    /// Clear all accumulators and frame states.
    pub fn reset(&mut self) {
        self.channel.reset();
    }

    /// Process `input` into `output`. Both buffers should have the same length: only the
    /// common length is processed.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);
        self.process_in_place(&mut output[..len]);
    }

    /// Process the given buffer in place.
    pub fn process_in_place(&mut self, buffer: &mut [f32]) {
        let settings = self.controls.resolve(0.0);
        self.mask.update();
        self.channel
            .process(buffer, &settings, self.mask.output_buffer());
    }
}

// -------------------------------------------------------------------------------------------------

/// Two [`SpectralProcessor`] channels with shared controls and mask.
pub struct StereoSpectralProcessor {
    controls: Arc<SpectralControls>,
    mask: TripleBufferOutput<Box<[f32]>>,
    left: SpectralChannel,
    right: SpectralChannel,
}

impl StereoSpectralProcessor {
    /// Create a new stereo processor and the sender which publishes masks to it.
    pub fn new(config: &SpectralConfig) -> Result<(Self, SpectralMaskSender), Error> {
        config.validate()?;
        let (sender, mask) = mask_channel(config.bin_count())?;
        Ok((
            Self {
                controls: Arc::new(SpectralControls::new()),
                mask,
                left: SpectralChannel::new(config)?,
                right: SpectralChannel::new(config)?,
            },
            sender,
        ))
    }

    /// Shared, thread-safe parameters of this processor.
    pub fn controls(&self) -> Arc<SpectralControls> {
        Arc::clone(&self.controls)
    }

    /// Delay in samples the current mode adds.
    pub fn latency(&self) -> usize {
        match self.controls.mode() {
            SpectralMode::Bypass => 0,
            _ => self.left.fft.size(),
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    /// Process a stereo block in place, with the given blur modulation offset applied.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], blur_offset: f32) {
        let settings = self.controls.resolve(blur_offset);
        self.mask.update();
        let mask = self.mask.output_buffer();
        self.left.process(left, &settings, mask);
        self.right.process(right, &settings, mask);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpectralConfig {
        SpectralConfig { fft_order: 8 }
    }

    fn sine(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (i as f32 * 0.05).sin() + 0.25 * (i as f32 * 0.31).sin())
            .collect()
    }

    fn process_in_blocks(processor: &mut SpectralProcessor, input: &[f32], block: usize) -> Vec<f32> {
        let mut output = vec![0.0; input.len()];
        for (i, o) in input.chunks(block).zip(output.chunks_mut(block)) {
            processor.process(i, o);
        }
        output
    }

    #[test]
    fn config_validation() {
        assert!(SpectralConfig::default().validate().is_ok());
        assert_eq!(SpectralConfig::default().fft_size(), 2048);
        assert!(SpectralConfig { fft_order: 3 }.validate().is_err());
        assert!(SpectralConfig { fft_order: 17 }.validate().is_err());
        assert!(SpectralProcessor::new(&SpectralConfig { fft_order: 2 }).is_err());
    }

    #[test]
    fn mode_names() {
        assert_eq!(SpectralMode::PitchShift.to_string(), "PitchShift");
        assert_eq!(
            "SpectralFreeze".parse::<SpectralMode>().unwrap(),
            SpectralMode::SpectralFreeze
        );
        assert_eq!(SpectralMode::from_repr(1), Some(SpectralMode::FrequencyMask));
    }

    #[test]
    fn controls_clamp() {
        let controls = SpectralControls::new();
        controls.set_blur(2.0);
        assert_eq!(controls.blur(), 1.0);
        controls.set_pitch_shift(-48.0);
        assert_eq!(controls.pitch_shift(), -24.0);
        controls.set_formant_shift(13.0);
        assert_eq!(controls.formant_shift(), 12.0);
        controls.set_mode(SpectralMode::SpectralBlur);
        assert_eq!(controls.mode(), SpectralMode::SpectralBlur);
        assert!(controls.parameter(SPECTRAL_BLUR).is_some());
        assert_eq!(controls.resolve(-5.0).blur, 0.0);
    }

    #[test]
    fn bypass_is_exact_copy() {
        let (mut processor, _) = SpectralProcessor::new(&config()).unwrap();
        assert_eq!(processor.latency(), 0);
        let input = sine(1000);
        let output = process_in_blocks(&mut processor, &input, 77);
        assert_eq!(input, output);
    }

    #[test]
    fn neutral_mask_is_delayed_input() {
        let (mut processor, _) = SpectralProcessor::new(&config()).unwrap();
        processor.controls().set_mode(SpectralMode::FrequencyMask);
        let latency = processor.latency();
        assert_eq!(latency, 256);

        let input = sine(latency * 8);
        let output = process_in_blocks(&mut processor, &input, 100);
        assert!(output[..latency].iter().all(|s| s.abs() < 1e-4));
        for (x, y) in input.iter().zip(output[latency..].iter()) {
            assert!((x - y).abs() < 1e-3, "{x} != {y}");
        }
    }

    #[test]
    fn zero_mask_silences() {
        let (mut processor, mut sender) = SpectralProcessor::new(&config()).unwrap();
        processor.controls().set_mode(SpectralMode::FrequencyMask);
        sender.set_mask(&[0.0]);
        let output = process_in_blocks(&mut processor, &sine(2048), 64);
        assert!(output.iter().all(|s| s.abs() < 1e-6));

        // empty masks keep the current one
        sender.set_mask(&[]);
        sender.apply_image_mask(&[], 0, 0);
        let output = process_in_blocks(&mut processor, &sine(2048), 64);
        assert!(output.iter().all(|s| s.abs() < 1e-6));

        // mismatching image dimensions fall back to a plain mask
        sender.apply_image_mask(&[1.0, 1.0], 3, 3);
        let output = process_in_blocks(&mut processor, &sine(2048), 64);
        assert!(output[1024..].iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn leaving_bypass_clears_accumulators() {
        let (mut processor, _) = SpectralProcessor::new(&config()).unwrap();
        let controls = processor.controls();
        controls.set_mode(SpectralMode::SpectralBlur);
        process_in_blocks(&mut processor, &sine(1024), 128);
        controls.set_mode(SpectralMode::Bypass);
        process_in_blocks(&mut processor, &sine(128), 128);
        controls.set_mode(SpectralMode::SpectralBlur);
        let output = process_in_blocks(&mut processor, &vec![0.0; 512], 128);
        assert!(output.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn effect_modes_stay_finite() {
        let input = sine(4096);
        for mode in [
            SpectralMode::SpectralBlur,
            SpectralMode::SpectralFreeze,
            SpectralMode::PitchShift,
            SpectralMode::FormantShift,
        ] {
            let (mut processor, _) = SpectralProcessor::new(&config()).unwrap();
            let controls = processor.controls();
            controls.set_mode(mode);
            controls.set_blur(0.8);
            controls.set_pitch_shift(7.0);
            controls.set_formant_shift(-5.0);
            let output = process_in_blocks(&mut processor, &input, 333);
            assert!(output.iter().all(|s| s.is_finite()), "mode {mode}");
            assert!(output[1024..].iter().any(|s| s.abs() > 1e-3), "mode {mode}");
        }
    }

    /// Sine with exactly `bin` cycles per 256 samples.
    fn bin_tone(bin: usize, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * bin as f32 * std::f32::consts::TAU / 256.0).sin())
            .collect()
    }

    /// Magnitude of the given 256 point FFT bin's frequency in the signal.
    fn bin_level(signal: &[f32], bin: usize) -> f32 {
        let omega = bin as f32 * std::f32::consts::TAU / 256.0;
        let (re, im) = signal
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(re, im), (i, s)| {
                (re + s * (omega * i as f32).cos(), im - s * (omega * i as f32).sin())
            });
        (re * re + im * im).sqrt() / signal.len() as f32
    }

    #[test]
    fn freeze_keeps_following_magnitudes() {
        let (mut processor, _) = SpectralProcessor::new(&config()).unwrap();
        let controls = processor.controls();
        controls.set_mode(SpectralMode::SpectralFreeze);
        let output = process_in_blocks(&mut processor, &bin_tone(40, 0.5, 1024), 128);
        assert!((bin_level(&output[512..], 40) - 0.25).abs() < 0.01);
        controls.set_freeze_enabled(true);

        // silent input stays silent once the latency passed
        let output = process_in_blocks(&mut processor, &vec![0.0; 1024], 128);
        assert!(output[512..].iter().all(|s| s.abs() < 1e-4));

        // new input comes through with its own magnitudes
        let output = process_in_blocks(&mut processor, &bin_tone(40, 0.25, 2048), 128);
        let tail = &output[1024..];
        assert!(tail.iter().all(|s| s.is_finite()));
        let level = bin_level(tail, 40);
        assert!((level - 0.125).abs() < 0.02, "{level}");
        assert!(bin_level(tail, 10) < 0.01);
    }

    #[test]
    fn stereo_processes_both_channels() {
        let (mut processor, _) = StereoSpectralProcessor::new(&config()).unwrap();
        processor.controls().set_mode(SpectralMode::FrequencyMask);
        assert_eq!(processor.latency(), 256);
        let input = sine(1024);
        let (mut left, mut right) = (input.clone(), input.clone());
        for (l, r) in left.chunks_mut(64).zip(right.chunks_mut(64)) {
            processor.process(l, r, 0.0);
        }
        assert_eq!(left, right);
        assert!((left[256 + 100] - input[100]).abs() < 1e-3);
    }
}
