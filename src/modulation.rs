//! Block rate modulation of granular, spectral and output parameters.
//!
//! Provides a modulation matrix where sources (LFOs, macros, smoothed random values and image
//! features) route to target parameters with a bipolar depth.

use four_cc::FourCC;
use rand::{rngs::SmallRng, Rng};

use crate::parameter::{FloatParameter, Parameter};

// -------------------------------------------------------------------------------------------------

pub(crate) mod matrix;

pub use matrix::{ModulationMatrix, ModulationRoute};

pub use crate::utils::dsp::lfo::{Lfo, LfoWaveform};

// -------------------------------------------------------------------------------------------------

/// Number of points in an [`ImageModulationData`] curve.
pub const IMAGE_CURVE_POINTS: usize = 16;

/// Per-frame image analysis result, published by an image or GPU thread.
///
/// All values are normalized to range \[0, 1\]. Fixed size and `Copy`, so publishing it via a
/// triple buffer never allocates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ImageModulationData {
    pub brightness: f32,
    /// Dominant color as r, g, b.
    pub color: [f32; 3],
    /// Center of interest as x, y.
    pub position: [f32; 2],
    pub curve: [f32; IMAGE_CURVE_POINTS],
    /// Number of the analysed video frame.
    pub frame_number: u64,
}

impl Default for ImageModulationData {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            color: [0.0; 3],
            position: [0.5; 2],
            curve: [0.0; IMAGE_CURVE_POINTS],
            frame_number: 0,
        }
    }
}

impl ImageModulationData {
    /// Value of the given feature, clamped to \[0, 1\].
    pub fn feature(&self, feature: ImageFeature) -> f32 {
        let value = match feature {
            ImageFeature::Brightness => self.brightness,
            ImageFeature::Red => self.color[0],
            ImageFeature::Green => self.color[1],
            ImageFeature::Blue => self.color[2],
            ImageFeature::PositionX => self.position[0],
            ImageFeature::PositionY => self.position[1],
            ImageFeature::CurvePoint(index) => {
                self.curve[(index as usize).min(IMAGE_CURVE_POINTS - 1)]
            }
        };
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }
}

/// A single value of [`ImageModulationData`] which drives an image modulation source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum ImageFeature {
    Brightness,
    Red,
    Green,
    Blue,
    PositionX,
    PositionY,
    /// A point of the curve, by index.
    CurvePoint(u8),
}

// -------------------------------------------------------------------------------------------------

/// A modulation source, evaluated once per processed block.
///
/// LFO, macro and random sources are bipolar in range \[-1, 1\], image sources are unipolar in
/// range \[0, 1\].
#[derive(Debug, Clone)]
pub enum ModulationSource {
    /// Low frequency oscillator.
    Lfo { lfo: Lfo },
    /// Manually set value, e.g. from a UI knob.
    Macro { value: f32 },
    /// Random values which get picked `rate` times per second, linearly interpolated.
    Random {
        rate: f32,
        phase: f32,
        current: f32,
        target: f32,
    },
    /// A feature of the most recent image analysis data.
    Image { feature: ImageFeature },
}

impl ModulationSource {
    /// Create a new LFO source.
    pub fn lfo(lfo: Lfo) -> Self {
        Self::Lfo { lfo }
    }

    /// Create a new macro source with the given initial value.
    pub fn macro_value(value: f32) -> Self {
        Self::Macro {
            value: value.clamp(-1.0, 1.0),
        }
    }

    /// Create a new random source, picking `rate` new values per second.
    pub fn random(rate: f32) -> Self {
        Self::Random {
            rate: rate.max(0.0),
            phase: 0.0,
            current: 0.0,
            target: 0.0,
        }
    }

    /// Create a new image feature source.
    pub fn image(feature: ImageFeature) -> Self {
        Self::Image { feature }
    }

    /// Set the value of a macro source. Ignored for all other sources.
    pub fn set_macro_value(&mut self, new_value: f32) {
        if let Self::Macro { value } = self {
            *value = if new_value.is_nan() {
                0.0
            } else {
                new_value.clamp(-1.0, 1.0)
            };
        }
    }

    /// Evaluate the source's value for a block of `frames` and advance its state.
    pub(crate) fn evaluate(
        &mut self,
        sample_rate: u32,
        frames: usize,
        image: &ImageModulationData,
        rng: &mut SmallRng,
    ) -> f32 {
        match self {
            Self::Lfo { lfo } => lfo.advance(sample_rate, frames) as f32,
            Self::Macro { value } => *value,
            Self::Random {
                rate,
                phase,
                current,
                target,
            } => {
                let value = *current + (*target - *current) * *phase;
                if sample_rate > 0 {
                    *phase += *rate * frames as f32 / sample_rate as f32;
                    if *phase >= 1.0 {
                        // skips values which got due more than once in a block
                        *phase = phase.fract();
                        *current = *target;
                        *target = rng.random_range(-1.0..=1.0);
                    }
                }
                value
            }
            Self::Image { feature } => image.feature(*feature),
        }
    }

    /// Reset the source's running state.
    pub fn reset(&mut self) {
        match self {
            Self::Lfo { lfo } => lfo.set_phase(0.0),
            Self::Random {
                phase,
                current,
                target,
                ..
            } => {
                *phase = 0.0;
                *current = 0.0;
                *target = 0.0;
            }
            Self::Macro { .. } | Self::Image { .. } => {}
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Identifies a modulatable parameter by ID and name, together with the span of its range which
/// a route with depth 1 sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationTarget {
    id: FourCC,
    name: &'static str,
    span: f32,
}

impl ModulationTarget {
    /// Create a new modulation target.
    pub const fn new(id: FourCC, name: &'static str, span: f32) -> Self {
        Self { id, name, span }
    }

    /// Create a modulation target which sweeps the given parameter's full range.
    pub fn from_parameter(parameter: &FloatParameter) -> Self {
        Self::new(parameter.id(), parameter.name(), parameter.span())
    }

    #[inline]
    pub const fn id(&self) -> FourCC {
        self.id
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Range of the parameter in plain units.
    #[inline]
    pub const fn span(&self) -> f32 {
        self.span
    }
}

// -------------------------------------------------------------------------------------------------
