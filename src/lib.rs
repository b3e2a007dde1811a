#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod error;
mod granular;
mod instrument;
mod spectral;

// public, flat re-exports
pub use error::Error;

pub use granular::{
    EngineConfig, GrainEvent, GrainPool, GrainPosition, GrainSpawn, GranularControls,
    GranularEngine, GranularModulation, GRAIN_AMPLITUDE, GRAIN_DURATION, GRAIN_EVENT_FIFO_SIZE,
    GRAIN_PAN_SPREAD, GRAIN_PITCH, GRAIN_PITCH_SPREAD, GRAIN_POSITION, GRAIN_POSITION_SPREAD,
    GRAIN_RATE, MIN_GRAIN_RATE,
};

pub use instrument::{
    GrainSnapshot, Instrument, InstrumentConfig, InstrumentControls, InstrumentHandle, OUTPUT_GAIN,
};

pub use spectral::{
    FftTransform, SpectralConfig, SpectralControls, SpectralMaskSender, SpectralMode,
    SpectralProcessor, StereoSpectralProcessor, FORMANT_SHIFT, PITCH_SHIFT, SPECTRAL_BLUR,
};

pub use utils::window::WindowTable;

// public mods
pub mod modulation;
pub mod parameter;
pub mod sync;
pub mod utils;
