//! Common, shared DSP tools for modulation.

pub mod lfo;
