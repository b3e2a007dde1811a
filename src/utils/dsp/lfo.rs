//! Oscillators for modulation.

// -------------------------------------------------------------------------------------------------

/// Waveform types for LFO oscillators.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, strum::Display, strum::EnumString, strum::VariantNames,
)]
pub enum LfoWaveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

// -------------------------------------------------------------------------------------------------

/// Simple non bandlimited, block rate oscillator which is used as modulation source.
///
/// The phase is kept normalized in range \[0, 1) and advanced by whole blocks of frames,
/// the output is bipolar in range \[-1, 1\].
#[derive(Debug, Clone)]
pub struct Lfo {
    phase: f64,
    rate: f64,
    waveform: LfoWaveform,
}

impl Lfo {
    pub fn new(rate: f64, waveform: LfoWaveform) -> Self {
        Self {
            phase: 0.0,
            rate: rate.max(0.0),
            waveform,
        }
    }

    /// Rate in Hz.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Set a new rate in Hz.
    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate.max(0.0);
    }

    pub fn waveform(&self) -> LfoWaveform {
        self.waveform
    }

    pub fn set_waveform(&mut self, waveform: LfoWaveform) {
        self.waveform = waveform;
    }

    /// Set or reset the LFO's normalized phase.
    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase.rem_euclid(1.0);
    }

    /// Current value, without advancing the phase.
    pub fn value(&self) -> f64 {
        let phase = self.phase;
        match self.waveform {
            LfoWaveform::Sine => (std::f64::consts::TAU * phase).sin(),
            LfoWaveform::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    -4.0 * phase + 3.0
                }
            }
            LfoWaveform::Sawtooth => 2.0 * phase - 1.0,
            LfoWaveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }

    /// Advance the phase by the given number of frames and return the value at the block start.
    pub fn advance(&mut self, sample_rate: u32, frames: usize) -> f64 {
        let value = self.value();
        if sample_rate > 0 {
            self.phase += self.rate * frames as f64 / sample_rate as f64;
            self.phase = self.phase.rem_euclid(1.0);
        }
        value
    }
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new(1.0, LfoWaveform::default())
    }
}

// -------------------------------------------------------------------------------------------------
