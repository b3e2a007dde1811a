use std::fmt::Debug;

// -------------------------------------------------------------------------------------------------

/// Provides smooth transitions between a current and target f32 value.
/// Smoothing needs to be applied to avoid zipper noise in e.g. gain changes.
pub trait SmoothedValue: Debug {
    /// Access to the current, possibly ramped value.
    #[must_use]
    fn current(&self) -> f32;
    /// Access to the target value.
    #[must_use]
    fn target(&self) -> f32;

    /// Ramp, if needed, and get the current ramped value, else returns the target value.
    #[must_use]
    fn next(&mut self) -> f32 {
        if self.need_ramp() {
            self.ramp();
            self.current()
        } else {
            self.target()
        }
    }

    /// Test if ramping is necessary. When not, values may be applied in blocks.
    #[must_use]
    fn need_ramp(&self) -> bool;
    /// Move current towards the target value, when ramping is necessary.
    fn ramp(&mut self);

    /// Set current and target to the same value.
    fn init(&mut self, value: f32);
    /// Set a new target value and start ramping towards it.
    fn set_target(&mut self, target: f32);

    /// Update sample rate. Smoothed values are expected to be ramped once per sample frame.
    fn set_sample_rate(&mut self, sample_rate: u32);
}

// -------------------------------------------------------------------------------------------------

/// Apply a smoothed gain to an interleaved stereo buffer, ramping once per frame.
pub fn apply_smoothed_stereo_gain(buffer: &mut [f32], smoothed: &mut impl SmoothedValue) {
    if smoothed.need_ramp() {
        for frame in buffer.chunks_exact_mut(2) {
            let gain = smoothed.next();
            frame[0] *= gain;
            frame[1] *= gain;
        }
    } else {
        let gain = smoothed.target();
        if (1.0 - gain).abs() > 0.000001 {
            super::buffer::scale_buffer(buffer, gain);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Linear smoothed value which reaches a new target within a fixed ramp time.
#[derive(Debug, Clone)]
pub struct LinearSmoothedValue {
    current: f32,
    target: f32,
    step: f32,
    pending_steps: u32,
    ramp_time: f32,
    ramp_length: u32,
}

impl LinearSmoothedValue {
    /// Default ramp time in seconds.
    pub const DEFAULT_RAMP_TIME: f32 = 0.02;

    pub fn new(value: f32, sample_rate: u32) -> Self {
        Self::with_ramp_time(value, Self::DEFAULT_RAMP_TIME, sample_rate)
    }

    pub fn with_ramp_time(value: f32, ramp_time: f32, sample_rate: u32) -> Self {
        debug_assert!(ramp_time >= 0.0, "Invalid ramp time");
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        Self {
            current: value,
            target: value,
            step: 0.0,
            pending_steps: 0,
            ramp_time,
            ramp_length: Self::ramp_length(ramp_time, sample_rate),
        }
    }

    /// Number of frames that are still needed to reach the target.
    pub fn pending_steps(&self) -> u32 {
        self.pending_steps
    }

    /// Stop ramping and jump to the target value.
    pub fn reset(&mut self) {
        self.init(self.target);
    }

    fn ramp_length(ramp_time: f32, sample_rate: u32) -> u32 {
        (ramp_time * sample_rate as f32).round().max(0.0) as u32
    }
}

impl SmoothedValue for LinearSmoothedValue {
    #[inline(always)]
    fn current(&self) -> f32 {
        self.current
    }

    #[inline(always)]
    fn target(&self) -> f32 {
        self.target
    }

    #[inline(always)]
    fn need_ramp(&self) -> bool {
        self.pending_steps > 0
    }

    fn ramp(&mut self) {
        if self.pending_steps > 0 {
            self.current += self.step;
            self.pending_steps -= 1;
            if self.pending_steps == 0 {
                self.current = self.target;
            }
        }
    }

    fn init(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.pending_steps = 0;
    }

    fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        if self.ramp_length == 0 || self.current == target {
            self.current = target;
            self.pending_steps = 0;
        } else {
            self.pending_steps = self.ramp_length;
            self.step = (target - self.current) / self.ramp_length as f32;
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.ramp_length = Self::ramp_length(self.ramp_time, sample_rate);
        self.reset();
    }
}

impl Default for LinearSmoothedValue {
    fn default() -> Self {
        Self::new(0.0, 44100)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_ramps() {
        let mut value = LinearSmoothedValue::with_ramp_time(0.0, 0.001, 4000); // 4 frames
        assert!(!value.need_ramp());
        value.set_target(1.0);
        assert_eq!(value.pending_steps(), 4);
        let ramped = [value.next(), value.next(), value.next(), value.next()];
        assert_eq!(ramped, [0.25, 0.5, 0.75, 1.0]);
        assert!(!value.need_ramp());
        assert_eq!(value.next(), 1.0);

        value.init(0.5);
        assert_eq!(value.current(), 0.5);
        assert!(!value.need_ramp());
    }

    #[test]
    fn zero_ramp_time_jumps() {
        let mut value = LinearSmoothedValue::with_ramp_time(0.0, 0.0, 48000);
        value.set_target(0.3);
        assert!(!value.need_ramp());
        assert_eq!(value.current(), 0.3);
    }

    #[test]
    fn stereo_gain() {
        let mut value = LinearSmoothedValue::with_ramp_time(1.0, 0.001, 2000); // 2 frames
        value.set_target(0.0);
        let mut buffer = [1.0; 6];
        apply_smoothed_stereo_gain(&mut buffer, &mut value);
        assert_eq!(buffer, [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
    }
}
