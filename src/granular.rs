//! Granular synthesis engine: grain triggering, parameter derivation and mixing.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use four_cc::FourCC;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    parameter::{FloatParameter, SharedFloatParameter},
    sync::{FifoProducer, SourceReader},
    utils::window::WindowTable,
    Error,
};

mod pool;

pub use pool::{GrainPool, GrainPosition, GrainSpawn};

// -------------------------------------------------------------------------------------------------

/// Fixed gain of every grain.
pub const GRAIN_AMPLITUDE: f32 = 0.7;

/// Lowest grain rate in Hz which is used to calculate the trigger interval.
pub const MIN_GRAIN_RATE: f32 = 0.1;

/// Number of slots in the grain event FIFO.
pub const GRAIN_EVENT_FIFO_SIZE: usize = 1024;

// -------------------------------------------------------------------------------------------------

/// Grain rate parameter id.
pub const GRAIN_RATE: FourCC = FourCC(*b"rate");
/// Grain duration parameter id.
pub const GRAIN_DURATION: FourCC = FourCC(*b"dura");
/// Grain center position parameter id.
pub const GRAIN_POSITION: FourCC = FourCC(*b"posi");
/// Grain position spread parameter id.
pub const GRAIN_POSITION_SPREAD: FourCC = FourCC(*b"pspr");
/// Grain pitch ratio parameter id.
pub const GRAIN_PITCH: FourCC = FourCC(*b"ptch");
/// Grain pitch spread parameter id.
pub const GRAIN_PITCH_SPREAD: FourCC = FourCC(*b"ptsp");
/// Grain pan spread parameter id.
pub const GRAIN_PAN_SPREAD: FourCC = FourCC(*b"pnsp");

// -------------------------------------------------------------------------------------------------

/// Construction time configuration of a [`GranularEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max number of concurrently playing grains.
    pub pool_capacity: usize,
    /// Number of entries in the grain window lookup table.
    pub window_size: usize,
    /// Seed for the engine's random number generator.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: GrainPool::DEFAULT_CAPACITY,
            window_size: WindowTable::DEFAULT_SIZE,
            seed: 42,
        }
    }
}

impl EngineConfig {
    /// Max supported pool capacity.
    pub const MAX_POOL_CAPACITY: usize = 8192;

    /// Validate all config values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pool_capacity == 0 || self.pool_capacity > Self::MAX_POOL_CAPACITY {
            return Err(Error::ParameterError(format!(
                "Grain pool capacity must be between 1 and {}",
                Self::MAX_POOL_CAPACITY
            )));
        }
        if self.window_size < WindowTable::MIN_SIZE {
            return Err(Error::ParameterError(format!(
                "Window table size must be >= {}",
                WindowTable::MIN_SIZE
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Thread-safe granular parameters, shared between the audio thread and any control threads.
///
/// All setters clamp values into the parameter's range. The engine reads the values once
/// per processed block.
#[derive(Debug)]
pub struct GranularControls {
    rate: SharedFloatParameter,
    duration: SharedFloatParameter,
    position: SharedFloatParameter,
    position_spread: SharedFloatParameter,
    pitch: SharedFloatParameter,
    pitch_spread: SharedFloatParameter,
    pan_spread: SharedFloatParameter,
    reset_requested: AtomicBool,
}

impl Default for GranularControls {
    fn default() -> Self {
        Self::new()
    }
}

impl GranularControls {
    pub fn new() -> Self {
        let shared = SharedFloatParameter::from_description;
        Self {
            rate: shared(
                FloatParameter::new(GRAIN_RATE, "Grain Rate", 0.1..=1000.0, 20.0).with_unit("Hz"),
            ),
            duration: shared(
                FloatParameter::new(GRAIN_DURATION, "Grain Duration", 1.0..=2000.0, 50.0)
                    .with_unit("ms"),
            ),
            position: shared(FloatParameter::new(GRAIN_POSITION, "Position", 0.0..=1.0, 0.5)),
            position_spread: shared(FloatParameter::new(
                GRAIN_POSITION_SPREAD,
                "Position Spread",
                0.0..=1.0,
                0.1,
            )),
            pitch: shared(FloatParameter::new(GRAIN_PITCH, "Pitch", 0.125..=8.0, 1.0)),
            pitch_spread: shared(
                FloatParameter::new(GRAIN_PITCH_SPREAD, "Pitch Spread", 0.0..=24.0, 0.0)
                    .with_unit("st"),
            ),
            pan_spread: shared(FloatParameter::new(
                GRAIN_PAN_SPREAD,
                "Pan Spread",
                0.0..=1.0,
                1.0,
            )),
            reset_requested: AtomicBool::new(false),
        }
    }

    /// All parameters, in display order.
    pub fn parameters(&self) -> [&SharedFloatParameter; 7] {
        [
            &self.rate,
            &self.duration,
            &self.position,
            &self.position_spread,
            &self.pitch,
            &self.pitch_spread,
            &self.pan_spread,
        ]
    }

    /// Look up a parameter by its id.
    pub fn parameter(&self, id: FourCC) -> Option<&SharedFloatParameter> {
        self.parameters()
            .into_iter()
            .find(|p| p.description().id() == id)
    }

    /// Set grain rate in grains per second.
    pub fn set_rate(&self, rate: f32) {
        self.rate.set_value(rate);
    }
    /// Set grain duration in milliseconds.
    pub fn set_duration(&self, duration_ms: f32) {
        self.duration.set_value(duration_ms);
    }
    /// Set normalized center position in the source.
    pub fn set_position(&self, position: f32) {
        self.position.set_value(position);
    }
    /// Set normalized random position offset range.
    pub fn set_position_spread(&self, spread: f32) {
        self.position_spread.set_value(spread);
    }
    /// Set playback rate multiplier.
    pub fn set_pitch(&self, ratio: f32) {
        self.pitch.set_value(ratio);
    }
    /// Set random pitch offset range in semitones.
    pub fn set_pitch_spread(&self, semitones: f32) {
        self.pitch_spread.set_value(semitones);
    }
    /// Set random panning range.
    pub fn set_pan_spread(&self, spread: f32) {
        self.pan_spread.set_value(spread);
    }

    /// Request a reset of the engine from any thread. The reset gets applied at the start of
    /// the next processed block: a block which already is processing completes with the old state.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }

    /// Resolve plain parameter values with the given modulation offsets applied.
    fn resolve(&self, modulation: &GranularModulation) -> ResolvedParameters {
        let modulated = |param: &SharedFloatParameter, offset: f32| {
            param.description().clamp_value(param.value() + offset)
        };
        ResolvedParameters {
            rate: modulated(&self.rate, modulation.rate).max(MIN_GRAIN_RATE),
            duration_ms: modulated(&self.duration, modulation.duration),
            position: modulated(&self.position, modulation.position),
            position_spread: modulated(&self.position_spread, modulation.position_spread),
            pitch: modulated(&self.pitch, modulation.pitch),
            pitch_spread: modulated(&self.pitch_spread, modulation.pitch_spread),
            pan_spread: modulated(&self.pan_spread, modulation.pan_spread),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Block rate modulation offsets, in plain parameter units, which get added to the base values
/// of the [`GranularControls`] before clamping.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GranularModulation {
    pub rate: f32,
    pub duration: f32,
    pub position: f32,
    pub position_spread: f32,
    pub pitch: f32,
    pub pitch_spread: f32,
    pub pan_spread: f32,
}

impl GranularModulation {
    /// Access an offset by its parameter id.
    pub fn offset_mut(&mut self, id: FourCC) -> Option<&mut f32> {
        match id {
            _ if id == GRAIN_RATE => Some(&mut self.rate),
            _ if id == GRAIN_DURATION => Some(&mut self.duration),
            _ if id == GRAIN_POSITION => Some(&mut self.position),
            _ if id == GRAIN_POSITION_SPREAD => Some(&mut self.position_spread),
            _ if id == GRAIN_PITCH => Some(&mut self.pitch),
            _ if id == GRAIN_PITCH_SPREAD => Some(&mut self.pitch_spread),
            _ if id == GRAIN_PAN_SPREAD => Some(&mut self.pan_spread),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct ResolvedParameters {
    rate: f32,
    duration_ms: f32,
    position: f32,
    position_spread: f32,
    pitch: f32,
    pitch_spread: f32,
    pan_spread: f32,
}

// -------------------------------------------------------------------------------------------------

/// Sent for each triggered grain, for visualizations.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GrainEvent {
    /// Pool slot of the grain.
    pub slot: usize,
    /// Normalized start position.
    pub start: f32,
    /// Playback rate multiplier.
    pub pitch: f32,
    /// Stereo position.
    pub pan: f32,
}

// -------------------------------------------------------------------------------------------------

/// Produces stereo audio by triggering grains from a source buffer and mixing them.
///
/// Grains get triggered at the grain rate, with the onset of each grain placed at the frame in
/// the block at which it got due. When the pool is saturated, the oldest grain gets evicted.
/// Without a source, or with an empty source, the engine outputs silence and won't trigger.
pub struct GranularEngine {
    controls: Arc<GranularControls>,
    pool: GrainPool,
    window: Arc<WindowTable>,
    source: SourceReader,
    rng: SmallRng,
    sample_rate: u32,
    samples_since_trigger: f64,
    events: Option<FifoProducer<GrainEvent, GRAIN_EVENT_FIFO_SIZE>>,
}

impl GranularEngine {
    /// Create a new engine, reading its source from the given reader.
    pub fn new(
        config: &EngineConfig,
        window: Arc<WindowTable>,
        source: SourceReader,
    ) -> Result<Self, Error> {
        config.validate()?;
        let controls = Arc::new(GranularControls::new());
        let pool = GrainPool::new(config.pool_capacity)?;
        let rng = SmallRng::seed_from_u64(config.seed);
        Ok(Self {
            controls,
            pool,
            window,
            source,
            rng,
            sample_rate: 44100,
            samples_since_trigger: 0.0,
            events: None,
        })
    }

    /// Send grain events to the given FIFO. When the FIFO is full, events get dropped.
    pub fn with_events(mut self, events: FifoProducer<GrainEvent, GRAIN_EVENT_FIFO_SIZE>) -> Self {
        self.events = Some(events);
        self
    }

    /// Shared, thread-safe parameters of this engine.
    pub fn controls(&self) -> Arc<GranularControls> {
        Arc::clone(&self.controls)
    }

    /// Access to the engine's grain pool, e.g. for monitoring.
    pub fn pool(&self) -> &GrainPool {
        &self.pool
    }

    /// Number of currently playing grains.
    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Write normalized positions of the playing grains, relative to the current source, into
    /// the given slice. Returns the number of written positions.
    pub fn grain_positions(&self, positions: &mut [GrainPosition]) -> usize {
        let source = self.source.load();
        let source_len = Option::as_ref(&source).map_or(0, |source| source.frame_count());
        self.pool.positions(source_len, positions)
    }

    /// Set the output sample rate. Must be called before processing and not on the audio thread.
    pub fn prepare(&mut self, sample_rate: u32) -> Result<(), Error> {
        if sample_rate == 0 {
            return Err(Error::ParameterError("Sample rate must be > 0".to_string()));
        }
        self.sample_rate = sample_rate;
        self.reset();
        Ok(())
    }

    /// Stop all grains and restart the trigger clock.
    pub fn reset(&mut self) {
        self.pool.reset();
        self.samples_since_trigger = 0.0;
    }

    /// Render one block of audio into the given stereo buffers, overwriting their content.
    pub fn process(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        modulation: &GranularModulation,
    ) {
        if self.controls.take_reset_request() {
            self.reset();
        }
        let frames = left.len().min(right.len());
        left.fill(0.0);
        right.fill(0.0);
        if frames == 0 {
            return;
        }

        let source = self.source.load();
        let mono = match &*source {
            Some(source) if !source.is_empty() => source.mono(),
            _ => {
                if self.pool.active_count() > 0 {
                    self.pool.reset();
                }
                return;
            }
        };

        let parameters = self.controls.resolve(modulation);
        self.trigger_grains(frames, mono.len(), &parameters);
        self.pool.process(
            mono,
            &self.window,
            &mut left[..frames],
            &mut right[..frames],
        );
    }

    /// Advance the trigger clock by a block of frames and spawn all grains which got due.
    fn trigger_grains(&mut self, frames: usize, source_len: usize, parameters: &ResolvedParameters) {
        let interval = self.sample_rate as f64 / parameters.rate as f64;
        self.samples_since_trigger += frames as f64;

        let max_triggers = self.pool.capacity();
        let mut triggered = 0;
        while self.samples_since_trigger >= interval {
            if triggered >= max_triggers {
                // drop the backlog of pathologically high rates
                self.samples_since_trigger %= interval;
                break;
            }
            self.samples_since_trigger -= interval;
            let onset = (frames as f64 - self.samples_since_trigger)
                .floor()
                .clamp(0.0, (frames - 1) as f64) as u32;
            self.trigger_grain(onset, source_len, parameters);
            triggered += 1;
        }
    }

    fn trigger_grain(&mut self, onset: u32, source_len: usize, parameters: &ResolvedParameters) {
        let Some(slot) = self.pool.allocate_or_evict() else {
            return;
        };

        let position = (parameters.position
            + parameters.position_spread * self.rng.random_range(-1.0f32..=1.0))
        .clamp(0.0, 1.0);
        let start = (position as f64 * source_len as f64).min((source_len - 1) as f64);
        let semitones = parameters.pitch_spread * self.rng.random_range(-1.0f32..=1.0);
        let pitch = parameters.pitch * 2.0f32.powf(semitones / 12.0);
        let pan = parameters.pan_spread * self.rng.random_range(-1.0f32..=1.0);
        let duration = (parameters.duration_ms * self.sample_rate as f32 / 1000.0).max(1.0);

        self.pool.spawn(
            slot,
            GrainSpawn {
                start,
                pitch: pitch as f64,
                duration,
                amplitude: GRAIN_AMPLITUDE,
                pan,
                onset,
            },
        );

        if let Some(events) = self.events.as_mut() {
            let _ = events.push(GrainEvent {
                slot,
                start: position,
                pitch,
                pan,
            });
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{fifo, source_buffer_channel, SourceBuffer, SourcePublisher};

    fn sine(frames: usize) -> SourceBuffer {
        let data = (0..frames)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 48000.0).sin())
            .collect();
        SourceBuffer::new(vec![data], 48000).unwrap()
    }

    fn engine(seed: u64) -> (GranularEngine, SourcePublisher) {
        let (publisher, reader) = source_buffer_channel();
        let config = EngineConfig {
            seed,
            ..EngineConfig::default()
        };
        let mut engine =
            GranularEngine::new(&config, Arc::new(WindowTable::default()), reader).unwrap();
        engine.prepare(48000).unwrap();
        (engine, publisher)
    }

    #[test]
    fn config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        let config = EngineConfig {
            pool_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        let config = EngineConfig {
            window_size: 1,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn controls_clamp_and_lookup() {
        let controls = GranularControls::new();
        controls.set_rate(0.0);
        assert_eq!(controls.parameter(GRAIN_RATE).unwrap().value(), 0.1);
        controls.set_duration(1e6);
        assert_eq!(controls.parameter(GRAIN_DURATION).unwrap().value(), 2000.0);
        controls.set_pitch(-1.0);
        assert_eq!(controls.parameter(GRAIN_PITCH).unwrap().value(), 0.125);
        assert!(controls.parameter(FourCC(*b"none")).is_none());

        let mut modulation = GranularModulation::default();
        *modulation.offset_mut(GRAIN_POSITION).unwrap() = 10.0;
        let resolved = controls.resolve(&modulation);
        assert_eq!(resolved.position, 1.0);
    }

    #[test]
    fn silence_without_source() {
        let (mut engine, _publisher) = engine(1);
        let (mut left, mut right) = (vec![1.0; 256], vec![1.0; 256]);
        for _ in 0..100 {
            engine.process(&mut left, &mut right, &GranularModulation::default());
        }
        assert!(left.iter().chain(right.iter()).all(|v| *v == 0.0));
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn silence_with_empty_source() {
        let (mut engine, mut publisher) = engine(1);
        publisher.publish(SourceBuffer::new(vec![vec![]], 48000).unwrap());
        let (mut left, mut right) = (vec![0.0; 256], vec![0.0; 256]);
        engine.process(&mut left, &mut right, &GranularModulation::default());
        assert!(left.iter().chain(right.iter()).all(|v| *v == 0.0));
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn active_count_stabilizes() {
        let (mut engine, mut publisher) = engine(42);
        publisher.publish(sine(48000));
        let controls = engine.controls();
        controls.set_rate(100.0);
        controls.set_duration(50.0);

        let (mut left, mut right) = (vec![0.0; 128], vec![0.0; 128]);
        let mut max_active = 0;
        for block in 0..10_000 {
            engine.process(&mut left, &mut right, &GranularModulation::default());
            if block > 100 {
                max_active = max_active.max(engine.active_count());
                assert!((4..=6).contains(&engine.active_count()));
            }
        }
        assert!(max_active <= 512);
        assert!(left.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn pathological_rates_are_bounded() {
        let (mut engine, mut publisher) = engine(3);
        publisher.publish(sine(4800));
        let controls = engine.controls();
        controls.set_rate(1000.0);
        controls.set_duration(2000.0);
        let (mut left, mut right) = (vec![0.0; 4096], vec![0.0; 4096]);
        for _ in 0..20 {
            engine.process(&mut left, &mut right, &GranularModulation::default());
            assert!(engine.active_count() <= engine.pool().capacity());
        }
        assert!(left.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn reset_requests_apply_on_next_block() {
        let (mut engine, mut publisher) = engine(7);
        publisher.publish(sine(48000));
        let (mut left, mut right) = (vec![0.0; 512], vec![0.0; 512]);
        for _ in 0..20 {
            engine.process(&mut left, &mut right, &GranularModulation::default());
        }
        assert!(engine.active_count() > 0);

        engine.controls().request_reset();
        assert!(engine.active_count() > 0);
        engine.controls().set_rate(0.1);
        engine.process(&mut left, &mut right, &GranularModulation::default());
        assert_eq!(engine.active_count(), 0);
        assert!(left.iter().chain(right.iter()).all(|v| *v == 0.0));
    }

    #[test]
    fn same_seed_renders_same_output() {
        let render = |seed| {
            let (mut engine, mut publisher) = engine(seed);
            publisher.publish(sine(48000));
            engine.controls().set_pitch_spread(12.0);
            let (mut left, mut right) = (vec![0.0; 256], vec![0.0; 256]);
            let mut output = Vec::new();
            for _ in 0..50 {
                engine.process(&mut left, &mut right, &GranularModulation::default());
                output.extend_from_slice(&left);
            }
            output
        };
        assert_eq!(render(5), render(5));
        assert_ne!(render(5), render(6));
    }

    #[test]
    fn grain_events_are_sent() {
        let (producer, mut consumer) = fifo::<GrainEvent, GRAIN_EVENT_FIFO_SIZE>();
        let (engine, mut publisher) = engine(9);
        let mut engine = engine.with_events(producer);
        publisher.publish(sine(48000));
        engine.controls().set_rate(1000.0);
        engine.controls().set_pan_spread(0.0);
        let (mut left, mut right) = (vec![0.0; 480], vec![0.0; 480]);
        engine.process(&mut left, &mut right, &GranularModulation::default());
        let events = consumer.by_ref().collect::<Vec<_>>();
        assert_eq!(events.len(), 10);
        assert!(events.iter().all(|e| e.pan == 0.0 && (0.0..=1.0).contains(&e.start)));
    }

    #[test]
    fn grain_positions_are_normalized() {
        let (mut engine, mut publisher) = engine(11);
        publisher.publish(sine(48000));
        engine.controls().set_position(0.25);
        engine.controls().set_position_spread(0.0);
        let (mut left, mut right) = (vec![0.0; 1024], vec![0.0; 1024]);
        for _ in 0..10 {
            engine.process(&mut left, &mut right, &GranularModulation::default());
        }
        let mut positions = [GrainPosition::default(); 16];
        let count = engine.grain_positions(&mut positions);
        assert_eq!(count, engine.active_count().min(16));
        assert!(count > 0);
        for grain in &positions[..count] {
            assert_eq!(grain.start, 0.25);
            assert!(grain.position >= 0.25 && grain.position <= 1.0);
        }
    }
}
