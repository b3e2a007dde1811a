//! Complete granular instrument: grains, spectral processing, modulation and output gain,
//! together with a thread-safe handle for control, image and monitoring threads.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use four_cc::FourCC;

use crate::{
    granular::{
        EngineConfig, GrainEvent, GrainPosition, GranularControls, GranularEngine,
        GranularModulation, GRAIN_EVENT_FIFO_SIZE,
    },
    modulation::{
        ImageModulationData, ModulationMatrix, ModulationRoute, ModulationSource, ModulationTarget,
    },
    parameter::{FloatParameter, SharedFloatParameter},
    spectral::{
        SpectralConfig, SpectralControls, SpectralMaskSender, StereoSpectralProcessor,
        SPECTRAL_BLUR,
    },
    sync::{
        fifo, source_buffer_channel, triple_buffer, FifoConsumer, FifoProducer, SourceBuffer,
        SourcePublisher, TripleBufferInput, TripleBufferOutput,
    },
    utils::{
        buffer::{sanitize_buffer, stereo_to_interleaved},
        db_to_linear,
        smoothed::{apply_smoothed_stereo_gain, LinearSmoothedValue, SmoothedValue},
        window::WindowTable,
        zeroed_buffer,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Output gain parameter id.
pub const OUTPUT_GAIN: FourCC = FourCC(*b"gain");

/// Number of slots in the modulation command FIFO.
const MODULATION_COMMAND_FIFO_SIZE: usize = 64;

// -------------------------------------------------------------------------------------------------

/// Construction time configuration of an [`Instrument`].
#[derive(Debug, Clone, Default)]
pub struct InstrumentConfig {
    pub engine: EngineConfig,
    pub spectral: SpectralConfig,
    /// Send [`GrainEvent`]s to the [`InstrumentHandle`].
    pub grain_events: bool,
    /// Modulation sources, addressed by their index in routes.
    pub modulation_sources: Vec<ModulationSource>,
    /// Initial modulation routes.
    pub modulation_routes: Vec<ModulationRoute>,
}

impl InstrumentConfig {
    /// Validate all config values.
    pub fn validate(&self) -> Result<(), Error> {
        self.engine.validate()?;
        self.spectral.validate()?;
        if self.modulation_routes.len() > ModulationMatrix::MAX_ROUTES {
            return Err(Error::ParameterError(format!(
                "Too many modulation routes: {} (max {})",
                self.modulation_routes.len(),
                ModulationMatrix::MAX_ROUTES
            )));
        }
        if let Some(route) = self
            .modulation_routes
            .iter()
            .find(|route| route.source >= self.modulation_sources.len())
        {
            return Err(Error::ParameterError(format!(
                "Modulation route to '{}' uses an invalid source index: {}",
                route.target, route.source
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Instrument wide, thread-safe parameters.
#[derive(Debug)]
pub struct InstrumentControls {
    output_gain: SharedFloatParameter,
    spectral_enabled: AtomicBool,
    reset_requested: AtomicBool,
}

impl Default for InstrumentControls {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentControls {
    pub fn new() -> Self {
        Self {
            output_gain: SharedFloatParameter::from_description(
                FloatParameter::new(OUTPUT_GAIN, "Output Gain", -60.0..=12.0, 0.0).with_unit("dB"),
            ),
            spectral_enabled: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
        }
    }

    pub fn output_gain(&self) -> &SharedFloatParameter {
        &self.output_gain
    }

    /// Set output gain in dB.
    pub fn set_output_gain(&self, gain_db: f32) {
        self.output_gain.set_value(gain_db);
    }

    pub fn spectral_enabled(&self) -> bool {
        self.spectral_enabled.load(Ordering::Relaxed)
    }

    /// Route the grains through the spectral processor or bypass it completely.
    pub fn set_spectral_enabled(&self, enabled: bool) {
        if self.spectral_enabled.swap(enabled, Ordering::Relaxed) != enabled {
            log::debug!(
                "Spectral processing {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    /// Request a reset of the whole instrument from any thread: stops all grains and clears the
    /// spectral accumulators and modulation states. Applied at the start of the next processed
    /// block.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
        log::debug!("Instrument reset requested");
    }

    fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }
}

// -------------------------------------------------------------------------------------------------

/// Monitoring snapshot, published by the audio thread after each processed block.
#[derive(Debug, Clone, Default)]
pub struct GrainSnapshot {
    active_count: usize,
    grains: Vec<GrainPosition>,
    grain_count: usize,
}

impl GrainSnapshot {
    fn with_capacity(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            active_count: 0,
            grains: zeroed_buffer(capacity)?,
            grain_count: 0,
        })
    }

    /// Number of playing grains.
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Normalized positions of all playing grains.
    pub fn grains(&self) -> &[GrainPosition] {
        &self.grains[..self.grain_count]
    }
}

// -------------------------------------------------------------------------------------------------

/// Modulation changes, sent from the handle to the audio thread.
#[derive(Debug, Clone, Copy)]
enum ModulationCommand {
    SetMacro { source: usize, value: f32 },
    UpdateRoute { source: usize, target: FourCC, depth: f32 },
    ClearRoutes,
}

// -------------------------------------------------------------------------------------------------

/// Audio thread side of the instrument: renders interleaved stereo output.
///
/// Call [`Self::prepare`] from a non real-time thread before processing. [`Self::process`]
/// never allocates, locks or logs.
pub struct Instrument {
    engine: GranularEngine,
    spectral: StereoSpectralProcessor,
    spectral_active: bool,
    matrix: ModulationMatrix,
    granular_controls: Arc<GranularControls>,
    controls: Arc<InstrumentControls>,
    gain: LinearSmoothedValue,
    image: TripleBufferOutput<ImageModulationData>,
    snapshots: TripleBufferInput<GrainSnapshot>,
    commands: FifoConsumer<ModulationCommand, MODULATION_COMMAND_FIFO_SIZE>,
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
    max_block_frames: usize,
}

impl Instrument {
    /// Default max block size, until [`Self::prepare`] set another one.
    pub const DEFAULT_MAX_BLOCK_FRAMES: usize = 512;

    /// Create a new instrument and its control handle.
    pub fn new(config: InstrumentConfig) -> Result<(Self, InstrumentHandle), Error> {
        config.validate()?;

        let window = Arc::new(WindowTable::new(config.engine.window_size)?);
        let (source_publisher, source_reader) = source_buffer_channel();
        let mut engine = GranularEngine::new(&config.engine, window, source_reader)?;
        let events = if config.grain_events {
            let (producer, consumer) = fifo::<GrainEvent, GRAIN_EVENT_FIFO_SIZE>();
            engine = engine.with_events(producer);
            Some(consumer)
        } else {
            None
        };
        let granular_controls = engine.controls();

        let (spectral, mask_sender) = StereoSpectralProcessor::new(&config.spectral)?;
        let spectral_controls = spectral.controls();
        let controls = Arc::new(InstrumentControls::new());

        let mut matrix = ModulationMatrix::new(config.engine.seed);
        for parameter in granular_controls.parameters() {
            matrix.add_target(ModulationTarget::from_parameter(parameter.description()));
        }
        if let Some(blur) = spectral_controls.parameter(SPECTRAL_BLUR) {
            matrix.add_target(ModulationTarget::from_parameter(blur.description()));
        }
        matrix.add_target(ModulationTarget::from_parameter(
            controls.output_gain().description(),
        ));
        for source in config.modulation_sources {
            matrix.add_source(source);
        }
        for route in config.modulation_routes {
            matrix.add_route(route)?;
        }

        let (image_input, image_output) = triple_buffer(ImageModulationData::default());
        let snapshot = GrainSnapshot::with_capacity(config.engine.pool_capacity)?;
        let (snapshot_input, snapshot_output) = triple_buffer(snapshot);
        let (command_producer, command_consumer) =
            fifo::<ModulationCommand, MODULATION_COMMAND_FIFO_SIZE>();

        let sample_rate = engine.sample_rate();
        let instrument = Self {
            engine,
            spectral,
            spectral_active: false,
            matrix,
            granular_controls: Arc::clone(&granular_controls),
            controls: Arc::clone(&controls),
            gain: LinearSmoothedValue::new(1.0, sample_rate),
            image: image_output,
            snapshots: snapshot_input,
            commands: command_consumer,
            left: zeroed_buffer(Self::DEFAULT_MAX_BLOCK_FRAMES)?,
            right: zeroed_buffer(Self::DEFAULT_MAX_BLOCK_FRAMES)?,
            sample_rate,
            max_block_frames: Self::DEFAULT_MAX_BLOCK_FRAMES,
        };
        let handle = InstrumentHandle {
            granular: granular_controls,
            spectral: spectral_controls,
            controls,
            source: source_publisher,
            mask: mask_sender,
            image: image_input,
            snapshots: snapshot_output,
            events,
            commands: command_producer,
        };
        Ok((instrument, handle))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_block_frames(&self) -> usize {
        self.max_block_frames
    }

    /// Latency in frames, which the spectral processor currently adds.
    pub fn latency(&self) -> usize {
        if self.controls.spectral_enabled() {
            self.spectral.latency()
        } else {
            0
        }
    }

    /// Prepare for processing with the given sample rate and max block size.
    /// Must not be called on the audio thread: this may allocate.
    pub fn prepare(&mut self, sample_rate: u32, max_block_frames: usize) -> Result<(), Error> {
        if max_block_frames == 0 {
            return Err(Error::ParameterError(
                "Max block size must be > 0".to_string(),
            ));
        }
        self.engine.prepare(sample_rate)?;
        self.left = zeroed_buffer(max_block_frames)?;
        self.right = zeroed_buffer(max_block_frames)?;
        self.sample_rate = sample_rate;
        self.max_block_frames = max_block_frames;
        self.matrix.set_sample_rate(sample_rate);
        self.gain.set_sample_rate(sample_rate);
        self.reset();
        log::info!(
            "Prepared instrument: {sample_rate} Hz, max {max_block_frames} frames per block"
        );
        Ok(())
    }

    /// Stop all grains and clear all processing states.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.spectral.reset();
        self.matrix.reset();
        let gain = self.target_gain();
        self.gain.init(gain);
    }

    /// Render interleaved stereo frames into `output`, overwriting its content.
    pub fn process(&mut self, output: &mut [f32]) {
        if self.controls.take_reset_request() {
            self.reset();
        }
        let frames = output.len() / 2;
        let (frames_output, remainder) = output.split_at_mut(frames * 2);
        remainder.fill(0.0);
        for chunk in frames_output.chunks_mut(self.max_block_frames * 2) {
            self.process_block(chunk);
        }
    }

    fn process_block(&mut self, output: &mut [f32]) {
        let frames = output.len() / 2;

        self.apply_modulation_commands();
        if let Some(image) = self.image.read() {
            self.matrix.set_image_data(*image);
        }
        self.matrix.process(frames);

        let mut modulation = GranularModulation::default();
        for parameter in self.granular_controls.parameters() {
            let id = parameter.description().id();
            if let Some(offset) = modulation.offset_mut(id) {
                *offset = self.matrix.offset(id);
            }
        }

        let left = &mut self.left[..frames];
        let right = &mut self.right[..frames];
        self.engine.process(left, right, &modulation);

        if self.controls.spectral_enabled() {
            if !self.spectral_active {
                self.spectral.reset();
                self.spectral_active = true;
            }
            self.spectral
                .process(left, right, self.matrix.offset(SPECTRAL_BLUR));
        } else {
            self.spectral_active = false;
        }
        sanitize_buffer(left);
        sanitize_buffer(right);

        stereo_to_interleaved(left, right, output);
        let gain = self.target_gain();
        self.gain.set_target(gain);
        apply_smoothed_stereo_gain(output, &mut self.gain);

        self.publish_snapshot();
    }

    fn target_gain(&self) -> f32 {
        let parameter = self.controls.output_gain();
        let gain_db = parameter
            .description()
            .clamp_value(parameter.value() + self.matrix.offset(OUTPUT_GAIN));
        if gain_db <= *parameter.description().range().start() {
            0.0
        } else {
            db_to_linear(gain_db)
        }
    }

    fn apply_modulation_commands(&mut self) {
        while let Some(command) = self.commands.pop() {
            match command {
                ModulationCommand::SetMacro { source, value } => {
                    if let Some(source) = self.matrix.source_mut(source) {
                        source.set_macro_value(value);
                    }
                }
                ModulationCommand::UpdateRoute {
                    source,
                    target,
                    depth,
                } => {
                    self.matrix.update_route(source, target, depth);
                }
                ModulationCommand::ClearRoutes => self.matrix.clear_routes(),
            }
        }
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.snapshots.input_buffer();
        snapshot.active_count = self.engine.active_count();
        snapshot.grain_count = self.engine.grain_positions(&mut snapshot.grains);
        self.snapshots.publish();
    }
}

// -------------------------------------------------------------------------------------------------

/// Control side of an [`Instrument`], used from UI, image analysis or GPU threads.
pub struct InstrumentHandle {
    granular: Arc<GranularControls>,
    spectral: Arc<SpectralControls>,
    controls: Arc<InstrumentControls>,
    source: SourcePublisher,
    mask: SpectralMaskSender,
    image: TripleBufferInput<ImageModulationData>,
    snapshots: TripleBufferOutput<GrainSnapshot>,
    events: Option<FifoConsumer<GrainEvent, GRAIN_EVENT_FIFO_SIZE>>,
    commands: FifoProducer<ModulationCommand, MODULATION_COMMAND_FIFO_SIZE>,
}

impl InstrumentHandle {
    /// Granular parameters and reset requests.
    pub fn granular(&self) -> Arc<GranularControls> {
        Arc::clone(&self.granular)
    }

    /// Spectral mode and parameters.
    pub fn spectral(&self) -> Arc<SpectralControls> {
        Arc::clone(&self.spectral)
    }

    /// Output gain and spectral enable state.
    pub fn controls(&self) -> Arc<InstrumentControls> {
        Arc::clone(&self.controls)
    }

    /// Replace the source buffer grains play from.
    pub fn set_source(&mut self, source: SourceBuffer) {
        self.source.publish(source);
    }

    /// Remove the source buffer. The instrument then renders silence.
    pub fn clear_source(&mut self) {
        self.source.clear();
    }

    /// Free replaced source buffers which no longer are used by the audio thread.
    pub fn collect_garbage(&mut self) {
        self.source.collect();
    }

    /// Publish a frequency mask of any length.
    pub fn set_mask(&mut self, mask: &[f32]) {
        self.mask.set_mask(mask);
    }

    /// Publish a frequency mask from a `width x height` brightness image.
    pub fn apply_image_mask(&mut self, data: &[f32], width: usize, height: usize) {
        self.mask.apply_image_mask(data, width, height);
    }

    /// Publish new image analysis data for image modulation sources.
    pub fn publish_image_data(&mut self, data: ImageModulationData) {
        self.image.write(data);
    }

    /// Direct access to the image data triple buffer, e.g. to hand it to an analysis thread.
    pub fn image_input(&mut self) -> &mut TripleBufferInput<ImageModulationData> {
        &mut self.image
    }

    /// The most recent grain snapshot, if a new one got published since the last call.
    pub fn grain_snapshot(&mut self) -> Option<&GrainSnapshot> {
        self.snapshots.read()
    }

    /// Pop all pending grain events. Empty when grain events are disabled.
    pub fn grain_events(&mut self) -> impl Iterator<Item = GrainEvent> + '_ {
        self.events.iter_mut().flatten()
    }

    /// Set the value of a macro modulation source. Returns false when the command queue is full.
    pub fn set_macro(&mut self, source: usize, value: f32) -> bool {
        self.send(ModulationCommand::SetMacro { source, value })
    }

    /// Set, add or remove (depth 0) a modulation route. Returns false when the command queue
    /// is full. Invalid routes get ignored by the audio thread.
    pub fn update_route(&mut self, source: usize, target: FourCC, depth: f32) -> bool {
        self.send(ModulationCommand::UpdateRoute {
            source,
            target,
            depth,
        })
    }

    /// Remove all modulation routes.
    pub fn clear_routes(&mut self) -> bool {
        self.send(ModulationCommand::ClearRoutes)
    }

    fn send(&mut self, command: ModulationCommand) -> bool {
        if self.commands.push(command).is_err() {
            log::warn!("Modulation command queue is full, dropping {command:?}");
            return false;
        }
        true
    }
}

// -------------------------------------------------------------------------------------------------
