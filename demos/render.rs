//! Renders a granular cloud with spectral processing from a synthesized source into a wav file.

use std::{error, f32::consts::PI, path::PathBuf};

use arg::{parse_args, Args};
use rand::{rngs::SmallRng, Rng, SeedableRng};

use pixelgrain::{
    modulation::{
        ImageFeature, ImageModulationData, Lfo, LfoWaveform, ModulationRoute, ModulationSource,
    },
    sync::SourceBuffer,
    Instrument, InstrumentConfig, SpectralMode, GRAIN_DURATION, GRAIN_POSITION,
    SPECTRAL_BLUR,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

const SAMPLE_RATE: u32 = 48000;
const BLOCK_FRAMES: usize = 256;

// Grain parameters (tweak as needed!)
const GRAIN_RATE: f32 = 40.0; // grains per second
const GRAIN_DURATION_MS: f32 = 120.0;
const GRAIN_POSITION_SPREAD: f32 = 0.1;
const GRAIN_PITCH_SPREAD: f32 = 3.0; // semitones
const GRAIN_PAN_SPREAD: f32 = 0.6;

// Modulation parameters
const MOD_LFO_RATE: f64 = 0.2; // Hz
const MOD_LFO_TO_POSITION: f32 = 0.4;
const MOD_RANDOM_RATE: f32 = 3.0; // Hz
const MOD_RANDOM_TO_DURATION: f32 = 0.05;
const MOD_BRIGHTNESS_TO_BLUR: f32 = 0.5;

// -------------------------------------------------------------------------------------------------

#[derive(Args, Debug)]
struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Write audio output into the given wav file. By default \"pixelgrain.wav\".
    output_path: Option<PathBuf>,
    #[arg(short = "d", long = "duration")]
    /// Length of the rendered file in seconds. By default 10 seconds.
    duration: Option<f32>,
    #[arg(short = "s", long = "seed")]
    /// Seed for the grain scheduler and random modulation sources.
    seed: Option<u64>,
    #[arg(short = "m", long = "mode")]
    /// Spectral mode: \"Bypass\", \"FrequencyMask\", \"SpectralBlur\", \"SpectralFreeze\",
    /// \"PitchShift\" or \"FormantShift\". By default \"SpectralBlur\".
    mode: Option<SpectralMode>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn error::Error>> {
    // Parse optional arguments
    let args = parse_args::<Arguments>();

    // Init logger
    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .init()?;

    // Create instrument with a few modulation sources
    let mut config = InstrumentConfig::default();
    if let Some(seed) = args.seed {
        config.engine.seed = seed;
    }
    let lfo = Lfo::new(MOD_LFO_RATE, LfoWaveform::Triangle);
    config.modulation_sources = vec![
        ModulationSource::lfo(lfo),
        ModulationSource::random(MOD_RANDOM_RATE),
        ModulationSource::image(ImageFeature::Brightness),
    ];
    config.modulation_routes = vec![
        ModulationRoute::new(0, GRAIN_POSITION, MOD_LFO_TO_POSITION),
        ModulationRoute::new(1, GRAIN_DURATION, MOD_RANDOM_TO_DURATION),
        ModulationRoute::new(2, SPECTRAL_BLUR, MOD_BRIGHTNESS_TO_BLUR),
    ];
    let (mut instrument, mut handle) = Instrument::new(config)?;
    instrument.prepare(SAMPLE_RATE, BLOCK_FRAMES)?;

    // Set up grain and spectral parameters
    let granular = handle.granular();
    granular.set_rate(GRAIN_RATE);
    granular.set_duration(GRAIN_DURATION_MS);
    granular.set_position_spread(GRAIN_POSITION_SPREAD);
    granular.set_pitch_spread(GRAIN_PITCH_SPREAD);
    granular.set_pan_spread(GRAIN_PAN_SPREAD);

    let spectral = handle.spectral();
    spectral.set_mode(args.mode.unwrap_or(SpectralMode::SpectralBlur));
    spectral.set_pitch_shift(7.0);
    spectral.set_formant_shift(-3.0);
    handle.controls().set_spectral_enabled(true);

    // Shape the spectrum with a mask which fades out the upper bins
    let mask = (0..64).map(|i| 1.0 - i as f32 / 64.0).collect::<Vec<_>>();
    handle.set_mask(&mask);

    handle.set_source(create_source(SAMPLE_RATE)?);

    // Open output file
    let output_path = args
        .output_path
        .unwrap_or_else(|| PathBuf::from("pixelgrain.wav"));
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&output_path, spec)?;

    // Render
    let total_frames = (args.duration.unwrap_or(10.0).max(0.0) * SAMPLE_RATE as f32) as usize;
    let mut buffer = vec![0.0; BLOCK_FRAMES * 2];
    let mut rendered_frames = 0;
    let mut frame_number = 0;
    while rendered_frames < total_frames {
        let frames = BLOCK_FRAMES.min(total_frames - rendered_frames);
        let output = &mut buffer[..frames * 2];

        // Fake an image analysis which runs at ~30 fps
        if rendered_frames % (SAMPLE_RATE as usize / 30) < frames {
            frame_number += 1;
            let time = rendered_frames as f32 / SAMPLE_RATE as f32;
            handle.publish_image_data(ImageModulationData {
                brightness: 0.5 + 0.5 * (2.0 * PI * 0.1 * time).sin(),
                frame_number,
                ..ImageModulationData::default()
            });
        }

        #[cfg(feature = "assert-allocs")]
        assert_no_alloc::assert_no_alloc(|| instrument.process(output));
        #[cfg(not(feature = "assert-allocs"))]
        instrument.process(output);

        for sample in output.iter() {
            writer.write_sample(*sample)?;
        }

        // Log grain activity once per second
        if rendered_frames % (SAMPLE_RATE as usize) < frames {
            if let Some(snapshot) = handle.grain_snapshot() {
                log::debug!("{} active grains", snapshot.active_count());
            }
            handle.collect_garbage();
        }
        rendered_frames += frames;
    }
    writer.finalize()?;

    log::info!(
        "Rendered {:.2} seconds into '{}'",
        rendered_frames as f32 / SAMPLE_RATE as f32,
        output_path.display()
    );
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// Create a 4 second long stereo source with a slowly rising chord and a bit of noise.
fn create_source(sample_rate: u32) -> Result<SourceBuffer, pixelgrain::Error> {
    let frame_count = sample_rate as usize * 4;
    let mut rng = SmallRng::seed_from_u64(0x1234_5678);
    let mut left = Vec::with_capacity(frame_count);
    let mut right = Vec::with_capacity(frame_count);
    for frame in 0..frame_count {
        let time = frame as f32 / sample_rate as f32;
        let glide = 1.0 + 0.25 * time / 4.0;
        let tone = [220.0, 277.18, 329.63]
            .iter()
            .map(|frequency| (2.0 * PI * frequency * glide * time).sin())
            .sum::<f32>()
            / 3.0;
        let noise = rng.random_range(-1.0..=1.0_f32);
        left.push(0.8 * tone + 0.05 * noise);
        right.push(0.8 * tone - 0.05 * noise);
    }
    SourceBuffer::new(vec![left, right], sample_rate)
}
