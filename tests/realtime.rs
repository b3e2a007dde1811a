//! Checks that rendering an instrument never allocates on the audio thread.

use pixelgrain::{
    modulation::{ImageFeature, ImageModulationData, ModulationRoute, ModulationSource},
    sync::SourceBuffer,
    Instrument, InstrumentConfig, SpectralConfig, SpectralMode, GRAIN_PITCH, GRAIN_POSITION,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

fn sine_source(frequency: f32, frames: usize) -> SourceBuffer {
    let data = (0..frames)
        .map(|i| (i as f32 * frequency * std::f32::consts::TAU / 48000.0).sin())
        .collect::<Vec<_>>();
    SourceBuffer::new(vec![data.clone(), data], 48000).unwrap()
}

fn process(instrument: &mut Instrument, output: &mut [f32]) {
    #[cfg(feature = "assert-allocs")]
    assert_no_alloc::assert_no_alloc(|| instrument.process(output));
    #[cfg(not(feature = "assert-allocs"))]
    instrument.process(output);
}

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
fn allocation_violations() -> u32 {
    assert_no_alloc::violation_count()
}

#[cfg(not(all(debug_assertions, feature = "assert-allocs")))]
fn allocation_violations() -> u32 {
    0
}

// -------------------------------------------------------------------------------------------------

#[test]
fn instrument_renders_without_allocations() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init();

    let config = InstrumentConfig {
        spectral: SpectralConfig { fft_order: 10 },
        grain_events: true,
        modulation_sources: vec![
            ModulationSource::random(4.0),
            ModulationSource::macro_value(0.0),
            ModulationSource::image(ImageFeature::PositionX),
        ],
        modulation_routes: vec![ModulationRoute::new(0, GRAIN_PITCH, 0.01)],
        ..InstrumentConfig::default()
    };
    let (mut instrument, mut handle) = Instrument::new(config).unwrap();
    instrument.prepare(48000, 256).unwrap();

    let violations = allocation_violations();

    // render silence without a source
    let mut output = vec![0.0; 2 * 256];
    for _ in 0..10 {
        process(&mut instrument, &mut output);
    }
    assert!(output.iter().all(|s| *s == 0.0));

    // render grains from a source
    handle.granular().set_rate(80.0);
    handle.granular().set_pan_spread(0.5);
    handle.set_source(sine_source(220.0, 48000));
    let mut peak = 0.0_f32;
    for _ in 0..100 {
        process(&mut instrument, &mut output);
        peak = output.iter().fold(peak, |peak, s| peak.max(s.abs()));
    }
    assert!(peak > 0.01);
    assert!(handle.grain_events().count() > 0);

    // change modulation, spectral settings and the source while rendering
    handle.controls().set_spectral_enabled(true);
    for mode in [
        SpectralMode::FrequencyMask,
        SpectralMode::SpectralBlur,
        SpectralMode::SpectralFreeze,
        SpectralMode::PitchShift,
        SpectralMode::FormantShift,
    ] {
        handle.spectral().set_mode(mode);
        handle.spectral().set_freeze_enabled(mode == SpectralMode::SpectralFreeze);
        handle.set_mask(&[1.0, 0.5, 0.0]);
        handle.publish_image_data(ImageModulationData {
            position: [0.25, 0.75],
            frame_number: 1,
            ..ImageModulationData::default()
        });
        assert!(handle.set_macro(1, 0.5));
        assert!(handle.update_route(2, GRAIN_POSITION, 0.5));
        for _ in 0..20 {
            process(&mut instrument, &mut output);
            assert!(output.iter().all(|s| s.is_finite()));
        }
    }

    handle.set_source(sine_source(440.0, 1000));
    handle.granular().request_reset();
    for _ in 0..20 {
        process(&mut instrument, &mut output);
    }
    assert!(output.iter().all(|s| s.is_finite()));

    handle.clear_source();
    handle.controls().set_spectral_enabled(false);
    for _ in 0..20 {
        process(&mut instrument, &mut output);
    }
    assert!(output.iter().all(|s| *s == 0.0));
    handle.collect_garbage();

    assert_eq!(allocation_violations(), violations);
}
