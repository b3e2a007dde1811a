use std::sync::Arc;

use basedrop::{Collector, Shared, SharedCell};

use crate::{
    utils::{buffer::mixdown_to_mono, zeroed_buffer},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// An immutable, in memory multichannel sample buffer which grains read from.
///
/// Holds the planar channel data, the source's native sample rate and a mono mixdown, which is
/// what grains actually play back. Resampling to the engine rate is up to the caller.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    mono: Box<[f32]>,
}

impl SourceBuffer {
    /// Create a new source buffer from planar channel data.
    ///
    /// All channels must have the same length. Zero-length channels are valid and play silence.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, Error> {
        if channels.is_empty() {
            return Err(Error::InvalidSourceBuffer(
                "Need at least one channel".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidSourceBuffer(
                "Sample rate must be > 0".to_string(),
            ));
        }
        let frame_count = channels[0].len();
        if let Some(channel) = channels.iter().position(|c| c.len() != frame_count) {
            return Err(Error::InvalidSourceBuffer(format!(
                "Channel {channel} has {} frames, but channel 0 has {frame_count}",
                channels[channel].len()
            )));
        }
        let mut mono = zeroed_buffer::<f32>(frame_count)?;
        mixdown_to_mono(&channels, &mut mono);
        Ok(Self {
            channels,
            sample_rate,
            mono: mono.into_boxed_slice(),
        })
    }

    /// Create a new source buffer from interleaved sample data.
    pub fn from_interleaved(
        interleaved: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, Error> {
        if channel_count == 0 || interleaved.len() % channel_count != 0 {
            return Err(Error::InvalidSourceBuffer(format!(
                "Interleaved buffer of len {} doesn't fit {channel_count} channels",
                interleaved.len()
            )));
        }
        let frame_count = interleaved.len() / channel_count;
        let mut channels = Vec::with_capacity(channel_count);
        for channel in 0..channel_count {
            let mut data = zeroed_buffer::<f32>(frame_count)?;
            for (frame, sample) in data.iter_mut().enumerate() {
                *sample = interleaved[frame * channel_count + channel];
            }
            channels.push(data);
        }
        Self::new(channels, sample_rate)
    }

    /// The source's native sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.mono.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mono.is_empty()
    }

    /// Planar channel data.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Mono mixdown of all channels, which grains play back.
    pub fn mono(&self) -> &[f32] {
        &self.mono
    }
}

// -------------------------------------------------------------------------------------------------

/// Create a new source buffer publisher and reader pair. Initially no source is set.
///
/// Publishing swaps an atomic pointer (RCU style): the audio thread never waits for the
/// publisher, and buffers which got replaced are freed by the publisher's garbage collector,
/// once the audio thread released its last reference to them.
pub fn source_buffer_channel() -> (SourcePublisher, SourceReader) {
    let collector = Collector::new();
    let cell = Arc::new(SharedCell::new(Shared::new(&collector.handle(), None)));
    let publisher = SourcePublisher {
        collector,
        cell: Arc::clone(&cell),
    };
    let reader = SourceReader { cell };
    (publisher, reader)
}

// -------------------------------------------------------------------------------------------------

/// Non real-time side of a [`source_buffer_channel`].
pub struct SourcePublisher {
    collector: Collector,
    cell: Arc<SharedCell<Option<SourceBuffer>>>,
}

impl SourcePublisher {
    /// Publish a new source buffer. Grains which still play the old one keep reading it until
    /// the reader picks up the new one on its next block.
    pub fn publish(&mut self, source: SourceBuffer) {
        log::info!(
            "Publishing new source buffer: {} channels, {} frames @ {} Hz",
            source.channel_count(),
            source.frame_count(),
            source.sample_rate()
        );
        self.swap(Some(source));
    }

    /// Remove the current source buffer. The engine then outputs silence.
    pub fn clear(&mut self) {
        log::info!("Clearing source buffer");
        self.swap(None);
    }

    /// Free all replaced buffers which no longer are referenced by the audio thread.
    /// Should be called regularly from a non real-time thread.
    pub fn collect(&mut self) {
        self.collector.collect();
    }

    fn swap(&mut self, source: Option<SourceBuffer>) {
        let shared = Shared::new(&self.collector.handle(), source);
        self.cell.set(shared);
        self.collector.collect();
    }
}

// -------------------------------------------------------------------------------------------------

/// Audio thread side of a [`source_buffer_channel`].
#[derive(Clone)]
pub struct SourceReader {
    cell: Arc<SharedCell<Option<SourceBuffer>>>,
}

impl SourceReader {
    /// Get a reference counted handle to the currently published source, if any.
    /// Dropping the handle never frees memory: freeing is deferred to the publisher.
    pub fn load(&self) -> Shared<Option<SourceBuffer>> {
        self.cell.get()
    }
}

// -------------------------------------------------------------------------------------------------
