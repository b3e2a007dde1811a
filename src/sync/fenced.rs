use std::{
    cell::UnsafeCell,
    ops::Deref,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
};

use crossbeam_utils::CachePadded;

use crate::{utils::zeroed_buffer, Error};

// -------------------------------------------------------------------------------------------------

/// Result of a non-blocking GPU fence query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum FenceStatus {
    /// The GPU finished all work the fence was guarding.
    Signaled,
    /// The GPU still is busy.
    Pending,
    /// The query failed. Treated as "not yet ready": the fence is queried again on next poll.
    Failed,
}

/// A GPU completion fence, e.g. a wrapped `GLsync` or Vulkan fence, inserted after the commands
/// which render or read back a frame.
///
/// Implementations must never block in `poll`.
pub trait GpuFence: Send {
    fn poll(&mut self) -> FenceStatus;
}

// -------------------------------------------------------------------------------------------------

const NO_BUFFER: u8 = u8::MAX;

struct SharedFrames {
    frames: [UnsafeCell<Box<[f32]>>; 3],
    frame_numbers: [AtomicU64; 3],
    /// Index of the most recently completed buffer or `NO_BUFFER`.
    latest: CachePadded<AtomicU8>,
    /// Index of the buffer the reader currently holds or `NO_BUFFER`.
    reading: CachePadded<AtomicU8>,
}

// SAFETY: the writer only touches buffers which are neither `latest` nor `reading`, the reader
// only touches the buffer it announced in `reading` and validated against `latest`.
unsafe impl Sync for SharedFrames {}
unsafe impl Send for SharedFrames {}

// -------------------------------------------------------------------------------------------------

/// Create a new GPU synced 3-way buffer of `f32` frames with `frame_len` values each.
///
/// The writer renders into a free buffer, then hands over the GPU fence which guards the
/// asynchronous work. Only after a [`FencedWriter::poll`] observed the fence as signaled the
/// buffer becomes visible to the reader. The reader always gets the most recently completed frame.
pub fn fenced_triple_buffer<F: GpuFence>(
    frame_len: usize,
) -> Result<(FencedWriter<F>, FencedReader), Error> {
    let shared = Arc::new(SharedFrames {
        frames: [
            UnsafeCell::new(zeroed_buffer(frame_len)?.into_boxed_slice()),
            UnsafeCell::new(zeroed_buffer(frame_len)?.into_boxed_slice()),
            UnsafeCell::new(zeroed_buffer(frame_len)?.into_boxed_slice()),
        ],
        frame_numbers: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        latest: CachePadded::new(AtomicU8::new(NO_BUFFER)),
        reading: CachePadded::new(AtomicU8::new(NO_BUFFER)),
    });
    let writer = FencedWriter {
        shared: Arc::clone(&shared),
        fences: [None, None, None],
        writing: None,
        published: None,
    };
    let reader = FencedReader { shared };
    Ok((writer, reader))
}

// -------------------------------------------------------------------------------------------------

/// Producer side of a [`fenced_triple_buffer`]. Lives on the GPU or render thread.
pub struct FencedWriter<F: GpuFence> {
    shared: Arc<SharedFrames>,
    fences: [Option<(F, u64)>; 3],
    writing: Option<usize>,
    /// Frame number of the most recently published frame.
    published: Option<u64>,
}

impl<F: GpuFence> FencedWriter<F> {
    /// Index of a buffer which can be written to: neither the latest completed buffer, nor the
    /// one the reader holds, nor one with a pending fence. `None` when all buffers are busy.
    pub fn next_write_index(&self) -> Option<usize> {
        let latest = self.shared.latest.load(Ordering::SeqCst);
        let reading = self.shared.reading.load(Ordering::SeqCst);
        (0..3).find(|&index| {
            index as u8 != latest && index as u8 != reading && self.fences[index].is_none()
        })
    }

    /// Start writing a new frame. Returns the frame's buffer, or `None` when no buffer is free,
    /// in which case the frame should be skipped.
    pub fn begin_write(&mut self) -> Option<&mut [f32]> {
        let index = self.next_write_index()?;
        self.writing = Some(index);
        // SAFETY: the buffer at index is neither published nor read
        Some(unsafe { &mut **self.shared.frames[index].get() })
    }

    /// Access the buffer which got claimed with [`Self::begin_write`], if any.
    pub fn write_buffer(&mut self) -> Option<&mut [f32]> {
        let index = self.writing?;
        // SAFETY: see `begin_write`
        Some(unsafe { &mut **self.shared.frames[index].get() })
    }

    /// Finish writing the claimed buffer. The buffer becomes readable after `fence` signaled.
    /// Returns false when there was no buffer claimed via `begin_write`.
    pub fn end_write(&mut self, fence: F, frame_number: u64) -> bool {
        match self.writing.take() {
            Some(index) => {
                self.fences[index] = Some((fence, frame_number));
                true
            }
            None => false,
        }
    }

    /// Number of written buffers which wait for their fence.
    pub fn pending_count(&self) -> usize {
        self.fences.iter().filter(|f| f.is_some()).count()
    }

    /// Non-blocking check of all pending fences. Publishes the newest completed frame and
    /// returns its frame number, if it's newer than the currently published one.
    ///
    /// Frames which complete after a newer frame got published are dropped, so the reader never
    /// steps back in time. Failed fence queries keep the buffer pending and are retried on the
    /// next poll.
    pub fn poll(&mut self) -> Option<u64> {
        let mut completed: Option<(usize, u64)> = None;
        for index in 0..3 {
            let Some((fence, frame_number)) = self.fences[index].as_mut() else {
                continue;
            };
            let frame_number = *frame_number;
            match fence.poll() {
                FenceStatus::Signaled => {
                    self.fences[index] = None;
                    if completed.is_none_or(|(_, newest)| frame_number > newest) {
                        completed = Some((index, frame_number));
                    }
                }
                FenceStatus::Pending => {}
                FenceStatus::Failed => {
                    log::debug!("GPU fence query for frame {frame_number} failed, retrying");
                }
            }
        }
        let (index, frame_number) = completed?;
        if self.published.is_some_and(|published| frame_number <= published) {
            log::debug!("Dropping frame {frame_number}: a newer frame already got published");
            return None;
        }
        self.shared.frame_numbers[index].store(frame_number, Ordering::SeqCst);
        self.shared.latest.store(index as u8, Ordering::SeqCst);
        self.published = Some(frame_number);
        Some(frame_number)
    }
}

// -------------------------------------------------------------------------------------------------

/// Consumer side of a [`fenced_triple_buffer`].
pub struct FencedReader {
    shared: Arc<SharedFrames>,
}

impl FencedReader {
    /// Acquire the most recently completed frame, if any frame got completed yet.
    /// The writer won't touch the frame until the returned guard got dropped.
    pub fn acquire_latest(&mut self) -> Option<FencedFrame<'_>> {
        let shared = &*self.shared;
        loop {
            let latest = shared.latest.load(Ordering::SeqCst);
            if latest == NO_BUFFER {
                return None;
            }
            // announce, then validate that the buffer still is the latest one
            shared.reading.store(latest, Ordering::SeqCst);
            if shared.latest.load(Ordering::SeqCst) == latest {
                let index = latest as usize;
                return Some(FencedFrame {
                    shared,
                    index,
                    frame_number: shared.frame_numbers[index].load(Ordering::SeqCst),
                });
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A completed frame, held by a [`FencedReader`]. Derefs to the frame's values.
pub struct FencedFrame<'a> {
    shared: &'a SharedFrames,
    index: usize,
    frame_number: u64,
}

impl FencedFrame<'_> {
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

impl Deref for FencedFrame<'_> {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the writer skips buffers announced in `reading`
        unsafe { &**self.shared.frames[self.index].get() }
    }
}

impl Drop for FencedFrame<'_> {
    fn drop(&mut self) {
        self.shared.reading.store(NO_BUFFER, Ordering::SeqCst);
    }
}

// -------------------------------------------------------------------------------------------------
