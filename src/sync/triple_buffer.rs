use std::{
    cell::UnsafeCell,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use crossbeam_utils::CachePadded;

// -------------------------------------------------------------------------------------------------

const BACK_INDEX_MASK: u8 = 0b011;
const BACK_DIRTY_BIT: u8 = 0b100;

// -------------------------------------------------------------------------------------------------

/// Create a new single producer, single consumer triple buffer, initialized with `initial`.
///
/// The producer always owns one slot it can write to, the consumer one slot it can read from.
/// The third "back" slot gets exchanged atomically on publish and update. The consumer always
/// sees the most recently published snapshot: snapshots which got published before the consumer
/// picked them up are overwritten and lost.
pub fn triple_buffer<T: Clone + Send>(initial: T) -> (TripleBufferInput<T>, TripleBufferOutput<T>) {
    let shared = Arc::new(SharedState {
        buffers: [
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial),
        ],
        back_info: CachePadded::new(AtomicU8::new(1)),
    });
    let input = TripleBufferInput {
        shared: Arc::clone(&shared),
        input_index: 0,
    };
    let output = TripleBufferOutput {
        shared,
        output_index: 2,
    };
    (input, output)
}

// -------------------------------------------------------------------------------------------------

struct SharedState<T> {
    buffers: [UnsafeCell<T>; 3],
    /// Index of the back buffer, plus a dirty bit which is set when the back buffer
    /// holds a snapshot the consumer has not yet seen.
    back_info: CachePadded<AtomicU8>,
}

// SAFETY: slots are only accessed by the side which currently owns their index, and index
// ownership is transferred via atomic swaps of `back_info` only.
unsafe impl<T: Send> Sync for SharedState<T> {}

// -------------------------------------------------------------------------------------------------

/// Producer side of a [`triple_buffer`].
pub struct TripleBufferInput<T> {
    shared: Arc<SharedState<T>>,
    input_index: u8,
}

// SAFETY: the input exclusively owns its slot
unsafe impl<T: Send> Send for TripleBufferInput<T> {}

impl<T> TripleBufferInput<T> {
    /// Write and publish a new snapshot.
    pub fn write(&mut self, value: T) {
        *self.input_buffer() = value;
        self.publish();
    }

    /// Access the slot the producer currently owns, in order to modify it in place before
    /// calling [`Self::publish`]. Note that the slot contains some older snapshot.
    pub fn input_buffer(&mut self) -> &mut T {
        let index = self.input_index as usize;
        // SAFETY: the input slot is never accessed by the consumer
        unsafe { &mut *self.shared.buffers[index].get() }
    }

    /// Publish the input slot as new snapshot.
    ///
    /// Returns true if the previously published snapshot was overwritten before the consumer
    /// did read it.
    pub fn publish(&mut self) -> bool {
        let former_back = self
            .shared
            .back_info
            .swap(self.input_index | BACK_DIRTY_BIT, Ordering::AcqRel);
        self.input_index = former_back & BACK_INDEX_MASK;
        former_back & BACK_DIRTY_BIT != 0
    }

    /// True if the last published snapshot was not yet picked up by the consumer.
    pub fn consumed(&self) -> bool {
        self.shared.back_info.load(Ordering::Relaxed) & BACK_DIRTY_BIT == 0
    }
}

// -------------------------------------------------------------------------------------------------

/// Consumer side of a [`triple_buffer`].
pub struct TripleBufferOutput<T> {
    shared: Arc<SharedState<T>>,
    output_index: u8,
}

// SAFETY: the output exclusively owns its slot
unsafe impl<T: Send> Send for TripleBufferOutput<T> {}

impl<T> TripleBufferOutput<T> {
    /// True if a new snapshot got published since the last update.
    pub fn updated(&self) -> bool {
        self.shared.back_info.load(Ordering::Relaxed) & BACK_DIRTY_BIT != 0
    }

    /// Fetch the most recently published snapshot, if there's a new one.
    /// Returns true if the output slot now holds a new snapshot.
    pub fn update(&mut self) -> bool {
        if !self.updated() {
            return false;
        }
        let former_back = self
            .shared
            .back_info
            .swap(self.output_index, Ordering::AcqRel);
        self.output_index = former_back & BACK_INDEX_MASK;
        true
    }

    /// Returns the most recently published snapshot, or `None` when nothing new got published
    /// since the last read.
    pub fn read(&mut self) -> Option<&T> {
        if self.update() {
            Some(self.output_buffer())
        } else {
            None
        }
    }

    /// Access the slot the consumer currently owns, without checking for updates.
    pub fn output_buffer(&self) -> &T {
        let index = self.output_index as usize;
        // SAFETY: the output slot is never accessed by the producer
        unsafe { &*self.shared.buffers[index].get() }
    }
}

// -------------------------------------------------------------------------------------------------
