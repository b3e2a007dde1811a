//! Wait-free primitives to hand data from non real-time threads to the audio thread and back.
//!
//! None of the audio side functions in here block, lock or allocate memory.

mod fenced;
mod fifo;
mod source;
mod triple_buffer;

// -------------------------------------------------------------------------------------------------

pub use fenced::{
    fenced_triple_buffer, FenceStatus, FencedFrame, FencedReader, FencedWriter, GpuFence,
};
pub use fifo::{fifo, FifoConsumer, FifoProducer};
pub use source::{source_buffer_channel, SourceBuffer, SourcePublisher, SourceReader};
pub use triple_buffer::{triple_buffer, TripleBufferInput, TripleBufferOutput};
