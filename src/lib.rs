//! # mediabuf
//!
//! Pooled, reference-counted media buffers and finalize-once frames for
//! pipeline stages running on independent threads.
//!
//! ## Features
//!
//! - **Memory pools**: uniform chunks with four growth policies and a
//!   pluggable backing store (heap or a memfd shared-memory arena)
//! - **Zero-copy frames**: audio, coded video and raw video frames whose
//!   payload segments alias pooled chunks
//! - **Non-blocking access**: payload pointers guarded by a single-word
//!   reader/writer lock that answers `Busy` instead of parking
//! - **Frame queues**: bounded drop-oldest FIFOs with an eventfd wake signal
//!   for external reactors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mediabuf::prelude::*;
//!
//! let pool = MemoryPool::new(HeapMemory::shared(), PoolConfig::new(4096, 8))?;
//! let queue = FrameQueue::new(QueueConfig::new(4))?;
//!
//! // Producer
//! let mut chunk = pool.get()?;
//! capture_into(chunk.get_mut().unwrap());
//! let frame = AudioFrame::new(info);
//! frame.set_buffer(chunk, 0, 4096)?;
//! frame.finalize()?;
//! queue.push(&frame)?;
//!
//! // Consumer
//! while let Ok(frame) = queue.pop() {
//!     let samples = frame.read_packed()?;
//!     play(&samples);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod format;
pub mod frame;
pub mod memory;
pub mod metadata;
pub mod queue;
pub mod rwstate;
pub mod signal;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::format::{
        AudioFormat, AudioFrameInfo, CodedFrameInfo, NaluInfo, PixelFormat, RawFrameInfo,
        SampleFormat, VideoCodec, VideoFormat,
    };
    pub use crate::frame::{
        AncillaryData, AudioFrame, CodedVideoFrame, Frame, FrameKind, RawVideoFrame,
    };
    pub use crate::memory::{GrowPolicy, HeapMemory, MemoryChunk, MemoryPool, PoolConfig};
    pub use crate::metadata::Metadata;
    pub use crate::queue::{FrameQueue, QueueConfig};
    pub use crate::rwstate::RwState;
}

pub use error::{Error, ErrorKind, Result};
