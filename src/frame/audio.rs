//! Audio frames: one contiguous sample buffer.

use super::view::{BufferView, Segment};
use super::{Frame, FrameKind};
use crate::error::{Error, Result};
use crate::format::AudioFrameInfo;
use crate::memory::MemoryChunk;

/// Audio frame kind.
#[derive(Debug)]
pub enum Audio {}

/// A frame holding one audio buffer.
pub type AudioFrame = Frame<Audio>;

impl FrameKind for Audio {
    type Info = AudioFrameInfo;
    type Segment = ();

    const NAME: &'static str = "audio";

    fn slots(_: &AudioFrameInfo) -> usize {
        1
    }

    fn check_complete(view: &BufferView<()>) -> Result<()> {
        match view.get(0) {
            Some(_) => Ok(()),
            None => Err(Error::Incomplete("audio buffer not set")),
        }
    }
}

impl Frame<Audio> {
    /// Set the sample buffer to `len` bytes of `chunk` from `offset`,
    /// releasing any previous one.
    pub fn set_buffer(&self, chunk: MemoryChunk, offset: usize, len: usize) -> Result<()> {
        let segment = Segment::new(chunk, offset, len, ())?;
        self.with_building(|view, _| {
            view.place(0, segment);
            Ok(())
        })
    }

    /// Number of sample times in the buffer.
    pub fn sample_count(&self) -> Result<usize> {
        let bytes = self.packed_size()?;
        let per_frame = self.frame_info().format.bytes_per_frame();
        Ok(if per_frame == 0 { 0 } else { bytes / per_frame })
    }
}
