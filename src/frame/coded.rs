//! Coded video frames: a sequence of NAL units.

use super::view::{BufferView, Segment};
use super::{Frame, FrameKind};
use crate::error::{Error, Result};
use crate::format::{CodedFrameInfo, NaluInfo};
use crate::memory::MemoryChunk;

/// Coded video frame kind.
#[derive(Debug)]
pub enum CodedVideo {}

/// A frame holding one access unit as NAL units.
pub type CodedVideoFrame = Frame<CodedVideo>;

impl FrameKind for CodedVideo {
    type Info = CodedFrameInfo;
    type Segment = NaluInfo;

    const NAME: &'static str = "coded video";

    fn slots(_: &CodedFrameInfo) -> usize {
        0
    }

    fn check_complete(view: &BufferView<NaluInfo>) -> Result<()> {
        if view.is_empty() {
            return Err(Error::Incomplete("no NAL unit"));
        }
        Ok(())
    }
}

impl Frame<CodedVideo> {
    /// Append a NAL unit of `nalu.size` bytes starting at `offset` in `chunk`.
    pub fn add_nalu(&self, chunk: MemoryChunk, offset: usize, nalu: NaluInfo) -> Result<()> {
        let segment = Segment::new(chunk, offset, nalu.size, nalu)?;
        self.with_building(|view, _| {
            view.push(segment);
            Ok(())
        })
    }

    /// Insert a NAL unit before `index`. Indices past the end append.
    pub fn insert_nalu(
        &self,
        index: usize,
        chunk: MemoryChunk,
        offset: usize,
        nalu: NaluInfo,
    ) -> Result<()> {
        let segment = Segment::new(chunk, offset, nalu.size, nalu)?;
        self.with_building(|view, _| {
            view.insert(index, segment);
            Ok(())
        })
    }

    /// Number of NAL units.
    pub fn nalu_count(&self) -> Result<usize> {
        self.segment_count()
    }

    /// Descriptor of NAL unit `index`.
    pub fn nalu(&self, index: usize) -> Result<NaluInfo> {
        Ok(*self.sealed()?.segment(index)?.desc())
    }
}
