//! Raw video frames: one segment per plane.

use super::view::{BufferView, Segment};
use super::{Frame, FrameKind, unique};
use crate::error::{Error, Result};
use crate::format::RawFrameInfo;
use crate::memory::MemoryChunk;

/// Raw video frame kind.
#[derive(Debug)]
pub enum RawVideo {}

/// A frame holding the planes of one picture.
pub type RawVideoFrame = Frame<RawVideo>;

impl FrameKind for RawVideo {
    type Info = RawFrameInfo;
    type Segment = ();

    const NAME: &'static str = "raw video";

    fn slots(info: &RawFrameInfo) -> usize {
        info.format.plane_count()
    }

    fn check_complete(view: &BufferView<()>) -> Result<()> {
        if !view.is_complete() {
            return Err(Error::Incomplete("raw video plane not set"));
        }
        Ok(())
    }

    fn reshape(view: &mut BufferView<()>, info: &RawFrameInfo) -> Result<()> {
        let planes = info.format.plane_count();
        if view.used_slots() > planes {
            return Err(Error::InvalidArgument(format!(
                "{:?} has {planes} planes but plane {} is set",
                info.format.pixel_format,
                view.used_slots() - 1
            )));
        }
        view.resize(planes);
        Ok(())
    }
}

impl Frame<RawVideo> {
    /// Set plane `plane` to `len` bytes of `chunk` from `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the format has no such plane or
    /// the window exceeds the chunk.
    pub fn set_plane(
        &self,
        plane: usize,
        chunk: MemoryChunk,
        offset: usize,
        len: usize,
    ) -> Result<()> {
        let segment = Segment::new(chunk, offset, len, ())?;
        self.with_building(|view, info| {
            let planes = info.format.plane_count();
            if plane >= planes {
                return Err(Error::InvalidArgument(format!(
                    "plane {plane} out of range ({planes} planes)"
                )));
            }
            view.set(plane, segment).map(drop)
        })
    }

    /// Payload size, or the unpadded frame size when `remove_stride` is set.
    pub fn packed_size_with(&self, remove_stride: bool) -> Result<usize> {
        if remove_stride {
            self.sealed()?;
            return Ok(self.frame_info().format.frame_size());
        }
        self.packed_size()
    }

    /// Copy into `dst`, optionally dropping row padding.
    ///
    /// With `remove_stride`, each plane is copied row by row at its
    /// contiguous stride and the copy's `plane_stride` is rewritten to
    /// match. Without it this is [`Frame::copy`].
    pub fn copy_with_options(
        &self,
        mut dst: MemoryChunk,
        remove_stride: bool,
    ) -> Result<RawVideoFrame> {
        if !remove_stride {
            return self.copy(dst);
        }
        let view = self.sealed()?;
        let mut info = self.frame_info();
        let format = info.format;
        let _read = self.read_lock()?;
        let buf = unique(&mut dst)?;

        let required = format.frame_size();
        if buf.len() < required {
            return Err(Error::NoSpace {
                required,
                available: buf.len(),
            });
        }

        let mut placed = Vec::with_capacity(format.plane_count());
        let mut offset = 0;
        for (plane, segment) in view.iter().enumerate() {
            let row = format.contiguous_stride(plane);
            let rows = format.plane_rows(plane);
            let stride = info.plane_stride[plane];
            let span = rows
                .saturating_sub(1)
                .checked_mul(stride)
                .and_then(|n| n.checked_add(row));
            if rows > 0 && (stride < row || span.is_none_or(|span| span > segment.len())) {
                return Err(Error::InvalidArgument(format!(
                    "plane {plane}: {rows} rows of stride {stride} exceed {} bytes",
                    segment.len()
                )));
            }
            // SAFETY: the read lock excludes writers through this frame.
            let src = unsafe { segment.bytes() };
            let dst_plane = &mut buf[offset..offset + row * rows];
            for (line, out) in dst_plane
                .chunks_exact_mut(row.max(1))
                .enumerate()
                .take(rows)
            {
                let start = line * stride;
                out.copy_from_slice(&src[start..start + row]);
            }
            placed.push((offset, row * rows));
            info.plane_stride[plane] = row;
            offset += row * rows;
        }

        let segments = placed
            .into_iter()
            .map(|(offset, len)| Segment::new(dst.clone(), offset, len, ()))
            .collect::<Result<Vec<_>>>()?;
        self.assemble_copy(info, segments)
    }
}
