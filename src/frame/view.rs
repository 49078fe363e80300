//! Frame payload layout.
//!
//! A [`BufferView`] is an ordered list of [`Segment`]s, each a window
//! `(chunk, offset, len)` into a [`MemoryChunk`]. Audio frames use one
//! segment, coded video one per NAL unit and raw video one per plane.
//! Segments may alias: several frames can hold windows into the same chunk.

use crate::error::{Error, Result};
use crate::memory::MemoryChunk;
use crate::memory::defaults::MAX_PLANES;
use smallvec::SmallVec;
use std::fmt;

// ============================================================================
// Segment
// ============================================================================

/// A window into a memory chunk, plus a per-segment descriptor.
///
/// The segment holds a chunk reference for its whole life, so the memory it
/// points to cannot return to its pool while any frame still uses it.
#[derive(Clone)]
pub struct Segment<S> {
    chunk: MemoryChunk,
    offset: usize,
    len: usize,
    desc: S,
}

impl<S> Segment<S> {
    /// Create a segment covering `offset..offset + len` of `chunk`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the window exceeds the chunk.
    pub fn new(chunk: MemoryChunk, offset: usize, len: usize, desc: S) -> Result<Self> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::InvalidArgument("segment bounds overflow".into()))?;
        if end > chunk.capacity() {
            return Err(Error::InvalidArgument(format!(
                "segment {offset}..{end} exceeds chunk of {} bytes",
                chunk.capacity()
            )));
        }
        Ok(Self {
            chunk,
            offset,
            len,
            desc,
        })
    }

    /// Backing chunk.
    pub fn chunk(&self) -> &MemoryChunk {
        &self.chunk
    }

    /// Offset within the chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if this segment is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Per-segment descriptor.
    pub fn desc(&self) -> &S {
        &self.desc
    }

    /// Pointer to the first byte (null if the chunk has no data region).
    pub fn as_ptr(&self) -> *mut u8 {
        let base = self.chunk.as_ptr();
        if base.is_null() {
            return base;
        }
        // SAFETY: offset <= capacity was checked at construction.
        unsafe { base.add(self.offset) }
    }

    /// Segment contents.
    ///
    /// # Safety
    ///
    /// Nothing may write to this window while the slice lives.
    pub(crate) unsafe fn bytes(&self) -> &[u8] {
        let ptr = self.as_ptr();
        if ptr.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: window within the chunk; no writer per the caller.
        unsafe { std::slice::from_raw_parts(ptr, self.len) }
    }
}

impl<S: fmt::Debug> fmt::Debug for Segment<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("chunk", &self.chunk.as_ptr())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("desc", &self.desc)
            .finish()
    }
}

// ============================================================================
// Packing
// ============================================================================

/// Result of the packed test over a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// Every segment starts where the previous one ends.
    Contiguous {
        /// Start of the first segment.
        ptr: *mut u8,
        /// Total length.
        len: usize,
    },
    /// Segments are scattered; `len` is the size a packed copy needs.
    Scattered {
        /// Total length.
        len: usize,
    },
}

impl Packing {
    /// Total payload length, packed or not.
    pub fn len(&self) -> usize {
        match *self {
            Self::Contiguous { len, .. } | Self::Scattered { len } => len,
        }
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the payload is contiguous.
    pub fn is_packed(&self) -> bool {
        matches!(self, Self::Contiguous { .. })
    }
}

// ============================================================================
// BufferView
// ============================================================================

/// Ordered segments composing a frame payload.
///
/// Slots may be empty while a frame is being built (a raw frame reserves
/// one slot per plane up front). Replacing a slot drops the previous
/// segment, releasing its chunk reference.
#[derive(Clone)]
pub struct BufferView<S> {
    slots: SmallVec<[Option<Segment<S>>; MAX_PLANES]>,
}

impl<S> BufferView<S> {
    /// Create a view with `slots` empty slots.
    pub fn with_slots(slots: usize) -> Self {
        let mut view = Self {
            slots: SmallVec::with_capacity(slots),
        };
        view.resize(slots);
        view
    }

    /// Number of slots, set or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the view has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Segment in slot `index`, if set.
    pub fn get(&self, index: usize) -> Option<&Segment<S>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Segment in slot `index`, or an error naming the bad index.
    pub fn segment(&self, index: usize) -> Result<&Segment<S>> {
        self.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.len(),
        })
    }

    /// Iterate over set segments in order.
    pub fn iter(&self) -> impl Iterator<Item = &Segment<S>> {
        self.slots.iter().flatten()
    }

    /// Check if every slot is set.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Replace the segment in slot `index`, returning the previous one.
    pub fn set(&mut self, index: usize, segment: Segment<S>) -> Result<Option<Segment<S>>> {
        let len = self.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        Ok(slot.replace(segment))
    }

    /// Insert a segment before `index`. Indices past the end append.
    pub fn insert(&mut self, index: usize, segment: Segment<S>) {
        let index = index.min(self.len());
        self.slots.insert(index, Some(segment));
    }

    /// Append a segment.
    pub fn push(&mut self, segment: Segment<S>) {
        self.slots.push(Some(segment));
    }

    /// Set slot `index` if it exists, append otherwise.
    pub(crate) fn place(&mut self, index: usize, segment: Segment<S>) {
        match self.slots.get_mut(index) {
            Some(slot) => *slot = Some(segment),
            None => self.push(segment),
        }
    }

    /// Grow with empty slots or truncate to `slots`.
    pub fn resize(&mut self, slots: usize) {
        self.slots.resize_with(slots, || None);
    }

    /// Highest set slot plus one.
    pub fn used_slots(&self) -> usize {
        self.slots
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1)
    }

    /// Sum of segment lengths.
    pub fn total_len(&self) -> usize {
        self.iter().map(Segment::len).sum()
    }

    /// Forward scan checking that each segment starts where the previous
    /// one ends.
    pub fn packing(&self) -> Packing {
        let mut segments = self.iter();
        let Some(first) = segments.next() else {
            return Packing::Contiguous {
                ptr: std::ptr::null_mut(),
                len: 0,
            };
        };
        let start = first.as_ptr();
        let mut next = start as usize + first.len();
        let mut len = first.len();
        let mut packed = !start.is_null();
        for segment in segments {
            packed &= segment.as_ptr() as usize == next;
            next = segment.as_ptr() as usize + segment.len();
            len += segment.len();
        }
        if packed {
            Packing::Contiguous { ptr: start, len }
        } else {
            Packing::Scattered { len }
        }
    }

    /// Copy every segment back to back into `dst`, returning each
    /// segment's `(offset, len)` in `dst`.
    ///
    /// # Safety
    ///
    /// No segment may be written to during the copy.
    pub(crate) unsafe fn pack_into(&self, dst: &mut [u8]) -> Result<Vec<(usize, usize)>> {
        let required = self.total_len();
        if dst.len() < required {
            return Err(Error::NoSpace {
                required,
                available: dst.len(),
            });
        }
        let mut placed = Vec::with_capacity(self.len());
        let mut offset = 0;
        for segment in self.iter() {
            // SAFETY: no writer per the caller.
            let src = unsafe { segment.bytes() };
            dst[offset..offset + src.len()].copy_from_slice(src);
            placed.push((offset, src.len()));
            offset += src.len();
        }
        Ok(placed)
    }
}

impl<S> Default for BufferView<S> {
    fn default() -> Self {
        Self::with_slots(0)
    }
}

impl<S: fmt::Debug> fmt::Debug for BufferView<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(bytes: &[u8]) -> MemoryChunk {
        MemoryChunk::from_vec(bytes.to_vec())
    }

    #[test]
    fn test_segment_bounds() {
        let chunk = MemoryChunk::new_unpooled(16).unwrap();
        assert!(Segment::new(chunk.clone(), 8, 8, ()).is_ok());
        assert!(Segment::new(chunk.clone(), 8, 9, ()).is_err());
        assert!(Segment::new(chunk, usize::MAX, 2, ()).is_err());
    }

    #[test]
    fn test_set_replaces_and_releases() {
        let a = MemoryChunk::new_unpooled(8).unwrap();
        let b = MemoryChunk::new_unpooled(8).unwrap();
        let mut view = BufferView::with_slots(1);

        view.set(0, Segment::new(a.clone(), 0, 8, ()).unwrap()).unwrap();
        assert_eq!(a.refcount(), 2);

        let old = view.set(0, Segment::new(b.clone(), 0, 8, ()).unwrap()).unwrap();
        drop(old);
        assert_eq!(a.refcount(), 1);
        assert_eq!(b.refcount(), 2);

        let err = view.set(1, Segment::new(b, 0, 1, ()).unwrap()).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 1, len: 1 }));
    }

    #[test]
    fn test_insert_clamps() {
        let chunk = MemoryChunk::new_unpooled(8).unwrap();
        let mut view = BufferView::default();
        view.push(Segment::new(chunk.clone(), 0, 1, 'a').unwrap());
        view.insert(0, Segment::new(chunk.clone(), 1, 1, 'b').unwrap());
        view.insert(42, Segment::new(chunk, 2, 1, 'c').unwrap());

        let order: Vec<char> = view.iter().map(|s| *s.desc()).collect();
        assert_eq!(order, vec!['b', 'a', 'c']);
    }

    #[test]
    fn test_packing_same_chunk() {
        let chunk = MemoryChunk::new_unpooled(30).unwrap();
        let mut view = BufferView::default();
        for i in 0..3 {
            view.push(Segment::new(chunk.clone(), i * 10, 10, ()).unwrap());
        }
        assert_eq!(
            view.packing(),
            Packing::Contiguous {
                ptr: chunk.as_ptr(),
                len: 30
            }
        );
    }

    #[test]
    fn test_packing_out_of_order() {
        let chunk = MemoryChunk::new_unpooled(30).unwrap();
        let mut view = BufferView::default();
        view.push(Segment::new(chunk.clone(), 10, 10, ()).unwrap());
        view.push(Segment::new(chunk, 0, 10, ()).unwrap());
        assert_eq!(view.packing(), Packing::Scattered { len: 20 });
    }

    #[test]
    fn test_pack_into() {
        let mut view = BufferView::default();
        view.push(Segment::new(chunk_with(b"xxab"), 2, 2, ()).unwrap());
        view.push(Segment::new(chunk_with(b"cde"), 0, 3, ()).unwrap());

        let mut dst = [0u8; 6];
        let placed = unsafe { view.pack_into(&mut dst) }.unwrap();
        assert_eq!(&dst[..5], b"abcde");
        assert_eq!(placed, vec![(0, 2), (2, 3)]);

        let mut small = [0u8; 4];
        let err = unsafe { view.pack_into(&mut small) }.unwrap_err();
        assert!(matches!(
            err,
            Error::NoSpace {
                required: 5,
                available: 4
            }
        ));
    }

    #[test]
    fn test_used_slots() {
        let chunk = MemoryChunk::new_unpooled(4).unwrap();
        let mut view = BufferView::with_slots(3);
        assert_eq!(view.used_slots(), 0);
        view.set(1, Segment::new(chunk, 0, 4, ()).unwrap()).unwrap();
        assert_eq!(view.used_slots(), 2);
        assert!(!view.is_complete());
    }
}
