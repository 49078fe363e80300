//! Finalize-once media frames.
//!
//! A [`Frame`] carries one media unit: a payload described by a
//! [`BufferView`], a per-kind info struct, named ancillary entries and an
//! optional shared [`Metadata`]. The three kinds differ only in payload
//! shape and are plugged in through [`FrameKind`]:
//!
//! | Kind | Payload | Complete when |
//! |------|---------|---------------|
//! | [`Audio`] | one buffer | the buffer is set |
//! | [`CodedVideo`] | one segment per NAL unit | at least one NAL unit |
//! | [`RawVideo`] | one segment per plane | every plane is set |
//!
//! # Lifecycle
//!
//! ```text
//! Frame::new(info) ──► Building ──finalize()──► Finalized
//!                      (mutable,                (read-only, shareable,
//!                       single writer)           views under RwState)
//! ```
//!
//! Handles are cheap to clone. When the last one drops, the pre-release
//! callback runs, then payload chunks, ancillary entries and metadata are
//! released in that order.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediabuf::format::{AudioFormat, AudioFrameInfo, SampleFormat};
//! use mediabuf::frame::AudioFrame;
//!
//! let frame = AudioFrame::new(AudioFrameInfo::new(AudioFormat::new(48000, 2, SampleFormat::S16)));
//! frame.set_buffer(chunk, 0, 4096)?;
//! frame.finalize()?;
//!
//! let samples = frame.read_packed()?;
//! ```

mod ancillary;
mod audio;
mod coded;
mod raw;
mod view;

pub use ancillary::{AncillaryData, Cleaner, USERDATA_SEI_KEY, build_key, parse_key};
pub use audio::{Audio, AudioFrame};
pub use coded::{CodedVideo, CodedVideoFrame};
pub use raw::{RawVideo, RawVideoFrame};
pub use view::{BufferView, Packing, Segment};

use crate::error::{Error, Result};
use crate::memory::{ChunkInfo, MemoryChunk, MemoryPool};
use crate::metadata::Metadata;
use crate::rwstate::RwState;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::warn;

/// Payload shape and rules of one frame kind.
pub trait FrameKind: Sized + 'static {
    /// Per-frame description (format, timestamps).
    type Info: Clone + fmt::Debug + Send + Sync + 'static;

    /// Per-segment descriptor.
    type Segment: Clone + fmt::Debug + Send + Sync + 'static;

    /// Kind name used in logs.
    const NAME: &'static str;

    /// Number of slots a new frame reserves for `info`.
    fn slots(info: &Self::Info) -> usize;

    /// Check that `view` is complete enough to finalize.
    fn check_complete(view: &BufferView<Self::Segment>) -> Result<()>;

    /// Adapt `view` to a new info, or refuse it. Called before the info
    /// is replaced; on error nothing changes.
    fn reshape(view: &mut BufferView<Self::Segment>, info: &Self::Info) -> Result<()> {
        let _ = (view, info);
        Ok(())
    }
}

type PreRelease<K> = Box<dyn FnOnce(&Frame<K>) + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Field order is teardown order: payload, then ancillary, then metadata.
struct FrameInner<K: FrameKind> {
    refcount: AtomicUsize,
    rw: RwState,
    info: Mutex<K::Info>,
    building: Mutex<Option<BufferView<K::Segment>>>,
    sealed: OnceLock<BufferView<K::Segment>>,
    ancillary: Mutex<Vec<AncillaryData>>,
    metadata: Mutex<Option<Arc<Metadata>>>,
    pre_release: Mutex<Option<PreRelease<K>>>,
}

/// A reference-counted, finalize-once media frame.
pub struct Frame<K: FrameKind> {
    inner: Arc<FrameInner<K>>,
}

impl<K: FrameKind> Frame<K> {
    /// Create an unfinalized frame with an empty payload.
    pub fn new(info: K::Info) -> Self {
        let view = BufferView::with_slots(K::slots(&info));
        Self {
            inner: Arc::new(FrameInner {
                refcount: AtomicUsize::new(1),
                rw: RwState::new(),
                info: Mutex::new(info),
                building: Mutex::new(Some(view)),
                sealed: OnceLock::new(),
                ancillary: Mutex::new(Vec::new()),
                metadata: Mutex::new(None),
                pre_release: Mutex::new(None),
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Number of live handles.
    pub fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::Acquire)
    }

    /// Check if two handles refer to the same frame.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check if the frame has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.inner.sealed.get().is_some()
    }

    /// Freeze the frame.
    ///
    /// Succeeds again on an already finalized frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Incomplete`] if the payload is not complete; the
    /// frame stays mutable.
    pub fn finalize(&self) -> Result<()> {
        let mut building = lock(&self.inner.building);
        let Some(view) = building.as_ref() else {
            return Ok(());
        };
        K::check_complete(view)?;
        if let Some(view) = building.take() {
            // Only this path sets `sealed`, under the building lock.
            let _ = self.inner.sealed.set(view);
        }
        Ok(())
    }

    /// Register a callback run once, with the frame, when the last handle
    /// drops and before anything is released.
    pub fn set_callbacks<F>(&self, pre_release: F) -> Result<()>
    where
        F: FnOnce(&Frame<K>) + Send + 'static,
    {
        let pre_release: PreRelease<K> = Box::new(pre_release);
        self.with_building(|_, _| {
            *lock(&self.inner.pre_release) = Some(pre_release);
            Ok(())
        })
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Copy of the frame info. Works in both states.
    pub fn frame_info(&self) -> K::Info {
        lock(&self.inner.info).clone()
    }

    /// Replace the frame info.
    pub fn set_frame_info(&self, info: K::Info) -> Result<()> {
        self.with_building(|view, current| {
            K::reshape(view, &info)?;
            *current = info;
            Ok(())
        })
    }

    /// Run `f` on the payload and info of a frame still being built.
    pub(crate) fn with_building<R>(
        &self,
        f: impl FnOnce(&mut BufferView<K::Segment>, &mut K::Info) -> Result<R>,
    ) -> Result<R> {
        let mut building = lock(&self.inner.building);
        let view = building.as_mut().ok_or(Error::Finalized)?;
        let mut info = lock(&self.inner.info);
        f(view, &mut info)
    }

    /// Payload of a finalized frame.
    pub(crate) fn sealed(&self) -> Result<&BufferView<K::Segment>> {
        self.inner.sealed.get().ok_or(Error::NotFinalized)
    }

    // ========================================================================
    // Payload queries
    // ========================================================================

    /// Sum of segment lengths.
    pub fn packed_size(&self) -> Result<usize> {
        Ok(self.sealed()?.total_len())
    }

    /// Run the packed test over the payload.
    pub fn packing(&self) -> Result<Packing> {
        Ok(self.sealed()?.packing())
    }

    /// Number of payload segments.
    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.sealed()?.len())
    }

    /// Identity of the chunk behind segment `index`, and a handle to it.
    pub fn segment_info(&self, index: usize) -> Result<(ChunkInfo, MemoryChunk)> {
        let segment = self.sealed()?.segment(index)?;
        Ok((segment.chunk().info(), segment.chunk().clone()))
    }

    /// Whether any and whether all payload chunks come from `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the payload has no segments.
    pub fn uses_pool(&self, pool: &MemoryPool) -> Result<(bool, bool)> {
        let view = self.sealed()?;
        if view.is_empty() {
            return Err(Error::NotFound(format!("{} frame has no payload", K::NAME)));
        }
        let (any, all) = view.iter().fold((false, true), |(any, all), segment| {
            let from_pool = segment.chunk().is_from_pool(pool);
            (any || from_pool, all && from_pool)
        });
        Ok((any, all))
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Read-only pointer and length of segment `index`.
    ///
    /// Takes a read lock that [`release_view`](Self::release_view) gives back.
    pub fn view(&self, index: usize) -> Result<(*const u8, usize)> {
        let segment = self.sealed()?.segment(index)?;
        self.inner.rw.rdlock()?;
        Ok((segment.as_ptr().cast_const(), segment.len()))
    }

    /// Release a view obtained from [`view`](Self::view).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `ptr` is not the pointer that
    /// was handed out for `index`.
    pub fn release_view(&self, index: usize, ptr: *const u8) -> Result<()> {
        self.check_view_ptr(index, ptr)?;
        self.inner.rw.rdunlock()
    }

    /// Writable pointer and length of segment `index`, under the write lock.
    pub fn rw_view(&self, index: usize) -> Result<(*mut u8, usize)> {
        let segment = self.sealed()?.segment(index)?;
        self.inner.rw.wrlock()?;
        Ok((segment.as_ptr(), segment.len()))
    }

    /// Release a view obtained from [`rw_view`](Self::rw_view).
    pub fn release_rw_view(&self, index: usize, ptr: *mut u8) -> Result<()> {
        self.check_view_ptr(index, ptr.cast_const())?;
        self.inner.rw.wrunlock()
    }

    /// Read-only pointer and length spanning the whole payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotPacked`] with the length a packed copy needs if
    /// the segments are not contiguous.
    pub fn packed_view(&self) -> Result<(*const u8, usize)> {
        let (ptr, len) = self.contiguous()?;
        self.inner.rw.rdlock()?;
        Ok((ptr.cast_const(), len))
    }

    /// Release a view obtained from [`packed_view`](Self::packed_view).
    pub fn release_packed_view(&self, ptr: *const u8) -> Result<()> {
        self.check_packed_ptr(ptr)?;
        self.inner.rw.rdunlock()
    }

    /// Writable pointer and length spanning the whole payload.
    pub fn rw_packed_view(&self) -> Result<(*mut u8, usize)> {
        let (ptr, len) = self.contiguous()?;
        self.inner.rw.wrlock()?;
        Ok((ptr, len))
    }

    /// Release a view obtained from [`rw_packed_view`](Self::rw_packed_view).
    pub fn release_rw_packed_view(&self, ptr: *mut u8) -> Result<()> {
        self.check_packed_ptr(ptr.cast_const())?;
        self.inner.rw.wrunlock()
    }

    /// Borrow segment `index` under a read lock.
    pub fn read(&self, index: usize) -> Result<ReadView<'_, K>> {
        let (ptr, len) = self.view(index)?;
        Ok(ReadView {
            frame: self,
            // SAFETY: the read lock excludes writers through this frame and
            // the borrow keeps the chunk alive.
            data: unsafe { bytes(ptr, len) },
        })
    }

    /// Borrow the whole packed payload under a read lock.
    pub fn read_packed(&self) -> Result<ReadView<'_, K>> {
        let (ptr, len) = self.packed_view()?;
        Ok(ReadView {
            frame: self,
            // SAFETY: as in `read`.
            data: unsafe { bytes(ptr, len) },
        })
    }

    /// Borrow segment `index` mutably under the write lock.
    ///
    /// # Safety
    ///
    /// The segment's chunk window must not be reachable for reading or
    /// writing through another frame or handle while the guard lives.
    pub unsafe fn write(&self, index: usize) -> Result<WriteView<'_, K>> {
        let (ptr, len) = self.rw_view(index)?;
        let data: &mut [u8] = if ptr.is_null() || len == 0 {
            &mut []
        } else {
            // SAFETY: write lock held; no other alias per the caller.
            unsafe { std::slice::from_raw_parts_mut(ptr, len) }
        };
        Ok(WriteView { frame: self, data })
    }

    fn check_view_ptr(&self, index: usize, ptr: *const u8) -> Result<()> {
        let segment = self
            .sealed()?
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("no segment {index}")))?;
        if segment.as_ptr().cast_const() != ptr {
            return Err(Error::InvalidArgument(format!(
                "pointer {ptr:p} was not handed out for segment {index}"
            )));
        }
        Ok(())
    }

    fn contiguous(&self) -> Result<(*mut u8, usize)> {
        let view = self.sealed()?;
        if view.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} frame has no payload",
                K::NAME
            )));
        }
        match view.packing() {
            Packing::Contiguous { ptr, len } => Ok((ptr, len)),
            Packing::Scattered { len } => Err(Error::NotPacked { packed_len: len }),
        }
    }

    fn check_packed_ptr(&self, ptr: *const u8) -> Result<()> {
        let (start, _) = self.contiguous()?;
        if start.cast_const() != ptr {
            return Err(Error::InvalidArgument(format!(
                "pointer {ptr:p} was not handed out as packed view"
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Copy
    // ========================================================================

    /// Copy the payload back to back into `dst` and return a new,
    /// unfinalized frame describing it.
    ///
    /// The copy shares this frame's info, ancillary entries and metadata.
    /// `dst` must be the only handle to its chunk: the bytes are written
    /// without a lock, so no other handle may be able to read them.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `dst` has other handles. Nothing is
    ///   written in that case.
    /// - [`Error::NoSpace`] if `dst` is smaller than the packed size.
    pub fn copy(&self, mut dst: MemoryChunk) -> Result<Frame<K>> {
        let view = self.sealed()?;
        let _read = self.read_lock()?;
        let buf = unique(&mut dst)?;
        // SAFETY: the read lock excludes writers through this frame.
        let placed = unsafe { view.pack_into(buf) }?;
        let segments = view
            .iter()
            .zip(placed)
            .map(|(src, (offset, len))| Segment::new(dst.clone(), offset, len, src.desc().clone()))
            .collect::<Result<Vec<_>>>()?;
        self.assemble_copy(self.frame_info(), segments)
    }

    /// Hold a read lock for the lifetime of the guard.
    pub(crate) fn read_lock(&self) -> Result<ReadLock<'_>> {
        self.inner.rw.rdlock()?;
        Ok(ReadLock(&self.inner.rw))
    }

    /// Build a copy of this frame with `info` and `segments` as payload.
    pub(crate) fn assemble_copy(
        &self,
        info: K::Info,
        segments: Vec<Segment<K::Segment>>,
    ) -> Result<Frame<K>> {
        let copy = Frame::new(info);
        copy.with_building(|view, _| {
            for (index, segment) in segments.into_iter().enumerate() {
                view.place(index, segment);
            }
            Ok(())
        })?;
        {
            let source = lock(&self.inner.ancillary);
            lock(&copy.inner.ancillary).extend(source.iter().cloned());
        }
        if let Some(metadata) = lock(&self.inner.metadata).clone() {
            copy.set_metadata_arc(metadata);
        }
        Ok(copy)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Attach metadata, replacing any previous value.
    pub fn set_metadata(&self, metadata: Metadata) {
        self.set_metadata_arc(Arc::new(metadata));
    }

    /// Attach shared metadata, replacing any previous value.
    pub fn set_metadata_arc(&self, metadata: Arc<Metadata>) {
        *lock(&self.inner.metadata) = Some(metadata);
    }

    /// Detach the metadata.
    pub fn clear_metadata(&self) {
        lock(&self.inner.metadata).take();
    }

    /// Attached metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if none is attached.
    pub fn metadata(&self) -> Result<Arc<Metadata>> {
        lock(&self.inner.metadata)
            .clone()
            .ok_or_else(|| Error::NotFound("metadata".into()))
    }

    // ========================================================================
    // Ancillary data
    // ========================================================================

    /// Attach a string entry.
    pub fn add_ancillary_string(&self, name: &str, value: &str) -> Result<()> {
        self.add_ancillary(&AncillaryData::new_string(name, value)?)
    }

    /// Attach a copy of `value`.
    pub fn add_ancillary_buffer(&self, name: &str, value: &[u8]) -> Result<()> {
        self.add_ancillary(&AncillaryData::new_buffer(name, value)?)
    }

    /// Attach a copy of `value` with a cleaner run when the entry dies.
    pub fn add_ancillary_buffer_with_cleaner<F>(
        &self,
        name: &str,
        value: &[u8],
        cleaner: F,
    ) -> Result<()>
    where
        F: FnOnce(&str, &[u8]) + Send + 'static,
    {
        self.add_ancillary(&AncillaryData::with_cleaner(name, value, cleaner)?)
    }

    /// Attach an existing entry by reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if an entry with that name exists.
    pub fn add_ancillary(&self, data: &AncillaryData) -> Result<()> {
        let mut entries = lock(&self.inner.ancillary);
        if entries.iter().any(|e| e.name() == data.name()) {
            return Err(Error::Conflict(data.name().to_owned()));
        }
        entries.push(data.clone());
        Ok(())
    }

    /// Look up an entry by name.
    pub fn ancillary(&self, name: &str) -> Result<AncillaryData> {
        lock(&self.inner.ancillary)
            .iter()
            .find(|e| e.name() == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }

    /// Detach an entry by name.
    pub fn remove_ancillary(&self, name: &str) -> Result<()> {
        let removed = {
            let mut entries = lock(&self.inner.ancillary);
            let index = entries
                .iter()
                .position(|e| e.name() == name)
                .ok_or_else(|| Error::NotFound(name.to_owned()))?;
            entries.remove(index)
        };
        // Cleaner (if last reference) runs outside the lock.
        drop(removed);
        Ok(())
    }

    /// Visit entries in insertion order until `f` returns `false`.
    ///
    /// The ancillary lock is held for the whole traversal: calling any
    /// ancillary method of the same frame from `f` deadlocks.
    pub fn foreach_ancillary(&self, mut f: impl FnMut(&AncillaryData) -> bool) {
        let entries = lock(&self.inner.ancillary);
        for entry in entries.iter() {
            if !f(entry) {
                break;
            }
        }
    }

    /// Number of ancillary entries.
    pub fn ancillary_count(&self) -> usize {
        lock(&self.inner.ancillary).len()
    }
}

impl<K: FrameKind> Clone for Frame<K> {
    fn clone(&self) -> Self {
        self.inner.refcount.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: FrameKind> Drop for Frame<K> {
    fn drop(&mut self) {
        if self.inner.refcount.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let pre_release = lock(&self.inner.pre_release).take();
        if let Some(pre_release) = pre_release {
            pre_release(self);
        }
        match self.inner.rw.value() {
            0 => {}
            -1 => warn!(
                "{} frame {:p}: 1 rw-lock not released during frame deletion",
                K::NAME,
                Arc::as_ptr(&self.inner)
            ),
            readers => warn!(
                "{} frame {:p}: {} ro-locks not released during frame deletion",
                K::NAME,
                Arc::as_ptr(&self.inner),
                readers
            ),
        }
    }
}

impl<K: FrameKind> fmt::Debug for Frame<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(K::NAME)
            .field("info", &self.frame_info())
            .field("finalized", &self.is_finalized())
            .field("refcount", &self.refcount())
            .field("rw", &self.inner.rw)
            .finish()
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Read lock released on drop.
pub(crate) struct ReadLock<'a>(&'a RwState);

impl Drop for ReadLock<'_> {
    fn drop(&mut self) {
        let _ = self.0.rdunlock();
    }
}

/// Payload bytes borrowed under a frame's read lock.
pub struct ReadView<'a, K: FrameKind> {
    frame: &'a Frame<K>,
    data: &'a [u8],
}

impl<K: FrameKind> Deref for ReadView<'_, K> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl<K: FrameKind> Drop for ReadView<'_, K> {
    fn drop(&mut self) {
        let _ = self.frame.inner.rw.rdunlock();
    }
}

/// Payload bytes borrowed under a frame's write lock.
pub struct WriteView<'a, K: FrameKind> {
    frame: &'a Frame<K>,
    data: &'a mut [u8],
}

impl<K: FrameKind> Deref for WriteView<'_, K> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl<K: FrameKind> DerefMut for WriteView<'_, K> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

impl<K: FrameKind> Drop for WriteView<'_, K> {
    fn drop(&mut self) {
        let _ = self.frame.inner.rw.wrunlock();
    }
}

/// # Safety
///
/// `ptr` must be valid for reads of `len` bytes for `'a`, with no writer.
unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        return &[];
    }
    // SAFETY: guaranteed by the caller.
    unsafe { std::slice::from_raw_parts(ptr, len) }
}

/// Mutable contents of a chunk that has no other handle.
pub(crate) fn unique(chunk: &mut MemoryChunk) -> Result<&mut [u8]> {
    let refs = chunk.refcount();
    chunk.get_mut().ok_or_else(|| {
        Error::InvalidArgument(format!(
            "destination chunk must be unique (refcount {refs})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{AudioFormat, AudioFrameInfo, SampleFormat};
    use std::sync::atomic::AtomicBool;

    fn info() -> AudioFrameInfo {
        AudioFrameInfo::new(AudioFormat::new(48000, 2, SampleFormat::S16))
    }

    fn filled(len: usize, byte: u8) -> MemoryChunk {
        MemoryChunk::from_vec(vec![byte; len])
    }

    fn finalized(len: usize) -> AudioFrame {
        let frame = AudioFrame::new(info());
        frame.set_buffer(filled(len, 7), 0, len).unwrap();
        frame.finalize().unwrap();
        frame
    }

    #[test]
    fn test_finalize_requires_payload() {
        let frame = AudioFrame::new(info());
        assert!(matches!(frame.finalize(), Err(Error::Incomplete(_))));
        assert!(!frame.is_finalized());

        frame.set_buffer(filled(16, 0), 0, 16).unwrap();
        frame.finalize().unwrap();
        assert!(frame.is_finalized());
        // Idempotent
        frame.finalize().unwrap();
    }

    #[test]
    fn test_mutation_after_finalize_is_busy() {
        let frame = finalized(8);
        let err = frame.set_buffer(filled(8, 0), 0, 8).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Busy);
        assert!(frame.set_frame_info(info()).is_err());
        assert!(frame.set_callbacks(|_| {}).is_err());
    }

    #[test]
    fn test_readers_require_finalize() {
        let frame = AudioFrame::new(info());
        frame.set_buffer(filled(8, 0), 0, 8).unwrap();
        assert!(matches!(frame.view(0), Err(Error::NotFinalized)));
        assert!(matches!(frame.packed_size(), Err(Error::NotFinalized)));
    }

    #[test]
    fn test_refcount_and_pre_release() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let frame = AudioFrame::new(info());
        frame.set_buffer(filled(8, 0), 0, 8).unwrap();
        frame
            .set_callbacks(move |f| {
                assert_eq!(f.refcount(), 0);
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        frame.finalize().unwrap();

        let other = frame.clone();
        assert_eq!(frame.refcount(), 2);
        drop(frame);
        assert!(!fired.load(Ordering::SeqCst));
        drop(other);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_payload_released_on_last_drop() {
        let chunk = filled(8, 0);
        let frame = AudioFrame::new(info());
        frame.set_buffer(chunk.clone(), 0, 8).unwrap();
        assert_eq!(chunk.refcount(), 2);
        drop(frame);
        assert_eq!(chunk.refcount(), 1);
    }

    #[test]
    fn test_view_pairs_with_rwstate() {
        let frame = finalized(8);
        let (ptr, len) = frame.view(0).unwrap();
        assert_eq!(len, 8);
        assert!(matches!(frame.rw_view(0), Err(Error::Busy)));

        let bogus = ptr.wrapping_add(1);
        assert!(matches!(
            frame.release_view(0, bogus),
            Err(Error::InvalidArgument(_))
        ));
        frame.release_view(0, ptr).unwrap();
        assert!(matches!(
            frame.release_view(0, ptr),
            Err(Error::AlreadyUnlocked)
        ));

        let (wptr, _) = frame.rw_view(0).unwrap();
        assert!(matches!(frame.view(0), Err(Error::Busy)));
        frame.release_rw_view(0, wptr).unwrap();
    }

    #[test]
    fn test_bad_view_index() {
        let frame = finalized(8);
        assert!(matches!(
            frame.view(3),
            Err(Error::IndexOutOfRange { index: 3, len: 1 })
        ));
        assert!(matches!(
            frame.release_view(3, std::ptr::null()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_guards_release_on_drop() {
        let frame = finalized(4);
        {
            let a = frame.read(0).unwrap();
            let b = frame.read_packed().unwrap();
            assert_eq!(&*a, &[7, 7, 7, 7]);
            assert_eq!(a.len(), b.len());
            assert_eq!(frame.inner.rw.readers(), 2);
        }
        assert!(frame.inner.rw.is_free());

        {
            let mut w = unsafe { frame.write(0) }.unwrap();
            w[0] = 1;
        }
        assert_eq!(frame.read(0).unwrap()[0], 1);
    }

    #[test]
    fn test_metadata_slot() {
        let frame = AudioFrame::new(info());
        assert!(matches!(frame.metadata(), Err(Error::NotFound(_))));
        frame.set_metadata(Metadata::with_sequence(1));
        frame.set_metadata(Metadata::with_sequence(2));
        assert_eq!(frame.metadata().unwrap().sequence, 2);

        frame.set_buffer(filled(1, 0), 0, 1).unwrap();
        frame.finalize().unwrap();
        frame.clear_metadata();
        assert!(frame.metadata().is_err());
    }

    #[test]
    fn test_ancillary_conflict_and_readd() {
        let frame = finalized(1);
        frame.add_ancillary_string("lang", "en").unwrap();
        assert!(matches!(
            frame.add_ancillary_buffer("lang", &[1]),
            Err(Error::Conflict(_))
        ));
        frame.remove_ancillary("lang").unwrap();
        assert!(matches!(
            frame.remove_ancillary("lang"),
            Err(Error::NotFound(_))
        ));
        frame.add_ancillary_buffer("lang", &[1]).unwrap();
        assert!(!frame.ancillary("lang").unwrap().is_string());
    }

    #[test]
    fn test_foreach_order_and_early_stop() {
        let frame = AudioFrame::new(info());
        for name in ["a", "b", "c"] {
            frame.add_ancillary_string(name, name).unwrap();
        }
        let mut seen = Vec::new();
        frame.foreach_ancillary(|e| {
            seen.push(e.name().to_owned());
            e.name() != "b"
        });
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(frame.ancillary_count(), 3);
    }

    #[test]
    fn test_copy_shares_ancillary_and_metadata() {
        let frame = finalized(8);
        frame.add_ancillary_string("lang", "en").unwrap();
        frame.set_metadata(Metadata::with_sequence(9));

        let copy = frame.copy(MemoryChunk::new_unpooled(8).unwrap()).unwrap();
        assert!(!copy.is_finalized());
        copy.finalize().unwrap();

        assert!(copy.ancillary("lang").unwrap().ptr_eq(&frame.ancillary("lang").unwrap()));
        assert!(Arc::ptr_eq(&copy.metadata().unwrap(), &frame.metadata().unwrap()));
        assert_eq!(&*copy.read_packed().unwrap(), &[7; 8]);
        assert!(frame.inner.rw.is_free());
    }

    #[test]
    fn test_copy_destination_checks() {
        let frame = finalized(8);
        let small = MemoryChunk::new_unpooled(4).unwrap();
        assert!(matches!(
            frame.copy(small),
            Err(Error::NoSpace {
                required: 8,
                available: 4
            })
        ));

        let shared = MemoryChunk::new_unpooled(8).unwrap();
        let _other = shared.clone();
        assert!(matches!(frame.copy(shared), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_concurrent_readers() {
        let frame = finalized(64);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let frame = frame.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let view = frame.read(0).unwrap();
                        assert_eq!(view.len(), 64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(frame.inner.rw.is_free());
        assert_eq!(frame.refcount(), 1);
    }
}
