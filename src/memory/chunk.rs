//! Reference-counted memory chunks.

use super::backing::{ChunkStorage, MemoryBacking};
use super::heap::{ReleaseFn, WrapRelease, heap_backing, wrap_backing};
use super::pool::{MemoryPool, PoolShared};
use crate::error::{Error, Result};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Identity of a chunk: which backing produced it and its backing-specific tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Type tag of the producing backing store.
    pub cookie: u64,
    /// Backing-specific integer (slot index for shared memory).
    pub specific: u64,
    /// Chunk size in bytes.
    pub size: usize,
    /// Whether the chunk belongs to a pool.
    pub pooled: bool,
}

/// Shared state behind every handle to one chunk.
pub(crate) struct ChunkInner {
    pub(crate) storage: ChunkStorage,
    backing: Arc<dyn MemoryBacking>,
    /// Live handles. Zero means parked in a pool's free set.
    pub(crate) refcount: AtomicUsize,
    pool: Option<Weak<PoolShared>>,
}

impl ChunkInner {
    /// Allocate storage through `backing`. The result starts with one reference.
    pub(crate) fn allocate(
        backing: Arc<dyn MemoryBacking>,
        size: usize,
        pool: Option<Weak<PoolShared>>,
    ) -> Result<Self> {
        let mut storage = ChunkStorage::new(size, backing.cookie());
        backing.alloc(&mut storage)?;
        Ok(Self {
            storage,
            backing,
            refcount: AtomicUsize::new(1),
            pool,
        })
    }

    /// Claim a parked chunk (refcount 0 -> 1).
    pub(crate) fn try_claim(&self) -> bool {
        self.refcount
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

impl Drop for ChunkInner {
    fn drop(&mut self) {
        self.backing.free(&mut self.storage);
    }
}

/// A reference-counted handle to a region of memory.
///
/// Cloning a handle adds a reference; dropping one removes it. When the last
/// handle goes away the chunk is either returned to its pool (which may keep
/// or free it depending on its [`GrowPolicy`](super::GrowPolicy)) or, for an
/// unpooled chunk, freed through its backing store.
///
/// # Example
///
/// ```rust,ignore
/// use mediabuf::memory::MemoryChunk;
///
/// let mut chunk = MemoryChunk::new_unpooled(1024)?;
/// chunk.get_mut().unwrap()[..5].copy_from_slice(b"hello");
///
/// let shared = chunk.clone();
/// assert_eq!(chunk.refcount(), 2);
/// ```
pub struct MemoryChunk {
    inner: Arc<ChunkInner>,
}

impl MemoryChunk {
    pub(crate) fn from_inner(inner: Arc<ChunkInner>) -> Self {
        Self { inner }
    }

    /// Allocate a zeroed heap chunk that does not belong to any pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `capacity` is 0.
    pub fn new_unpooled(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "chunk capacity must be greater than 0".into(),
            ));
        }
        Self::with_backing(heap_backing(), capacity)
    }

    /// Allocate an unpooled chunk of `size` bytes from any backing store.
    pub fn with_backing(backing: Arc<dyn MemoryBacking>, size: usize) -> Result<Self> {
        let inner = ChunkInner::allocate(backing, size, None)?;
        Ok(Self::from_inner(Arc::new(inner)))
    }

    /// Wrap an externally owned buffer.
    ///
    /// `release` is called with `(ptr, len)` once the last handle drops.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until
    /// `release` runs, and nothing else may free it before then.
    pub unsafe fn wrap<F>(ptr: NonNull<u8>, len: usize, release: F) -> Self
    where
        F: FnOnce(NonNull<u8>, usize) + Send + 'static,
    {
        let backing = wrap_backing();
        let mut storage = ChunkStorage::new(len, backing.cookie());
        // SAFETY: guaranteed by the caller.
        unsafe { storage.set_region(ptr, len) };
        let release: ReleaseFn = Box::new(release);
        storage.set_private(WrapRelease(Mutex::new(Some(release))));
        Self::from_inner(Arc::new(ChunkInner {
            storage,
            backing,
            refcount: AtomicUsize::new(1),
            pool: None,
        }))
    }

    /// Take ownership of a boxed slice as chunk memory.
    pub fn from_boxed_slice(data: Box<[u8]>) -> Self {
        let len = data.len();
        let raw = Box::into_raw(data);
        let ptr = NonNull::new(raw.cast::<u8>()).unwrap_or(NonNull::dangling());
        let release = |ptr: NonNull<u8>, len: usize| {
            let raw = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len);
            // SAFETY: `raw` came from Box::into_raw and is released once.
            drop(unsafe { Box::from_raw(raw) });
        };
        // SAFETY: the allocation stays alive until `release` rebuilds and
        // drops the box.
        unsafe { Self::wrap(ptr, len, release) }
    }

    /// Take ownership of a vector as chunk memory.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::from_boxed_slice(data.into_boxed_slice())
    }

    /// Data pointer and size. The pointer is null if the backing store
    /// registered no region.
    pub fn data(&self) -> (*mut u8, usize) {
        (self.as_ptr(), self.capacity())
    }

    /// Raw pointer to the start of the chunk (null if no region).
    pub fn as_ptr(&self) -> *mut u8 {
        self.inner
            .storage
            .data()
            .map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    /// Chunk size in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.storage.size()
    }

    /// View the chunk contents.
    ///
    /// # Safety
    ///
    /// No other handle may be writing to the chunk while the slice lives.
    pub unsafe fn as_slice(&self) -> &[u8] {
        match self.inner.storage.data() {
            // SAFETY: region valid for `size` bytes; no writer per the caller.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.capacity()) },
            None => &[],
        }
    }

    /// Mutable access to the contents while this is the only handle.
    ///
    /// Returns `None` if the chunk is shared or has no data region.
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        if self.refcount() != 1 {
            return None;
        }
        let ptr = self.inner.storage.data()?;
        // SAFETY: refcount 1 means no other handle exists, and `&mut self`
        // prevents aliasing through this one.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.capacity()) })
    }

    /// Current number of handles.
    pub fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::Acquire)
    }

    /// Type tag of the producing backing store.
    pub fn cookie(&self) -> u64 {
        self.inner.storage.cookie()
    }

    /// Identity information for this chunk.
    pub fn info(&self) -> ChunkInfo {
        ChunkInfo {
            cookie: self.inner.storage.cookie(),
            specific: self.inner.storage.specific(),
            size: self.inner.storage.size(),
            pooled: self.inner.pool.is_some(),
        }
    }

    /// Backing-specific private state, if it has type `T`.
    pub fn private<T: std::any::Any>(&self) -> Option<&T> {
        self.inner.storage.private::<T>()
    }

    /// Whether this chunk was created by a pool.
    pub fn is_pooled(&self) -> bool {
        self.inner.pool.is_some()
    }

    /// Whether this chunk belongs to `pool`.
    pub fn is_from_pool(&self, pool: &MemoryPool) -> bool {
        self.inner
            .pool
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), pool.shared_ptr()))
    }

    /// Whether two handles refer to the same chunk.
    pub fn ptr_eq(&self, other: &MemoryChunk) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Clone for MemoryChunk {
    fn clone(&self) -> Self {
        self.inner.refcount.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for MemoryChunk {
    fn drop(&mut self) {
        let refcount = &self.inner.refcount;
        let mut current = refcount.load(Ordering::Acquire);
        while current > 1 {
            match refcount.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }

        // Last handle. Nobody else can clone it now and a pool only claims
        // chunks at zero, so the final transition is ours alone.
        match self.inner.pool.as_ref().and_then(Weak::upgrade) {
            Some(pool) => pool.put(&self.inner),
            None => refcount.store(0, Ordering::Release),
        }
    }
}

impl fmt::Debug for MemoryChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChunk")
            .field("ptr", &self.as_ptr())
            .field("size", &self.capacity())
            .field("cookie", &format_args!("{:#x}", self.cookie()))
            .field("refcount", &self.refcount())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
