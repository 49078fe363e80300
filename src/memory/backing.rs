//! Backing-store trait and per-chunk storage record.

use crate::error::Result;
use std::any::Any;
use std::fmt;
use std::ptr::NonNull;

/// Pluggable backing store for [`MemoryChunk`](super::MemoryChunk)s.
///
/// A backing store decides where chunk memory comes from. Every hook is
/// optional: the defaults do nothing, so an implementation only overrides
/// what it needs.
///
/// - `alloc` fills in a fresh [`ChunkStorage`] (data region, private state).
/// - `pool_get` runs each time a pool hands the chunk out.
/// - `pool_put` runs each time the chunk returns to its pool's free set.
/// - `free` runs once, when the chunk itself is destroyed.
///
/// # Safety contract
///
/// A region registered through [`ChunkStorage::set_region`] must stay valid
/// for reads and writes until `free` is called for that storage. If `alloc`
/// fails it must leave nothing behind that needs `free`.
pub trait MemoryBacking: Send + Sync {
    /// Type tag stamped on every chunk this store produces.
    fn cookie(&self) -> u64 {
        0
    }

    /// Provide memory for a new chunk of `storage.size()` bytes.
    fn alloc(&self, storage: &mut ChunkStorage) -> Result<()> {
        let _ = storage;
        Ok(())
    }

    /// Called when a pool hands out the chunk.
    fn pool_get(&self, storage: &ChunkStorage) -> Result<()> {
        let _ = storage;
        Ok(())
    }

    /// Called when the chunk returns to its pool.
    fn pool_put(&self, storage: &ChunkStorage) {
        let _ = storage;
    }

    /// Release the memory registered by `alloc`.
    fn free(&self, storage: &mut ChunkStorage) {
        let _ = storage;
    }
}

/// Storage record of one chunk, owned by the chunk and filled by its backing.
pub struct ChunkStorage {
    data: Option<NonNull<u8>>,
    size: usize,
    cookie: u64,
    specific: u64,
    private: Option<Box<dyn Any + Send + Sync>>,
}

impl ChunkStorage {
    pub(crate) fn new(size: usize, cookie: u64) -> Self {
        Self {
            data: None,
            size,
            cookie,
            specific: 0,
            private: None,
        }
    }

    /// Start of the data region, if one was registered.
    pub fn data(&self) -> Option<NonNull<u8>> {
        self.data
    }

    /// Size of the chunk in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Type tag of the producing backing store.
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Override the type tag.
    pub fn set_cookie(&mut self, cookie: u64) {
        self.cookie = cookie;
    }

    /// Implementation-specific integer exposed through [`ChunkInfo`](super::ChunkInfo).
    pub fn specific(&self) -> u64 {
        self.specific
    }

    /// Set the implementation-specific integer.
    pub fn set_specific(&mut self, specific: u64) {
        self.specific = specific;
    }

    /// Register the data region of this chunk. `size` replaces the
    /// requested size.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes until the
    /// backing store's `free` hook runs for this storage.
    pub unsafe fn set_region(&mut self, ptr: NonNull<u8>, size: usize) {
        self.data = Some(ptr);
        self.size = size;
    }

    /// Forget the data region. Used by `free` hooks after releasing it.
    pub fn clear_region(&mut self) {
        self.data = None;
    }

    /// Attach implementation-private state.
    pub fn set_private<T: Any + Send + Sync>(&mut self, state: T) {
        self.private = Some(Box::new(state));
    }

    /// Borrow the private state, if it has type `T`.
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.as_ref()?.downcast_ref::<T>()
    }

    /// Take the private state out, if it has type `T`.
    pub fn take_private<T: Any>(&mut self) -> Option<Box<T>> {
        let state = self.private.take()?;
        match state.downcast::<T>() {
            Ok(state) => Some(state),
            Err(other) => {
                self.private = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for ChunkStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStorage")
            .field("data", &self.data)
            .field("size", &self.size)
            .field("cookie", &format_args!("{:#x}", self.cookie))
            .field("specific", &self.specific)
            .finish_non_exhaustive()
    }
}

// SAFETY: the data pointer refers to memory owned by the backing store for
// the lifetime of the storage; it carries no thread affinity. Private state
// is itself Send + Sync.
unsafe impl Send for ChunkStorage {}
unsafe impl Sync for ChunkStorage {}
