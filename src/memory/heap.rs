//! Heap backing store.

use super::backing::{ChunkStorage, MemoryBacking};
use super::defaults::{HEAP_COOKIE, WRAP_COOKIE};
use crate::error::{Error, Result};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Backing store that allocates zeroed chunks on the heap.
///
/// This is the simplest backend, suitable for single-process pipelines.
/// Chunks carry the [`HEAP_COOKIE`] tag.
///
/// # Example
///
/// ```rust,ignore
/// use mediabuf::memory::{GrowPolicy, HeapMemory, MemoryPool, PoolConfig};
///
/// let pool = MemoryPool::new(
///     HeapMemory::shared(),
///     PoolConfig::new(1024, 4).with_policy(GrowPolicy::NoGrow),
/// )?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapMemory;

impl HeapMemory {
    /// Process-wide heap backing instance.
    pub fn shared() -> Arc<dyn MemoryBacking> {
        heap_backing()
    }
}

impl MemoryBacking for HeapMemory {
    fn cookie(&self) -> u64 {
        HEAP_COOKIE
    }

    fn alloc(&self, storage: &mut ChunkStorage) -> Result<()> {
        let size = storage.size();
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;
        data.resize(size, 0u8);

        let raw = Box::into_raw(data.into_boxed_slice());
        let ptr = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("allocator returned null".into()))?;
        // SAFETY: the box stays leaked until `free` rebuilds it.
        unsafe { storage.set_region(ptr, size) };
        Ok(())
    }

    fn free(&self, storage: &mut ChunkStorage) {
        if let Some(ptr) = storage.data() {
            let raw = std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), storage.size());
            // SAFETY: region was produced by `alloc` from a leaked boxed
            // slice of exactly this length.
            drop(unsafe { Box::from_raw(raw) });
            storage.clear_region();
        }
    }
}

/// Release callback of a wrapped external buffer.
pub(crate) type ReleaseFn = Box<dyn FnOnce(NonNull<u8>, usize) + Send>;

/// Private state of a wrapped chunk.
pub(crate) struct WrapRelease(pub(crate) Mutex<Option<ReleaseFn>>);

/// Backing store for externally owned buffers. Allocation is not
/// supported; chunks are created through [`MemoryChunk::wrap`](super::MemoryChunk::wrap).
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WrappedMemory;

impl MemoryBacking for WrappedMemory {
    fn cookie(&self) -> u64 {
        WRAP_COOKIE
    }

    fn alloc(&self, _storage: &mut ChunkStorage) -> Result<()> {
        Err(Error::InvalidArgument(
            "wrapped memory cannot allocate".into(),
        ))
    }

    fn free(&self, storage: &mut ChunkStorage) {
        let Some(ptr) = storage.data() else { return };
        let size = storage.size();
        let release = storage
            .take_private::<WrapRelease>()
            .and_then(|state| {
                let WrapRelease(release) = *state;
                release.into_inner().unwrap_or_else(PoisonError::into_inner)
            });
        storage.clear_region();
        if let Some(release) = release {
            release(ptr, size);
        }
    }
}

pub(crate) fn heap_backing() -> Arc<dyn MemoryBacking> {
    static HEAP: OnceLock<Arc<HeapMemory>> = OnceLock::new();
    HEAP.get_or_init(|| Arc::new(HeapMemory)).clone()
}

pub(crate) fn wrap_backing() -> Arc<dyn MemoryBacking> {
    static WRAPPED: OnceLock<Arc<WrappedMemory>> = OnceLock::new();
    WRAPPED.get_or_init(|| Arc::new(WrappedMemory)).clone()
}
