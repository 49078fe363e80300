//! Shared-memory slot arena using Linux memfd.
//!
//! One anonymous memfd is mapped once and carved into `slot_count` slots of
//! `slot_size` bytes. Each chunk allocated from the arena occupies one slot,
//! and its slot index is the handle another process uses to find the same
//! bytes in its own mapping of the fd.
//!
//! ```text
//! base ─┬──────────┬──────────┬──────────┬─────
//!       │ slot 0   │ slot 1   │ slot 2   │ ...
//!       └──────────┴──────────┴──────────┴─────
//!        slot_size
//! ```

use super::backing::{ChunkStorage, MemoryBacking};
use super::chunk::{ChunkInfo, MemoryChunk};
use super::defaults::SHM_COOKIE;
use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::mm::{MapFlags, ProtFlags};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`ShmArena`].
#[derive(Debug, Clone)]
pub struct ShmConfig {
    /// Debug name of the memfd (visible in `/proc/self/fd/`).
    pub name: String,
    /// Size of every slot in bytes.
    pub slot_size: usize,
    /// Number of slots.
    pub slot_count: usize,
}

impl ShmConfig {
    /// Create a config for `slot_count` slots of `slot_size` bytes.
    pub fn new(name: impl Into<String>, slot_size: usize, slot_count: usize) -> Self {
        Self {
            name: name.into(),
            slot_size,
            slot_count,
        }
    }
}

// ============================================================================
// Slot table
// ============================================================================

/// First-fit table of used slots, one bit per slot.
struct SlotTable {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl SlotTable {
    fn new(len: usize) -> Self {
        Self {
            words: (0..len.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
            len,
        }
    }

    /// Mark the lowest free slot used.
    fn claim(&self) -> Option<usize> {
        for (word_idx, word) in self.words.iter().enumerate() {
            let mut current = word.load(Ordering::Relaxed);
            while current != u64::MAX {
                let bit = (!current).trailing_zeros() as usize;
                let index = word_idx * 64 + bit;
                if index >= self.len {
                    return None;
                }
                match word.compare_exchange_weak(
                    current,
                    current | (1u64 << bit),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(index),
                    Err(actual) => current = actual,
                }
            }
        }
        None
    }

    fn release(&self, index: usize) {
        if index < self.len {
            self.words[index / 64].fetch_and(!(1u64 << (index % 64)), Ordering::Release);
        }
    }

    fn used(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

// ============================================================================
// ShmArena
// ============================================================================

/// Per-chunk private state: the slot this chunk occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmSlot {
    /// Slot index within the arena.
    pub index: usize,
}

/// A backing store that hands out fixed-size slots of one memfd mapping.
///
/// Slot selection is first-fit. Every chunk carries the [`SHM_COOKIE`] tag
/// and its slot index, retrievable with [`slot_index`](Self::slot_index).
///
/// # Example
///
/// ```rust,ignore
/// use mediabuf::memory::{GrowPolicy, MemoryPool, PoolConfig, ShmArena, ShmConfig};
///
/// let arena = ShmArena::new(ShmConfig::new("video", 4096, 16))?;
/// let pool = MemoryPool::new(
///     arena.clone(),
///     PoolConfig::new(4096, 16).with_policy(GrowPolicy::NoGrow),
/// )?;
///
/// let chunk = pool.get()?;
/// let index = arena.slot_index(&chunk)?;
/// // Send arena.as_raw_fd() once, then `index` per chunk...
/// ```
pub struct ShmArena {
    fd: OwnedFd,
    base: NonNull<u8>,
    map_len: usize,
    slot_size: usize,
    slot_count: usize,
    slots: SlotTable,
    name: String,
}

impl ShmArena {
    /// Create and map a new arena.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the slot size or count is 0 or
    /// the total size overflows, and a system error if `memfd_create`,
    /// `ftruncate`, or `mmap` fails.
    pub fn new(config: ShmConfig) -> Result<std::sync::Arc<Self>> {
        if config.slot_size == 0 || config.slot_count == 0 {
            return Err(Error::InvalidArgument(
                "slot size and count must be greater than 0".into(),
            ));
        }
        let map_len = config
            .slot_size
            .checked_mul(config.slot_count)
            .ok_or_else(|| Error::InvalidArgument("arena size overflows".into()))?;

        let cname =
            CString::new(config.name.as_str()).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let fd = rustix::fs::memfd_create(&cname, rustix::fs::MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, map_len as u64)?;

        // SAFETY: fresh mapping of a file we just sized; no existing memory
        // is affected.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                map_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };
        let base = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

        tracing::debug!(
            name = %config.name,
            slot_size = config.slot_size,
            slot_count = config.slot_count,
            "shm arena mapped"
        );

        Ok(std::sync::Arc::new(Self {
            fd,
            base,
            map_len,
            slot_size: config.slot_size,
            slot_count: config.slot_count,
            slots: SlotTable::new(config.slot_count),
            name: config.name,
        }))
    }

    /// Slot index of a chunk allocated from this arena.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the chunk comes from another
    /// backing store or another arena.
    pub fn slot_index(&self, chunk: &MemoryChunk) -> Result<usize> {
        let index = Self::slot_index_from_info(&chunk.info())?;
        let expected = self.slot_ptr(index);
        if index >= self.slot_count || expected != chunk.as_ptr() {
            return Err(Error::InvalidArgument(format!(
                "chunk does not belong to arena '{}'",
                self.name
            )));
        }
        Ok(index)
    }

    /// Slot index recorded in a chunk's info.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the info does not carry the
    /// shared-memory tag.
    pub fn slot_index_from_info(info: &ChunkInfo) -> Result<usize> {
        if info.cookie != SHM_COOKIE {
            return Err(Error::InvalidArgument(format!(
                "cookie {:#x} is not a shared-memory chunk",
                info.cookie
            )));
        }
        usize::try_from(info.specific)
            .map_err(|_| Error::InvalidArgument("slot index out of range".into()))
    }

    /// Size of every slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Number of unused slots. Snapshot only.
    pub fn free_slots(&self) -> usize {
        self.slot_count - self.slots.used()
    }

    /// Debug name of the memfd.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw file descriptor of the memfd, for handoff over a Unix socket.
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Total mapped size in bytes.
    pub fn len(&self) -> usize {
        self.map_len
    }

    /// Whether the arena maps no memory. Always false for a live arena.
    pub fn is_empty(&self) -> bool {
        self.map_len == 0
    }

    fn slot_ptr(&self, index: usize) -> *mut u8 {
        self.base.as_ptr().wrapping_add(index.wrapping_mul(self.slot_size))
    }
}

impl MemoryBacking for ShmArena {
    fn cookie(&self) -> u64 {
        SHM_COOKIE
    }

    fn alloc(&self, storage: &mut ChunkStorage) -> Result<()> {
        if storage.size() > self.slot_size {
            return Err(Error::InvalidArgument(format!(
                "requested {} bytes, slots hold {}",
                storage.size(),
                self.slot_size
            )));
        }
        let index = self.slots.claim().ok_or_else(|| {
            Error::AllocationFailed(format!("shm arena '{}' has no free slot", self.name))
        })?;

        let ptr = NonNull::new(self.slot_ptr(index))
            .ok_or_else(|| Error::AllocationFailed("null slot address".into()))?;
        // SAFETY: slot `index` lies inside the mapping, which outlives every
        // chunk because each chunk holds a reference to the arena.
        unsafe { storage.set_region(ptr, self.slot_size) };
        storage.set_specific(index as u64);
        storage.set_private(ShmSlot { index });
        Ok(())
    }

    fn free(&self, storage: &mut ChunkStorage) {
        if let Some(slot) = storage.take_private::<ShmSlot>() {
            self.slots.release(slot.index);
        }
        storage.clear_region();
    }
}

impl Drop for ShmArena {
    fn drop(&mut self) {
        // SAFETY: the mapping was created in `new` with this length, and no
        // chunk can outlive the arena.
        unsafe {
            let _ = rustix::mm::munmap(self.base.as_ptr().cast(), self.map_len);
        }
    }
}

// SAFETY: the mapping is process-wide shared memory without thread
// affinity, and the slot table is atomic.
unsafe impl Send for ShmArena {}
unsafe impl Sync for ShmArena {}

impl AsFd for ShmArena {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl std::fmt::Debug for ShmArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmArena")
            .field("name", &self.name)
            .field("slot_size", &self.slot_size)
            .field("slot_count", &self.slot_count)
            .field("free_slots", &self.free_slots())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{GrowPolicy, MemoryPool, PoolConfig};

    #[test]
    fn test_arena_creation() {
        let arena = ShmArena::new(ShmConfig::new("test-arena", 4096, 4)).unwrap();
        assert_eq!(arena.slot_size(), 4096);
        assert_eq!(arena.slot_count(), 4);
        assert_eq!(arena.free_slots(), 4);
        assert_eq!(arena.len(), 16384);
        assert!(arena.as_raw_fd() >= 0);
    }

    #[test]
    fn test_zero_size_fails() {
        assert!(ShmArena::new(ShmConfig::new("test", 0, 4)).is_err());
        assert!(ShmArena::new(ShmConfig::new("test", 64, 0)).is_err());
    }

    #[test]
    fn test_first_fit_slots() {
        let arena = ShmArena::new(ShmConfig::new("test-fit", 64, 3)).unwrap();
        let a = MemoryChunk::with_backing(arena.clone(), 64).unwrap();
        let b = MemoryChunk::with_backing(arena.clone(), 64).unwrap();
        let c = MemoryChunk::with_backing(arena.clone(), 64).unwrap();
        assert_eq!(arena.slot_index(&a).unwrap(), 0);
        assert_eq!(arena.slot_index(&b).unwrap(), 1);
        assert_eq!(arena.slot_index(&c).unwrap(), 2);
        assert!(matches!(
            MemoryChunk::with_backing(arena.clone(), 64),
            Err(Error::AllocationFailed(_))
        ));

        drop(b);
        let d = MemoryChunk::with_backing(arena.clone(), 64).unwrap();
        assert_eq!(arena.slot_index(&d).unwrap(), 1);
        assert_eq!(d.info().specific, 1);
    }

    #[test]
    fn test_slot_index_rejects_foreign_chunk() {
        let arena = ShmArena::new(ShmConfig::new("test-foreign", 64, 2)).unwrap();
        let heap = MemoryChunk::new_unpooled(64).unwrap();
        assert!(matches!(
            arena.slot_index(&heap),
            Err(Error::InvalidArgument(_))
        ));

        let other = ShmArena::new(ShmConfig::new("test-other", 64, 2)).unwrap();
        let chunk = MemoryChunk::with_backing(other.clone(), 64).unwrap();
        assert!(arena.slot_index(&chunk).is_err());
        assert_eq!(other.slot_index(&chunk).unwrap(), 0);
    }

    #[test]
    fn test_slot_index_from_info() {
        let info = ChunkInfo {
            cookie: SHM_COOKIE,
            specific: 5,
            size: 64,
            pooled: true,
        };
        assert_eq!(ShmArena::slot_index_from_info(&info).unwrap(), 5);

        let heap = MemoryChunk::new_unpooled(8).unwrap();
        assert!(ShmArena::slot_index_from_info(&heap.info()).is_err());
    }

    #[test]
    fn test_pool_over_arena() {
        let arena = ShmArena::new(ShmConfig::new("test-pool", 128, 4)).unwrap();
        let pool = MemoryPool::new(
            arena.clone(),
            PoolConfig::new(128, 2).with_policy(GrowPolicy::SmartGrow),
        )
        .unwrap();
        assert_eq!(arena.free_slots(), 2);

        let chunks: Vec<_> = (0..4).map(|_| pool.get().unwrap()).collect();
        assert_eq!(arena.free_slots(), 0);
        assert!(pool.get().is_err());

        drop(chunks);
        assert_eq!(pool.counts(), (2, 2));
        assert_eq!(arena.free_slots(), 2);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let arena = ShmArena::new(ShmConfig::new("test-big", 64, 2)).unwrap();
        assert!(matches!(
            MemoryChunk::with_backing(arena.clone(), 128),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(arena.free_slots(), 2);
    }
}
