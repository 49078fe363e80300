//! Integration tests for the shared-memory arena backing store.
//!
//! These tests put pools and frames on top of a memfd arena and check that
//! a chunk's slot index and the arena fd are enough to find its bytes
//! through an independent mapping, as a receiving process would.

use mediabuf::format::{PixelFormat, RawFrameInfo, VideoFormat};
use mediabuf::frame::RawVideoFrame;
use mediabuf::memory::{GrowPolicy, MemoryBacking, MemoryPool, PoolConfig, ShmArena, ShmConfig};
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};
use std::sync::Arc;

const SLOT: usize = 4096;

fn arena_pool(name: &str, slots: usize, policy: GrowPolicy) -> (Arc<ShmArena>, MemoryPool) {
    let arena = ShmArena::new(ShmConfig::new(name, SLOT, slots)).unwrap();
    let backing: Arc<dyn MemoryBacking> = arena.clone();
    let pool = MemoryPool::new(backing, PoolConfig::new(SLOT, slots).with_policy(policy)).unwrap();
    (arena, pool)
}

/// Map the whole arena a second time through its fd.
fn remap(arena: &ShmArena) -> &'static [u8] {
    // SAFETY: fresh read-only shared mapping of the arena file; the test
    // unmaps it before the arena is dropped.
    unsafe {
        let ptr = mmap(
            std::ptr::null_mut(),
            arena.len(),
            ProtFlags::READ,
            MapFlags::SHARED,
            arena,
            0,
        )
        .unwrap();
        std::slice::from_raw_parts(ptr.cast::<u8>(), arena.len())
    }
}

fn unmap(view: &'static [u8]) {
    // SAFETY: `view` came from `remap` and is no longer used.
    unsafe { munmap(view.as_ptr().cast_mut().cast(), view.len()).unwrap() };
}

// ============================================================================
// Handoff Tests
// ============================================================================

/// Test that bytes written through a pooled chunk are visible at its slot
/// offset in a second mapping of the arena.
#[test]
fn test_slot_handoff_through_fd() {
    let (arena, pool) = arena_pool("handoff", 4, GrowPolicy::NoGrow);

    let _first = pool.get().unwrap();
    let mut chunk = pool.get().unwrap();
    chunk.get_mut().unwrap()[..5].copy_from_slice(b"frame");

    let index = arena.slot_index(&chunk).unwrap();
    assert_eq!(index, 1);

    let view = remap(&arena);
    assert_eq!(&view[index * SLOT..index * SLOT + 5], b"frame");
    unmap(view);
}

/// Test that a frame's segment info carries the slot index.
#[test]
fn test_frame_segment_slot_index() {
    let (arena, pool) = arena_pool("frames", 2, GrowPolicy::NoGrow);
    let format = VideoFormat::new(64, 64, PixelFormat::Gray8);

    let frame = RawVideoFrame::new(RawFrameInfo::new(format));
    let mut chunk = pool.get().unwrap();
    chunk.get_mut().unwrap()[..format.frame_size()].fill(0x42);
    frame.set_plane(0, chunk, 0, format.frame_size()).unwrap();
    frame.finalize().unwrap();

    let (info, chunk) = frame.segment_info(0).unwrap();
    let index = ShmArena::slot_index_from_info(&info).unwrap();
    assert_eq!(index, arena.slot_index(&chunk).unwrap());
    assert_eq!(frame.uses_pool(&pool).unwrap(), (true, true));

    let view = remap(&arena);
    let start = index * SLOT;
    assert!(view[start..start + format.frame_size()].iter().all(|&b| b == 0x42));
    unmap(view);
}

// ============================================================================
// Slot Accounting Tests
// ============================================================================

/// Test that pool shrinking hands slots back to the arena.
#[test]
fn test_shrink_returns_slots() {
    let arena = ShmArena::new(ShmConfig::new("shrink", SLOT, 6)).unwrap();
    let backing: Arc<dyn MemoryBacking> = arena.clone();
    let pool = MemoryPool::new(
        backing,
        PoolConfig::new(SLOT, 2).with_policy(GrowPolicy::LowMemGrow),
    )
    .unwrap();
    assert_eq!(arena.free_slots(), 4);

    let held: Vec<_> = (0..6).map(|_| pool.get().unwrap()).collect();
    assert_eq!(arena.free_slots(), 0);
    assert!(pool.get().is_err());

    drop(held);
    assert_eq!(pool.counts(), (2, 2));
    assert_eq!(arena.free_slots(), 4);

    drop(pool);
    assert_eq!(arena.free_slots(), 6);
}

/// Test that chunks from two arenas are told apart.
#[test]
fn test_foreign_arena_chunk() {
    let (a, pool_a) = arena_pool("arena-a", 1, GrowPolicy::NoGrow);
    let (b, _pool_b) = arena_pool("arena-b", 1, GrowPolicy::NoGrow);

    let chunk = pool_a.get().unwrap();
    assert_eq!(a.slot_index(&chunk).unwrap(), 0);
    assert!(b.slot_index(&chunk).is_err());
    assert_eq!(a.name(), "arena-a");
}
