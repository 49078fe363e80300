//! Pooled, reference-counted memory.
//!
//! # Architecture
//!
//! - [`MemoryBacking`]: Trait for backing stores (heap, shared memory, or your own)
//! - [`MemoryChunk`]: Refcounted handle to one region; returns to its pool on last drop
//! - [`MemoryPool`]: Uniform-size chunks under a [`GrowPolicy`]
//! - [`HeapMemory`] / [`ShmArena`]: The two bundled backing stores
//!
//! # Example
//!
//! ```rust,ignore
//! use mediabuf::memory::{GrowPolicy, HeapMemory, MemoryPool, PoolConfig};
//!
//! // 4 chunks of 64KB, allowed to grow and shrink back
//! let pool = MemoryPool::new(
//!     HeapMemory::shared(),
//!     PoolConfig::new(64 * 1024, 4).with_policy(GrowPolicy::SmartGrow),
//! )?;
//!
//! let mut chunk = pool.get()?;
//! chunk.get_mut().unwrap()[..5].copy_from_slice(b"hello");
//!
//! // Chunk goes back to the pool when the last handle drops
//! drop(chunk);
//! ```

mod backing;
mod chunk;
pub mod defaults;
mod heap;
mod pool;
mod shm;

pub use backing::{ChunkStorage, MemoryBacking};
pub use chunk::{ChunkInfo, MemoryChunk};
pub use heap::HeapMemory;
pub use pool::{GrowPolicy, MemoryPool, PoolConfig, PoolStats};
pub use shm::{ShmArena, ShmConfig, ShmSlot};
