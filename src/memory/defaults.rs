//! Default names, tags and layout limits.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mediabuf::memory::{defaults, ChunkInfo};
//!
//! fn is_heap(info: &ChunkInfo) -> bool {
//!     info.cookie == defaults::HEAP_COOKIE
//! }
//! ```

// =============================================================================
// Names
// =============================================================================

/// Name given to pools created without one.
pub const DEFAULT_POOL_NAME: &str = "default";

/// Name given to queues created without one.
pub const DEFAULT_QUEUE_NAME: &str = "queue";

/// Queue capacity when none is configured (0 = unbounded).
pub const DEFAULT_QUEUE_CAPACITY: usize = 0;

// =============================================================================
// Backing store tags
// =============================================================================

/// Tag of heap-allocated chunks ("generic " in ASCII).
pub const HEAP_COOKIE: u64 = 0x6765_6e65_7269_6320;

/// Tag of wrapped external buffers ("genericw" in ASCII).
pub const WRAP_COOKIE: u64 = 0x6765_6e65_7269_6377;

/// Tag of shared-memory arena chunks ("shm" in ASCII).
pub const SHM_COOKIE: u64 = 0x73_686d;

// =============================================================================
// Frame layout
// =============================================================================

/// Maximum number of planes in a raw video frame.
pub const MAX_PLANES: usize = 4;
