//! Growable pool of uniform-size chunks.

use super::backing::MemoryBacking;
use super::chunk::{ChunkInner, MemoryChunk};
use super::defaults::DEFAULT_POOL_NAME;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Configuration
// ============================================================================

/// How a pool reacts when it runs out of free chunks, and when it gives
/// memory back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GrowPolicy {
    /// Never allocate past the initial count; `get()` on an empty pool fails.
    NoGrow,
    /// Allocate on demand and keep every chunk forever.
    #[default]
    Grow,
    /// Allocate on demand. A released chunk is freed whenever the free count
    /// would exceed the initial count.
    SmartGrow,
    /// Allocate on demand. A released chunk is freed whenever the total
    /// count exceeds the initial count.
    LowMemGrow,
}

/// Configuration for a [`MemoryPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Size of every chunk in bytes. Must be greater than 0.
    pub chunk_size: usize,

    /// Chunks allocated up front.
    pub initial_count: usize,

    /// Upper bound on the total count (0 = unbounded).
    ///
    /// Must be 0 or at least `initial_count`.
    pub max_count: usize,

    /// Growth and shrink behavior.
    pub policy: GrowPolicy,

    /// Name for logging purposes.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: 0,
            initial_count: 0,
            max_count: 0,
            policy: GrowPolicy::default(),
            name: String::from(DEFAULT_POOL_NAME),
        }
    }
}

impl PoolConfig {
    /// Create a config for `initial_count` chunks of `chunk_size` bytes.
    pub fn new(chunk_size: usize, initial_count: usize) -> Self {
        Self {
            chunk_size,
            initial_count,
            ..Default::default()
        }
    }

    /// Set the growth policy.
    pub fn with_policy(mut self, policy: GrowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cap the total chunk count.
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    /// Set the pool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "chunk size must be greater than 0".into(),
            ));
        }
        if self.max_count > 0 && self.max_count < self.initial_count {
            return Err(Error::InvalidArgument(format!(
                "max count {} is below initial count {}",
                self.max_count, self.initial_count
            )));
        }
        Ok(())
    }
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Chunks owned by the pool.
    pub total: usize,
    /// Chunks parked in the free set.
    pub free: usize,
    /// Successful `get()` calls.
    pub acquisitions: u64,
    /// Chunks allocated beyond the initial set.
    pub grown: u64,
    /// Chunks freed by the shrink rule.
    pub shrunk: u64,
    /// `get()` calls refused with [`Error::PoolExhausted`].
    pub exhausted: u64,
}

// ============================================================================
// Shared state
// ============================================================================

struct PoolState {
    /// Registered chunks, scanned in order by `get()`.
    chunks: Vec<Arc<ChunkInner>>,
    free: usize,
    acquisitions: u64,
    grown: u64,
    shrunk: u64,
    exhausted: u64,
}

/// State shared between a pool and the chunks it created.
pub(crate) struct PoolShared {
    backing: Arc<dyn MemoryBacking>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a chunk whose last handle is being dropped.
    pub(crate) fn put(&self, chunk: &Arc<ChunkInner>) {
        let released = {
            let mut state = self.lock();
            chunk.refcount.store(0, std::sync::atomic::Ordering::Release);
            state.free += 1;
            self.backing.pool_put(&chunk.storage);

            let shrink = match self.config.policy {
                GrowPolicy::NoGrow | GrowPolicy::Grow => false,
                GrowPolicy::SmartGrow => state.free > self.config.initial_count,
                GrowPolicy::LowMemGrow => state.chunks.len() > self.config.initial_count,
            };

            if shrink {
                let position = state.chunks.iter().position(|c| Arc::ptr_eq(c, chunk));
                position.map(|index| {
                    state.free -= 1;
                    state.shrunk += 1;
                    tracing::debug!(
                        pool = %self.config.name,
                        total = state.chunks.len() - 1,
                        "pool shrinking"
                    );
                    state.chunks.remove(index)
                })
            } else {
                None
            }
        };
        // Freed outside the lock once the releasing handle lets go too
        drop(released);
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for chunk in state.chunks.drain(..) {
            if chunk.refcount.load(std::sync::atomic::Ordering::Acquire) != 0 {
                tracing::warn!(
                    "pool {}: memory {:p} not released",
                    self.config.name,
                    Arc::as_ptr(&chunk)
                );
            }
        }
    }
}

// ============================================================================
// MemoryPool
// ============================================================================

/// A managed set of uniform-size, reference-counted chunks.
///
/// Chunks come from a pluggable [`MemoryBacking`]. A chunk handed out by
/// [`get`](Self::get) returns to the pool when its last handle drops; the
/// [`GrowPolicy`] then decides whether the pool keeps it.
///
/// Dropping the pool while chunks are still held logs a warning for each
/// one. Those chunks stay valid and are freed by their own last drop.
///
/// # Example
///
/// ```rust,ignore
/// use mediabuf::memory::{GrowPolicy, HeapMemory, MemoryPool, PoolConfig};
///
/// let pool = MemoryPool::new(
///     HeapMemory::shared(),
///     PoolConfig::new(1024, 4)
///         .with_policy(GrowPolicy::NoGrow)
///         .with_name("audio"),
/// )?;
///
/// let chunk = pool.get()?;
/// assert_eq!(pool.counts(), (4, 3));
/// drop(chunk);
/// assert_eq!(pool.counts(), (4, 4));
/// ```
pub struct MemoryPool {
    shared: Arc<PoolShared>,
}

impl MemoryPool {
    /// Create a pool and allocate its initial chunks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an invalid config, or the
    /// backing store's error if an initial allocation fails. Chunks
    /// allocated before the failure are released.
    pub fn new(backing: Arc<dyn MemoryBacking>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            backing,
            state: Mutex::new(PoolState {
                chunks: Vec::with_capacity(config.initial_count),
                free: 0,
                acquisitions: 0,
                grown: 0,
                shrunk: 0,
                exhausted: 0,
            }),
            config,
        });

        {
            let mut state = shared.lock();
            for _ in 0..shared.config.initial_count {
                // On error the partially filled pool drops and frees its chunks
                let chunk = ChunkInner::allocate(
                    Arc::clone(&shared.backing),
                    shared.config.chunk_size,
                    Some(Arc::downgrade(&shared)),
                )?;
                chunk
                    .refcount
                    .store(0, std::sync::atomic::Ordering::Release);
                state.chunks.push(Arc::new(chunk));
                state.free += 1;
            }
        }

        tracing::debug!(
            pool = %shared.config.name,
            chunk_size = shared.config.chunk_size,
            initial = shared.config.initial_count,
            max = shared.config.max_count,
            policy = ?shared.config.policy,
            "pool created"
        );

        Ok(Self { shared })
    }

    /// Create a pool from positional parameters.
    ///
    /// An empty `name` selects the default name.
    pub fn with_params(
        backing: Arc<dyn MemoryBacking>,
        chunk_size: usize,
        initial_count: usize,
        policy: GrowPolicy,
        max_count: usize,
        name: &str,
    ) -> Result<Self> {
        let mut config = PoolConfig::new(chunk_size, initial_count)
            .with_policy(policy)
            .with_max_count(max_count);
        if !name.is_empty() {
            config = config.with_name(name);
        }
        Self::new(backing, config)
    }

    /// Take a chunk from the pool, growing it if the policy allows.
    ///
    /// The returned chunk has a refcount of 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no chunk is free and the policy or
    /// the max count forbids growth.
    pub fn get(&self) -> Result<MemoryChunk> {
        let shared = &self.shared;
        let mut state = shared.lock();

        if let Some(chunk) = state.chunks.iter().find(|c| c.try_claim()).cloned() {
            if let Err(e) = shared.backing.pool_get(&chunk.storage) {
                chunk
                    .refcount
                    .store(0, std::sync::atomic::Ordering::Release);
                return Err(e);
            }
            state.free -= 1;
            state.acquisitions += 1;
            return Ok(MemoryChunk::from_inner(chunk));
        }

        let config = &shared.config;
        if config.policy == GrowPolicy::NoGrow {
            state.exhausted += 1;
            return Err(Error::PoolExhausted(config.name.clone()));
        }
        if config.max_count > 0 && state.chunks.len() >= config.max_count {
            state.exhausted += 1;
            tracing::warn!(
                pool = %config.name,
                max = config.max_count,
                "pool reached its max count, refusing to grow"
            );
            return Err(Error::PoolExhausted(config.name.clone()));
        }

        let chunk = Arc::new(ChunkInner::allocate(
            Arc::clone(&shared.backing),
            config.chunk_size,
            Some(Arc::downgrade(shared)),
        )?);
        // Not registered yet, so a failure simply frees it
        shared.backing.pool_get(&chunk.storage)?;
        state.chunks.push(Arc::clone(&chunk));
        state.grown += 1;
        state.acquisitions += 1;
        tracing::debug!(
            pool = %config.name,
            total = state.chunks.len(),
            "pool grown"
        );

        Ok(MemoryChunk::from_inner(chunk))
    }

    /// Total and free chunk counts.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.shared.lock();
        (state.chunks.len(), state.free)
    }

    /// Usage snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            total: state.chunks.len(),
            free: state.free,
            acquisitions: state.acquisitions,
            grown: state.grown,
            shrunk: state.shrunk,
            exhausted: state.exhausted,
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Size of every chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.shared.config.chunk_size
    }

    /// Chunks allocated at construction.
    pub fn initial_count(&self) -> usize {
        self.shared.config.initial_count
    }

    /// Upper bound on the total count (0 = unbounded).
    pub fn max_count(&self) -> usize {
        self.shared.config.max_count
    }

    /// Growth policy.
    pub fn policy(&self) -> GrowPolicy {
        self.shared.config.policy
    }

    /// Destroy the pool. Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    pub(crate) fn shared_ptr(&self) -> *const PoolShared {
        Arc::as_ptr(&self.shared)
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (total, free) = self.counts();
        f.debug_struct("MemoryPool")
            .field("name", &self.name())
            .field("chunk_size", &self.chunk_size())
            .field("policy", &self.policy())
            .field("total", &total)
            .field("free", &free)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapMemory;
    use crate::memory::backing::ChunkStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn pool(initial: usize, policy: GrowPolicy, max: usize) -> MemoryPool {
        MemoryPool::new(
            HeapMemory::shared(),
            PoolConfig::new(256, initial)
                .with_policy(policy)
                .with_max_count(max),
        )
        .unwrap()
    }

    #[test]
    fn test_pool_creation() {
        let pool = pool(4, GrowPolicy::NoGrow, 4);
        assert_eq!(pool.counts(), (4, 4));
        assert_eq!(pool.name(), DEFAULT_POOL_NAME);
        assert_eq!(pool.chunk_size(), 256);
    }

    #[test]
    fn test_invalid_config() {
        let heap = HeapMemory::shared();
        assert!(matches!(
            MemoryPool::new(Arc::clone(&heap), PoolConfig::new(0, 1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            MemoryPool::new(heap, PoolConfig::new(64, 8).with_max_count(4)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_no_grow_exhaustion() {
        let pool = pool(2, GrowPolicy::NoGrow, 0);
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(Error::PoolExhausted(_))));
        assert_eq!(pool.counts(), (2, 0));

        drop(a);
        assert_eq!(pool.counts(), (2, 1));
        let c = pool.get().unwrap();
        assert_eq!(c.refcount(), 1);
        drop(b);
        drop(c);
        assert_eq!(pool.counts(), (2, 2));
        assert_eq!(pool.stats().exhausted, 1);
    }

    #[test]
    fn test_grow_keeps_chunks() {
        let pool = pool(1, GrowPolicy::Grow, 0);
        let chunks: Vec<_> = (0..5).map(|_| pool.get().unwrap()).collect();
        assert_eq!(pool.counts(), (5, 0));
        drop(chunks);
        assert_eq!(pool.counts(), (5, 5));
        assert_eq!(pool.stats().grown, 4);
    }

    #[test]
    fn test_max_count_caps_growth() {
        let pool = pool(1, GrowPolicy::Grow, 3);
        let _chunks: Vec<_> = (0..3).map(|_| pool.get().unwrap()).collect();
        assert!(matches!(pool.get(), Err(Error::PoolExhausted(_))));
    }

    #[test]
    fn test_low_mem_grow_shrinks_eagerly() {
        let pool = pool(2, GrowPolicy::LowMemGrow, 0);
        let chunks: Vec<_> = (0..4).map(|_| pool.get().unwrap()).collect();
        assert_eq!(pool.counts(), (4, 0));

        let mut chunks = chunks.into_iter();
        drop(chunks.next());
        assert_eq!(pool.counts(), (3, 0));
        drop(chunks.next());
        assert_eq!(pool.counts(), (2, 0));
        drop(chunks.next());
        assert_eq!(pool.counts(), (2, 1));
        drop(chunks.next());
        assert_eq!(pool.counts(), (2, 2));
    }

    #[test]
    fn test_chunk_reuse_keeps_identity() {
        let pool = pool(1, GrowPolicy::NoGrow, 0);
        let first = pool.get().unwrap();
        let ptr = first.as_ptr();
        assert!(first.is_from_pool(&pool));
        drop(first);
        let second = pool.get().unwrap();
        assert_eq!(second.as_ptr(), ptr);
    }

    #[test]
    fn test_chunk_outlives_pool() {
        let pool = pool(2, GrowPolicy::NoGrow, 0);
        let mut chunk = pool.get().unwrap();
        pool.destroy();
        chunk.get_mut().unwrap()[0] = 7;
        assert_eq!(chunk.refcount(), 1);
        drop(chunk);
    }

    struct CountingBacking {
        gets: AtomicUsize,
        puts: AtomicUsize,
        frees: AtomicUsize,
    }

    impl MemoryBacking for CountingBacking {
        fn alloc(&self, storage: &mut ChunkStorage) -> Result<()> {
            HeapMemory.alloc(storage)
        }

        fn pool_get(&self, _storage: &ChunkStorage) -> Result<()> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn pool_put(&self, _storage: &ChunkStorage) {
            self.puts.fetch_add(1, Ordering::SeqCst);
        }

        fn free(&self, storage: &mut ChunkStorage) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            HeapMemory.free(storage);
        }
    }

    #[test]
    fn test_backing_hooks_called() {
        let backing = Arc::new(CountingBacking {
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        });
        let pool = MemoryPool::new(
            backing.clone(),
            PoolConfig::new(64, 1).with_policy(GrowPolicy::SmartGrow),
        )
        .unwrap();

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert_eq!(backing.gets.load(Ordering::SeqCst), 2);

        drop(a);
        drop(b);
        assert_eq!(backing.puts.load(Ordering::SeqCst), 2);
        // Second release exceeded the initial count and was freed
        assert_eq!(backing.frees.load(Ordering::SeqCst), 1);

        drop(pool);
        assert_eq!(backing.frees.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pool_concurrent_access() {
        let pool = Arc::new(pool(8, GrowPolicy::SmartGrow, 16));
        let mut handles = vec![];

        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    if let Ok(chunk) = pool.get() {
                        let copy = chunk.clone();
                        assert_eq!(copy.capacity(), 256);
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        let (total, free) = pool.counts();
        assert_eq!(total, free);
        assert!(total <= 8);
    }
}
