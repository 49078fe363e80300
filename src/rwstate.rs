//! Non-blocking single-word reader/writer lock.
//!
//! [`RwState`] guards every payload pointer a frame hands out. The whole lock
//! is one atomic integer:
//!
//! ```text
//!   -1        0          N > 0
//! WRITE  <-  FREE  ->  N readers
//! ```
//!
//! No call ever parks the thread. A conflicting request returns
//! [`Error::Busy`] immediately, and pipeline stages treat that as
//! backpressure. Use it where a stage must never stall; a blocking
//! `std::sync::RwLock` is the wrong tool there.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediabuf::rwstate::RwState;
//!
//! let state = RwState::new();
//! state.rdlock()?;
//! assert!(state.wrlock().is_err()); // Busy while a reader holds it
//! state.rdunlock()?;
//! state.wrlock()?;
//! state.wrunlock()?;
//! ```

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// State value when nobody holds the lock.
const FREE: i32 = 0;

/// State value while the single writer holds the lock.
const WRITE: i32 = -1;

/// Single-word non-blocking reader/writer lock.
pub struct RwState {
    state: AtomicI32,
}

impl RwState {
    /// Create a free lock.
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(FREE),
        }
    }

    /// Take the write lock.
    ///
    /// Fails with [`Error::Busy`] if any reader or another writer holds it.
    pub fn wrlock(&self) -> Result<()> {
        self.state
            .compare_exchange(FREE, WRITE, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| Error::Busy)
    }

    /// Release the write lock.
    ///
    /// Fails with [`Error::AlreadyUnlocked`] if the lock is free, and with
    /// [`Error::Busy`] if it is held by readers.
    pub fn wrunlock(&self) -> Result<()> {
        match self
            .state
            .compare_exchange(WRITE, FREE, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(FREE) => Err(Error::AlreadyUnlocked),
            Err(_) => Err(Error::Busy),
        }
    }

    /// Take a read lock. Any number of readers may hold it at once.
    pub fn rdlock(&self) -> Result<()> {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current == WRITE {
                return Err(Error::Busy);
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Release one read lock.
    pub fn rdunlock(&self) -> Result<()> {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            if current <= FREE {
                return Err(Error::AlreadyUnlocked);
            }
            match self.state.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether nobody holds the lock.
    ///
    /// Snapshot only; may change immediately after returning.
    pub fn is_free(&self) -> bool {
        self.value() == FREE
    }

    /// Whether the writer holds the lock.
    pub fn is_write_locked(&self) -> bool {
        self.value() == WRITE
    }

    /// Number of readers currently holding the lock.
    pub fn readers(&self) -> usize {
        usize::try_from(self.value()).unwrap_or(0)
    }

    /// Raw state word: -1 for a writer, otherwise the reader count.
    pub fn value(&self) -> i32 {
        self.state.load(Ordering::Acquire)
    }
}

impl Default for RwState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RwState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            WRITE => f.write_str("RwState(write)"),
            FREE => f.write_str("RwState(free)"),
            n => write!(f, "RwState({n} readers)"),
        }
    }
}
