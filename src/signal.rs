//! Edge-style "data available" indicator for queues.
//!
//! A [`WakeSignal`] is either set or clear. Setting it twice is the same as
//! setting it once: it carries no count, so a woken consumer drains its
//! queue until empty. On Linux the signal is backed by an eventfd that an
//! external reactor (epoll, mio, tokio) can watch for readability.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediabuf::signal::WakeSignal;
//!
//! let signal = WakeSignal::new()?;
//! register_with_reactor(signal.as_raw_fd());
//!
//! signal.signal()?;
//! signal.signal()?; // still just "set"
//! assert!(signal.is_signalled());
//! signal.clear()?;
//! ```

use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "linux")]
use rustix::event::{EventfdFlags, eventfd};
#[cfg(target_os = "linux")]
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};

/// Idempotent wake indicator.
pub struct WakeSignal {
    set: AtomicBool,
    #[cfg(target_os = "linux")]
    fd: OwnedFd,
}

impl WakeSignal {
    /// Create a clear signal.
    #[cfg(target_os = "linux")]
    pub fn new() -> Result<Self> {
        let fd = eventfd(0, EventfdFlags::NONBLOCK | EventfdFlags::CLOEXEC)?;
        Ok(Self {
            set: AtomicBool::new(false),
            fd,
        })
    }

    /// Create a clear signal.
    #[cfg(not(target_os = "linux"))]
    pub fn new() -> Result<Self> {
        Ok(Self {
            set: AtomicBool::new(false),
        })
    }

    /// Set the signal. Does nothing if it is already set.
    ///
    /// If the eventfd write fails the signal stays clear.
    pub fn signal(&self) -> Result<()> {
        if self.set.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.notify().inspect_err(|_| self.set.store(false, Ordering::Release))
    }

    /// Clear the signal.
    pub fn clear(&self) -> Result<()> {
        self.set.store(false, Ordering::Release);
        self.drain()
    }

    /// Check if the signal is set.
    pub fn is_signalled(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    #[cfg(target_os = "linux")]
    fn notify(&self) -> Result<()> {
        rustix::io::write(&self.fd, &1u64.to_ne_bytes())?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn drain(&self) -> Result<()> {
        let mut buf = [0u8; 8];
        match rustix::io::read(&self.fd, &mut buf) {
            Ok(_) | Err(rustix::io::Errno::WOULDBLOCK) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn notify(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn drain(&self) -> Result<()> {
        Ok(())
    }

    /// Raw eventfd, readable while the signal is set.
    #[cfg(target_os = "linux")]
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.fd.as_raw_fd()
    }

    /// Wait until the signal is set.
    ///
    /// Does not clear it; the queue clears the signal when it empties.
    #[cfg(all(feature = "tokio", target_os = "linux"))]
    pub async fn wait_async(&self) -> Result<()> {
        use tokio::io::Interest;
        use tokio::io::unix::AsyncFd;

        let async_fd = AsyncFd::with_interest(self.fd.as_fd(), Interest::READABLE)?;
        loop {
            let mut guard = async_fd.readable().await?;
            if self.is_signalled() {
                return Ok(());
            }
            guard.clear_ready();
        }
    }

    /// Wait until the signal is set.
    #[cfg(all(feature = "tokio", not(target_os = "linux")))]
    pub async fn wait_async(&self) -> Result<()> {
        // Polling fallback without an eventfd
        while !self.is_signalled() {
            tokio::time::sleep(std::time::Duration::from_micros(100)).await;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl AsFd for WakeSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeSignal")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}
