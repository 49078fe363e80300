//! Error types for mediabuf.

use rustix::io::Errno;
use thiserror::Error;

/// Result type alias using mediabuf's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// Callers that only care about the reason class (for example, treating
/// [`ErrorKind::Busy`] as backpressure) match on this instead of the
/// individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-supplied argument was rejected before any mutation.
    InvalidArgument,
    /// A pool or queue is empty, or a pool reached its growth cap.
    Exhausted,
    /// Missing ancillary key or out-of-range index.
    NotFound,
    /// Duplicate ancillary name.
    Conflict,
    /// Disallowed by the current object state, or lock contention.
    Busy,
    /// Release of a lock that is not held.
    AlreadyUnlocked,
    /// Filter rejection, or a packed request on a non-contiguous payload.
    Protocol,
    /// Allocation failure.
    OutOfMemory,
    /// Operating system failure.
    System,
}

/// Main error type for mediabuf operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Memory pool has no free chunk and may not grow.
    #[error("memory pool '{0}' exhausted: no chunks available")]
    PoolExhausted(String),

    /// Queue is empty.
    #[error("queue is empty")]
    QueueEmpty,

    /// Named entry not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Index past the end of a sequence.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of elements.
        len: usize,
    },

    /// An ancillary entry with this name already exists.
    #[error("ancillary data '{0}' already exists")]
    Conflict(String),

    /// Frame is finalized and can no longer be modified.
    #[error("frame is finalized")]
    Finalized,

    /// Frame must be finalized for this operation.
    #[error("frame is not finalized")]
    NotFinalized,

    /// Frame payload is incomplete and cannot be finalized.
    #[error("frame payload incomplete: {0}")]
    Incomplete(&'static str),

    /// Lock is held in a conflicting mode.
    #[error("resource busy")]
    Busy,

    /// Unlock of a lock that was not held.
    #[error("lock already released")]
    AlreadyUnlocked,

    /// Frame rejected by a queue filter.
    #[error("frame rejected by queue filter")]
    Rejected,

    /// Payload segments are not contiguous.
    #[error("payload is not packed (packed length {packed_len})")]
    NotPacked {
        /// Length a packed copy of the payload would need.
        packed_len: usize,
    },

    /// Destination is too small.
    #[error("destination too small: need {required} bytes, have {available}")]
    NoSpace {
        /// Bytes needed.
        required: usize,
        /// Bytes available.
        available: usize,
    },

    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] Errno),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::NoSpace { .. } => ErrorKind::InvalidArgument,
            Self::PoolExhausted(_) | Self::QueueEmpty => ErrorKind::Exhausted,
            Self::NotFound(_) | Self::IndexOutOfRange { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Finalized | Self::NotFinalized | Self::Incomplete(_) | Self::Busy => {
                ErrorKind::Busy
            }
            Self::AlreadyUnlocked => ErrorKind::AlreadyUnlocked,
            Self::Rejected | Self::NotPacked { .. } => ErrorKind::Protocol,
            Self::AllocationFailed(_) => ErrorKind::OutOfMemory,
            Self::Io(_) | Self::System(_) => ErrorKind::System,
        }
    }

    /// The errno value equivalent to this error.
    pub fn errno(&self) -> Errno {
        match self {
            Self::NoSpace { .. } => Errno::NOSPC,
            Self::Io(e) => e
                .raw_os_error()
                .map(Errno::from_raw_os_error)
                .unwrap_or(Errno::IO),
            Self::System(e) => *e,
            other => match other.kind() {
                ErrorKind::InvalidArgument => Errno::INVAL,
                ErrorKind::Exhausted => Errno::AGAIN,
                ErrorKind::NotFound => Errno::NOENT,
                ErrorKind::Conflict => Errno::EXIST,
                ErrorKind::Busy => Errno::BUSY,
                ErrorKind::AlreadyUnlocked => Errno::ALREADY,
                ErrorKind::Protocol => Errno::PROTO,
                ErrorKind::OutOfMemory => Errno::NOMEM,
                ErrorKind::System => Errno::IO,
            },
        }
    }

    /// Negative integer code, for callers bridging to C-style status returns.
    pub fn code(&self) -> i32 {
        -self.errno().raw_os_error()
    }

    /// Packed length reported by a failed packed request, if any.
    pub fn packed_len(&self) -> Option<usize> {
        match self {
            Self::NotPacked { packed_len } => Some(*packed_len),
            _ => None,
        }
    }
}
