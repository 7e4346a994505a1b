//! Poller error types.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Errors returned by [`Poller`](crate::Poller) operations.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The requested backend does not exist on this platform.
    #[error("readiness backend {0} is not supported on this platform")]
    Unsupported(&'static str),
    /// The descriptor could not be switched to non-blocking mode.
    #[error("failed to set descriptor {fd} non-blocking: {source}")]
    NonBlocking {
        /// The descriptor that was being registered.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The descriptor is already registered with this poller.
    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),
    /// The descriptor is not registered with this poller.
    #[error("descriptor {0} is not registered")]
    NotRegistered(RawFd),
    /// The poller was closed, or a previous wait failed fatally.
    #[error("poller is closed")]
    Closed,
    /// A non-retryable wait failure. The poller is unusable afterwards.
    #[error("poller wait failed: {0}")]
    Wait(#[source] io::Error),
    /// Registration syscall failure.
    #[error("poller I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PollerError {
    /// Whether the error leaves the poller unusable.
    ///
    /// Callers holding a fatal poller must rebuild it or shut down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Wait(_) | Self::Closed)
    }
}

/// Result type for poller operations.
pub type Result<T> = std::result::Result<T, PollerError>;
