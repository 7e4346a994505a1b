//! Readiness backends.
//!
//! A backend owns whatever registration state the OS facility needs. The
//! descriptor → connection map lives in [`Poller`](crate::Poller); the
//! backend only deals in descriptors.

#[cfg(target_os = "linux")]
mod epoll;
mod list;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::conn::PollConn;
use crate::errors::Result;

/// Which readiness facility a poller uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// `epoll` on Linux, the `poll(2)` list elsewhere.
    #[default]
    Auto,
    /// Native `epoll` queue. Linux only.
    Epoll,
    /// Explicit registration list resubmitted to `poll(2)` on every wait.
    PollList,
}

impl BackendKind {
    /// Resolve [`BackendKind::Auto`] to the concrete backend for this target.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(target_os = "linux") => Self::Epoll,
            Self::Auto => Self::PollList,
            other => other,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Epoll => "epoll",
            Self::PollList => "poll-list",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) enum Backend {
    #[cfg(target_os = "linux")]
    Epoll(epoll::EpollBackend),
    List(list::ListBackend),
}

impl Backend {
    pub(crate) fn new(kind: BackendKind, buffer_size: usize) -> Result<Self> {
        match kind.resolve() {
            #[cfg(target_os = "linux")]
            BackendKind::Epoll => Ok(Self::Epoll(epoll::EpollBackend::new(buffer_size)?)),
            #[cfg(not(target_os = "linux"))]
            BackendKind::Epoll => {
                let _ = buffer_size;
                Err(crate::errors::PollerError::Unsupported("epoll"))
            }
            BackendKind::PollList | BackendKind::Auto => Ok(Self::List(list::ListBackend::default())),
        }
    }

    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(_) => BackendKind::Epoll,
            Self::List(_) => BackendKind::PollList,
        }
    }

    pub(crate) fn add(&self, fd: BorrowedFd<'_>) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(b) => b.add(fd),
            Self::List(_) => Ok(()),
        }
    }

    pub(crate) fn remove(&self, fd: BorrowedFd<'_>) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(b) => b.remove(fd),
            Self::List(_) => Ok(()),
        }
    }

    /// Block for up to `timeout` and return ready descriptors.
    ///
    /// `EINTR` is retried inside each backend.
    pub(crate) fn wait<C: PollConn>(
        &self,
        conns: &RwLock<HashMap<RawFd, Arc<C>>>,
        max_events: usize,
        timeout: Duration,
    ) -> io::Result<Vec<RawFd>> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(b) => b.wait(max_events, timeout),
            Self::List(b) => b.wait(conns, max_events, timeout),
        }
    }

    pub(crate) fn close(&self) {
        match self {
            #[cfg(target_os = "linux")]
            Self::Epoll(b) => b.close(),
            Self::List(_) => {}
        }
    }
}

/// Convert a wait interval to the timespec the syscalls take.
pub(crate) fn timespec(timeout: Duration) -> rustix::event::Timespec {
    rustix::event::Timespec {
        tv_sec: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        tv_nsec: i64::from(timeout.subsec_nanos()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_per_platform() {
        let resolved = BackendKind::Auto.resolve();
        if cfg!(target_os = "linux") {
            assert_eq!(resolved, BackendKind::Epoll);
        } else {
            assert_eq!(resolved, BackendKind::PollList);
        }
    }

    #[test]
    fn explicit_kinds_resolve_to_themselves() {
        assert_eq!(BackendKind::PollList.resolve(), BackendKind::PollList);
        assert_eq!(BackendKind::Epoll.resolve(), BackendKind::Epoll);
    }

    #[test]
    fn display_names() {
        assert_eq!(BackendKind::Epoll.to_string(), "epoll");
        assert_eq!(BackendKind::PollList.to_string(), "poll-list");
        assert_eq!(BackendKind::Auto.to_string(), "auto");
    }

    #[test]
    fn timespec_splits_seconds_and_nanos() {
        let ts = timespec(Duration::from_millis(1_500));
        assert_eq!(ts.tv_sec, 1);
        assert_eq!(ts.tv_nsec, 500_000_000);
    }

    #[test]
    fn list_backend_reports_kind() {
        let backend = Backend::new(BackendKind::PollList, 16).unwrap();
        assert_eq!(backend.kind(), BackendKind::PollList);
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn epoll_unsupported_off_linux() {
        assert!(matches!(
            Backend::new(BackendKind::Epoll, 16),
            Err(crate::errors::PollerError::Unsupported("epoll"))
        ));
    }
}
