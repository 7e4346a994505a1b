//! [`Poller`]: descriptor registry over a readiness backend.

use std::collections::{HashMap, HashSet};
use std::os::fd::{AsFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendKind};
use crate::conn::{PollConn, raw_fd};
use crate::errors::{PollerError, Result};

/// Default upper bound on how long a single wait blocks.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default capacity of the registration map and event buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// Construction parameters for a [`Poller`].
#[derive(Clone, Debug)]
pub struct PollerConfig {
    /// Readiness facility to use.
    pub backend: BackendKind,
    /// Upper bound on how long a single wait blocks.
    pub timeout: Duration,
    /// Initial capacity of the registration map and event buffer.
    pub buffer_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            timeout: DEFAULT_POLL_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Registry of connections waiting for input.
///
/// `add` and `remove` may be called from any thread while another thread
/// is blocked in [`Poller::wait`]; the registration map is only locked
/// around the syscall, never across it.
pub struct Poller<C> {
    conns: RwLock<HashMap<RawFd, Arc<C>>>,
    backend: Backend,
    timeout: Duration,
    closed: AtomicBool,
}

impl<C: PollConn> Poller<C> {
    /// Create a poller with the given configuration.
    pub fn new(config: &PollerConfig) -> Result<Self> {
        let backend = Backend::new(config.backend, config.buffer_size)?;
        debug!(backend = %backend.kind(), timeout_ms = config.timeout.as_millis(), "poller created");
        Ok(Self {
            conns: RwLock::new(HashMap::with_capacity(config.buffer_size)),
            backend,
            timeout: config.timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// The concrete backend in use.
    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.conns.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }

    /// Whether `close` was called or a wait failed fatally.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a connection.
    ///
    /// The descriptor is switched to non-blocking mode first; if that fails
    /// nothing is registered.
    pub fn add(&self, conn: Arc<C>) -> Result<()> {
        if self.is_closed() {
            return Err(PollerError::Closed);
        }
        let fd = raw_fd(&*conn);
        rustix::io::ioctl_fionbio(&*conn, true).map_err(|e| PollerError::NonBlocking {
            fd,
            source: e.into(),
        })?;

        let mut conns = self.conns.write();
        if conns.contains_key(&fd) {
            return Err(PollerError::AlreadyRegistered(fd));
        }
        self.backend.add(conn.as_fd())?;
        let _ = conns.insert(fd, conn);
        Ok(())
    }

    /// Unregister a connection. The connection is left open.
    pub fn remove(&self, conn: &C) -> Result<()> {
        let fd = raw_fd(conn);
        let mut conns = self.conns.write();
        if conns.remove(&fd).is_none() {
            return Err(PollerError::NotRegistered(fd));
        }
        self.backend.remove(conn.as_fd())?;
        Ok(())
    }

    /// Block for up to the configured timeout and return up to
    /// `max_events` connections with pending input.
    ///
    /// Interrupted syscalls are retried. Any other failure is fatal: the
    /// poller marks itself closed and every later call fails.
    pub fn wait(&self, max_events: usize) -> Result<Vec<Arc<C>>> {
        if self.is_closed() {
            return Err(PollerError::Closed);
        }

        let ready = match self.backend.wait(&self.conns, max_events.max(1), self.timeout) {
            Ok(fds) => fds,
            Err(e) => {
                if self.is_closed() {
                    return Err(PollerError::Closed);
                }
                warn!(error = %e, "poller wait failed, poller is no longer usable");
                self.closed.store(true, Ordering::Release);
                return Err(PollerError::Wait(e));
            }
        };

        let conns = self.conns.read();
        let mut seen = HashSet::with_capacity(ready.len());
        Ok(ready
            .into_iter()
            .filter(|fd| seen.insert(*fd))
            .filter_map(|fd| conns.get(&fd).cloned())
            .collect())
    }

    /// Release the backend. With `close_conns`, every connection still
    /// registered is closed as well. Idempotent.
    pub fn close(&self, close_conns: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) && self.is_empty() {
            return Ok(());
        }
        let drained: Vec<Arc<C>> = self.conns.write().drain().map(|(_, conn)| conn).collect();
        self.backend.close();
        debug!(connections = drained.len(), close_conns, "poller closed");

        if close_conns {
            for conn in drained {
                if let Err(e) = conn.close() {
                    debug!(fd = raw_fd(&*conn), error = %e, "closing registered connection");
                }
            }
        }
        Ok(())
    }
}
