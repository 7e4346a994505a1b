//! Portable `poll(2)` backend.
//!
//! There is no kernel-side registration: the full list of registered
//! descriptors is rebuilt from the poller's map and resubmitted on every
//! wait. That is O(n) in the number of connections per wait.
//!
//! When more descriptors are ready than a wait may return, the next wait
//! starts where the previous one stopped so no ready descriptor is starved.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustix::event::{PollFd, PollFlags, poll};
use rustix::io::Errno;

use super::timespec;
use crate::conn::{PollConn, raw_fd};

#[derive(Default)]
pub(crate) struct ListBackend {
    /// Offset into the ready set where the next capped wait starts.
    cursor: AtomicUsize,
}

impl ListBackend {
    pub(crate) fn wait<C: PollConn>(
        &self,
        conns: &RwLock<HashMap<RawFd, Arc<C>>>,
        max_events: usize,
        timeout: Duration,
    ) -> io::Result<Vec<RawFd>> {
        // Snapshot under the read lock, then poll without holding it.
        let snapshot: Vec<Arc<C>> = conns.read().values().cloned().collect();
        let mut fds: Vec<PollFd<'_>> = snapshot
            .iter()
            .map(|conn| PollFd::new(&**conn, PollFlags::IN))
            .collect();
        let ts = timespec(timeout);

        loop {
            match poll(&mut fds, Some(&ts)) {
                Ok(_) => break,
                Err(Errno::INTR) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let ready: Vec<RawFd> = fds
            .iter()
            .zip(snapshot.iter())
            .filter(|(fd, _)| !fd.revents().is_empty())
            .map(|(_, conn)| raw_fd(&**conn))
            .collect();
        if ready.len() <= max_events {
            return Ok(ready);
        }
        let start = self.cursor.fetch_add(max_events, Ordering::Relaxed) % ready.len();
        Ok(ready.iter().cycle().skip(start).take(max_events).copied().collect())
    }
}
