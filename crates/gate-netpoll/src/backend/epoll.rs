//! Native `epoll` backend.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use parking_lot::RwLock;
use rustix::buffer::spare_capacity;
use rustix::event::epoll;
use rustix::io::Errno;
use tracing::trace;

use super::timespec;

/// Hang-ups are reported with `IN` so the reader sees the end-of-stream.
const INTEREST: epoll::EventFlags = epoll::EventFlags::IN.union(epoll::EventFlags::RDHUP);

pub(crate) struct EpollBackend {
    /// `None` once closed. Read-locked for the duration of a wait, so
    /// `close` returns at most one poll interval after it is called.
    epoll: RwLock<Option<OwnedFd>>,
    buffer_size: usize,
}

impl EpollBackend {
    pub(crate) fn new(buffer_size: usize) -> io::Result<Self> {
        let fd = epoll::create(epoll::CreateFlags::CLOEXEC)?;
        trace!(epoll_fd = fd.as_raw_fd(), "epoll instance created");
        Ok(Self {
            epoll: RwLock::new(Some(fd)),
            buffer_size: buffer_size.max(1),
        })
    }

    pub(crate) fn add(&self, fd: BorrowedFd<'_>) -> io::Result<()> {
        let guard = self.epoll.read();
        let epoll_fd = guard.as_ref().ok_or_else(closed)?;
        let data = epoll::EventData::new_u64(token(fd.as_raw_fd())?);
        epoll::add(epoll_fd, fd, data, INTEREST)?;
        Ok(())
    }

    pub(crate) fn remove(&self, fd: BorrowedFd<'_>) -> io::Result<()> {
        let guard = self.epoll.read();
        let epoll_fd = guard.as_ref().ok_or_else(closed)?;
        epoll::delete(epoll_fd, fd)?;
        Ok(())
    }

    pub(crate) fn wait(&self, max_events: usize, timeout: Duration) -> io::Result<Vec<RawFd>> {
        let guard = self.epoll.read();
        let epoll_fd = guard.as_ref().ok_or_else(closed)?;
        let mut events = Vec::with_capacity(max_events.min(self.buffer_size).max(1));
        let ts = timespec(timeout);

        loop {
            match epoll::wait(epoll_fd, spare_capacity(&mut events), Some(&ts)) {
                Ok(_) => break,
                Err(Errno::INTR) => {
                    events.clear();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(events
            .iter()
            .filter_map(|event| RawFd::try_from(event.data.u64()).ok())
            .collect())
    }

    pub(crate) fn close(&self) {
        // Dropping the owned descriptor closes the epoll instance.
        let _ = self.epoll.write().take();
    }
}

fn token(fd: RawFd) -> io::Result<u64> {
    u64::try_from(fd).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "negative descriptor"))
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "epoll instance closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readable_descriptor() {
        let backend = EpollBackend::new(8).unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        backend.add(a.as_fd()).unwrap();
        b.write_all(b"x").unwrap();

        let ready = backend.wait(8, Duration::from_secs(1)).unwrap();
        assert_eq!(ready, vec![a.as_raw_fd()]);
    }

    #[test]
    fn idle_descriptor_times_out_empty() {
        let backend = EpollBackend::new(8).unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        backend.add(a.as_fd()).unwrap();

        let ready = backend.wait(8, Duration::from_millis(20)).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn removed_descriptor_is_not_reported() {
        let backend = EpollBackend::new(8).unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        backend.add(a.as_fd()).unwrap();
        backend.remove(a.as_fd()).unwrap();
        b.write_all(b"x").unwrap();

        let ready = backend.wait(8, Duration::from_millis(20)).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn peer_hangup_is_reported() {
        let backend = EpollBackend::new(8).unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        backend.add(a.as_fd()).unwrap();
        drop(b);

        let ready = backend.wait(8, Duration::from_secs(1)).unwrap();
        assert_eq!(ready, vec![a.as_raw_fd()]);
    }

    #[test]
    fn operations_fail_after_close() {
        let backend = EpollBackend::new(8).unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        backend.close();
        assert!(backend.add(a.as_fd()).is_err());
        assert!(backend.wait(8, Duration::from_millis(1)).is_err());
    }
}
