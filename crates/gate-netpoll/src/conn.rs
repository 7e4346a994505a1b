//! Connections that can be registered with a poller.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// A connection that exposes its descriptor and can be closed through a
/// shared reference.
///
/// The poller only calls [`PollConn::close`] from
/// [`Poller::close`](crate::Poller::close) with `close_conns = true`.
pub trait PollConn: AsFd + Send + Sync {
    /// Shut the underlying transport down.
    fn close(&self) -> io::Result<()>;
}

impl PollConn for TcpStream {
    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl PollConn for UnixStream {
    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// The numeric descriptor of a connection.
pub fn raw_fd<C: AsFd + ?Sized>(conn: &C) -> RawFd {
    conn.as_fd().as_raw_fd()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn raw_fd_matches_stream() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert_eq!(raw_fd(&a), a.as_raw_fd());
    }

    #[test]
    fn close_unix_stream_signals_eof_to_peer() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.close().unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }
}
