//! In-memory [`JsonConn`] for exercising protocols without sockets.

use std::collections::VecDeque;
use std::io;

use parking_lot::Mutex;
use serde_json::Value;

use crate::conn::JsonConn;
use crate::errors::{ProtoError, Result};

/// Scripted transport: reads pop queued client messages, writes are
/// recorded. An empty queue reads as `WouldBlock`, like a drained
/// non-blocking socket.
#[derive(Debug, Default)]
pub struct MockConn {
    inbound: Mutex<VecDeque<String>>,
    outbound: Mutex<Vec<String>>,
    closed: Mutex<Option<(u16, String)>>,
}

impl MockConn {
    /// Empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with queued client messages.
    pub fn with_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let conn = Self::new();
        conn.inbound.lock().extend(messages.into_iter().map(Into::into));
        conn
    }

    /// Queue one more client message.
    pub fn push(&self, text: impl Into<String>) {
        self.inbound.lock().push_back(text.into());
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<String> {
        self.outbound.lock().clone()
    }

    /// Everything written so far, parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if a written message is not JSON.
    pub fn written_json(&self) -> Vec<Value> {
        self.outbound
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap_or_else(|e| panic!("non-JSON frame {text:?}: {e}")))
            .collect()
    }

    /// Drain and return everything written so far.
    pub fn take_written(&self) -> Vec<String> {
        std::mem::take(&mut *self.outbound.lock())
    }

    /// Close code and reason, once closed.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.closed.lock().clone()
    }
}

impl JsonConn for MockConn {
    fn read_text(&self) -> Result<String> {
        if self.closed.lock().is_some() {
            return Err(ProtoError::ConnectionClosed);
        }
        self.inbound
            .lock()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock).into())
    }

    fn write_text(&self, text: &str) -> Result<()> {
        if self.closed.lock().is_some() {
            return Err(ProtoError::ConnectionClosed);
        }
        self.outbound.lock().push(text.to_owned());
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) -> Result<()> {
        *self.closed.lock() = Some((code, reason.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_in_order_then_would_block() {
        let conn = MockConn::with_messages(["a", "b"]);
        assert_eq!(conn.read_text().unwrap(), "a");
        assert_eq!(conn.read_text().unwrap(), "b");
        assert!(conn.read_text().unwrap_err().is_would_block());
    }

    #[test]
    fn close_stops_io() {
        let conn = MockConn::with_messages(["a"]);
        conn.close(1000, "bye").unwrap();
        assert!(conn.read_text().unwrap_err().is_closed());
        assert!(conn.write_text("x").unwrap_err().is_closed());
        assert_eq!(conn.close_frame(), Some((1000, "bye".to_owned())));
    }

    #[test]
    fn take_written_drains() {
        let conn = MockConn::new();
        conn.write_text("1").unwrap();
        assert_eq!(conn.take_written(), vec!["1"]);
        assert!(conn.written().is_empty());
    }
}
