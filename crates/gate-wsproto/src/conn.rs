//! The transport seam under every protocol.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::Result;

/// A duplex channel of text messages.
///
/// Implementations are shared between the connection's reader and every
/// task streaming results into it, so `write_text` must serialize
/// concurrent writers. Errors are returned as-is to the protocol's caller.
pub trait JsonConn: Send + Sync {
    /// Read the next complete text message.
    fn read_text(&self) -> Result<String>;

    /// Write one text message.
    fn write_text(&self, text: &str) -> Result<()>;

    /// Close the transport with a status code and reason, where the
    /// transport supports them.
    fn close(&self, code: u16, reason: &str) -> Result<()>;
}

impl<T: JsonConn + ?Sized> JsonConn for Arc<T> {
    fn read_text(&self) -> Result<String> {
        (**self).read_text()
    }

    fn write_text(&self, text: &str) -> Result<()> {
        (**self).write_text(text)
    }

    fn close(&self, code: u16, reason: &str) -> Result<()> {
        (**self).close(code, reason)
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(conn: &impl JsonConn) -> Result<T> {
    let text = conn.read_text()?;
    Ok(serde_json::from_str(&text)?)
}

pub(crate) fn write_json<T: Serialize>(conn: &impl JsonConn, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    conn.write_text(&text)
}
