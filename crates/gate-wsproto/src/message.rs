//! Protocol-independent messages handed to the execution side.

use serde_json::value::RawValue;

/// What a decoded client message asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Keepalive that expects a [`pong`](crate::Protocol::pong).
    Ping,
    /// Keepalive answer, possibly unsolicited.
    Pong,
    /// Start an operation.
    Subscribe,
    /// Stop an operation.
    Complete,
    /// Client is leaving; tear the connection down.
    Terminate,
}

/// A decoded client message.
#[derive(Clone, Debug)]
pub struct Message {
    /// Operation id. Empty for connection-level messages. For absinthe
    /// this is the derived subscription id, never the client's raw ref.
    pub id: String,
    /// Message kind.
    pub kind: MessageType,
    /// Raw JSON payload as sent by the client.
    pub payload: Option<Box<RawValue>>,
}

impl Message {
    /// The payload as raw bytes, empty if the client sent none.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_ref().map_or(&[], |p| p.get().as_bytes())
    }
}
