//! Protocol error types.

use std::io;

use thiserror::Error;

/// Errors produced by the subscription protocols.
///
/// Transport failures ([`ProtoError::Io`], [`ProtoError::ConnectionClosed`])
/// are passed through untouched; this layer never retries.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The negotiated subprotocol is not one of the supported ones.
    #[error("unsupported subprotocol {0:?}")]
    UnsupportedSubprotocol(String),
    /// The first message was not the protocol's handshake.
    #[error("expected first message of type {expected:?}, got {got:?}")]
    Handshake {
        /// Handshake type the protocol requires.
        expected: &'static str,
        /// Type the client actually sent.
        got: String,
    },
    /// A message was read before the handshake completed.
    #[error("connection is not initialized")]
    NotInitialized,
    /// The handshake was attempted twice.
    #[error("connection is already initialized")]
    AlreadyInitialized,
    /// The client sent a message type the protocol does not define.
    #[error("unsupported message type {0:?}")]
    UnsupportedMessageType(String),
    /// The message was not valid JSON for the protocol's framing.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A result or completion for an id that is not open.
    #[error("no open operation with id {0:?}")]
    UnknownOperation(String),
    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
    /// Transport I/O failure, including `WouldBlock` on non-blocking sockets.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtoError {
    /// The transport has nothing buffered right now.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }

    /// A read deadline passed without data. Blocking sockets with a read
    /// timeout report `WouldBlock` or `TimedOut` depending on platform.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }

    /// The connection is gone and further reads or writes will fail.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
