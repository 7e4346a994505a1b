//! Gateway and executor error types.

use std::io;

use gate_netpoll::PollerError;
use gate_wsproto::ProtoError;
use thiserror::Error;

use crate::executor::SubscriptionId;

/// Errors returned by an [`Executor`](crate::Executor).
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The operation was refused (invalid document, unauthorized, ...).
    #[error("operation rejected: {0}")]
    Rejected(String),
    /// No such subscription is running.
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
    /// The engine cannot take work right now.
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// `WebSocket` subscriptions are turned off in settings.
    #[error("websocket subscriptions are disabled")]
    Disabled,
    /// Readiness multiplexer failure.
    #[error(transparent)]
    Poller(#[from] PollerError),
    /// Wire protocol or transport failure.
    #[error(transparent)]
    Protocol(#[from] ProtoError),
    /// Execution engine failure.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    /// The HTTP upgrade was refused or malformed.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(Box<tungstenite::Error>),
    /// The upgrade did not complete within the handshake timeout.
    #[error("websocket upgrade timed out")]
    HandshakeTimeout,
    /// The client asked to end the connection.
    #[error("client terminated the connection")]
    ClientTerminated,
    /// A subscribe message without an operation id.
    #[error("missing id in subscribe")]
    MissingId,
    /// A subscribe reused an id that is still running.
    #[error("subscription with id {0:?} already exists")]
    DuplicateSubscription(String),
    /// A complete named an id that is not running.
    #[error("no subscription was registered for ID {0:?}")]
    UnknownSubscription(String),
    /// Results arrived for a connection that is already torn down.
    #[error("connection {0} is closed")]
    ConnectionGone(u64),
    /// Socket setup failure.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A blocking task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<tungstenite::Error> for GatewayError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Upgrade(Box::new(err))
    }
}

impl GatewayError {
    /// The client went away or asked to leave; not worth more than a debug line.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ClientTerminated | Self::ConnectionGone(_) => true,
            Self::Protocol(e) => e.is_closed(),
            _ => false,
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
