//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file may name any subset of fields.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// `WebSocket` subscription transport.
    pub websocket: WebSocketSettings,
}

impl GatewaySettings {
    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.websocket.validate()
    }
}

/// Readiness backend preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PollerBackend {
    /// Best available for the platform.
    #[default]
    Auto,
    /// Linux epoll.
    Epoll,
    /// `poll(2)` over an explicit descriptor list.
    PollList,
}

/// `WebSocket` subscription transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Accept `WebSocket` upgrades at all.
    pub enabled: bool,
    /// Use the readiness multiplexer. When off (or unsupported), each
    /// connection gets its own reader task.
    pub enable_poller: bool,
    /// Readiness backend.
    pub backend: PollerBackend,
    /// Upper bound on one multiplexer wait, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Expected number of registered connections; sizes the event buffer.
    pub connection_buffer_size: usize,
    /// Ready connections taken per wait.
    pub max_events_per_wait: usize,
    /// Connections drained concurrently.
    pub max_concurrent_resolvers: usize,
    /// Time allowed for the upgrade plus protocol handshake, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Read deadline for the per-connection reader, in milliseconds.
    pub read_timeout_ms: u64,
    /// Write deadline for frames to a slow client, in milliseconds.
    pub write_timeout_ms: u64,
    /// Largest accepted client message, in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_poller: true,
            backend: PollerBackend::Auto,
            poll_timeout_ms: 1_000,
            connection_buffer_size: 128,
            max_events_per_wait: 8,
            max_concurrent_resolvers: 32,
            handshake_timeout_ms: 10_000,
            read_timeout_ms: 5_000,
            write_timeout_ms: 10_000,
            max_message_size: 1 << 20,
        }
    }
}

impl WebSocketSettings {
    /// Reject zero sizes and timeouts.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("pollTimeoutMs", self.poll_timeout_ms == 0),
            ("connectionBufferSize", self.connection_buffer_size == 0),
            ("maxEventsPerWait", self.max_events_per_wait == 0),
            ("maxConcurrentResolvers", self.max_concurrent_resolvers == 0),
            ("handshakeTimeoutMs", self.handshake_timeout_ms == 0),
            ("readTimeoutMs", self.read_timeout_ms == 0),
            ("writeTimeoutMs", self.write_timeout_ms == 0),
            ("maxMessageSize", self.max_message_size == 0),
        ];
        match nonzero.iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(SettingsError::InvalidValue(format!("websocket.{field} must be > 0"))),
            None => Ok(()),
        }
    }
}
