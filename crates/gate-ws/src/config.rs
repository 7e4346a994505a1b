//! Runtime configuration derived from [`WebSocketSettings`].

use std::time::Duration;

use gate_netpoll::{BackendKind, PollerConfig};
use gate_settings::{PollerBackend, WebSocketSettings};
use tungstenite::protocol::WebSocketConfig;

/// Longest a synchronous reader holds the socket per read attempt.
/// Writers to the same connection wait behind it.
pub const MAX_SYNC_READ_SLICE: Duration = Duration::from_millis(50);

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Accept upgrades at all.
    pub enabled: bool,
    /// Use the readiness multiplexer instead of one reader per connection.
    pub enable_poller: bool,
    /// Multiplexer construction parameters.
    pub poller: PollerConfig,
    /// Ready connections taken per wait.
    pub max_events_per_wait: usize,
    /// Drains allowed to run at once, and separately executor calls.
    pub max_concurrent_resolvers: usize,
    /// Upgrade plus protocol handshake deadline.
    pub handshake_timeout: Duration,
    /// Read deadline for the synchronous reader.
    pub read_timeout: Duration,
    /// Write deadline for slow clients.
    pub write_timeout: Duration,
    /// Largest accepted client message.
    pub max_message_size: usize,
}

impl GatewayConfig {
    /// Read deadline per synchronous read attempt.
    pub fn sync_read_slice(&self) -> Duration {
        self.read_timeout.min(MAX_SYNC_READ_SLICE)
    }

    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

impl From<&WebSocketSettings> for GatewayConfig {
    fn from(ws: &WebSocketSettings) -> Self {
        let backend = match ws.backend {
            PollerBackend::Auto => BackendKind::Auto,
            PollerBackend::Epoll => BackendKind::Epoll,
            PollerBackend::PollList => BackendKind::PollList,
        };
        Self {
            enabled: ws.enabled,
            enable_poller: ws.enable_poller,
            poller: PollerConfig {
                backend,
                timeout: Duration::from_millis(ws.poll_timeout_ms),
                buffer_size: ws.connection_buffer_size,
            },
            max_events_per_wait: ws.max_events_per_wait,
            max_concurrent_resolvers: ws.max_concurrent_resolvers,
            handshake_timeout: Duration::from_millis(ws.handshake_timeout_ms),
            read_timeout: Duration::from_millis(ws.read_timeout_ms),
            write_timeout: Duration::from_millis(ws.write_timeout_ms),
            max_message_size: ws.max_message_size,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&WebSocketSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let config = GatewayConfig::default();
        assert!(config.enable_poller);
        assert_eq!(config.poller.backend, BackendKind::Auto);
        assert_eq!(config.poller.timeout, Duration::from_secs(1));
        assert_eq!(config.poller.buffer_size, 128);
        assert_eq!(config.max_events_per_wait, 8);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn backend_mapping() {
        let ws = WebSocketSettings {
            backend: PollerBackend::PollList,
            ..WebSocketSettings::default()
        };
        assert_eq!(GatewayConfig::from(&ws).poller.backend, BackendKind::PollList);
    }

    #[test]
    fn sync_read_slice_is_capped() {
        let mut config = GatewayConfig::default();
        assert_eq!(config.sync_read_slice(), MAX_SYNC_READ_SLICE);
        config.read_timeout = Duration::from_millis(10);
        assert_eq!(config.sync_read_slice(), Duration::from_millis(10));
    }

    #[test]
    fn websocket_limits() {
        let config = GatewayConfig {
            max_message_size: 4096,
            ..GatewayConfig::default()
        };
        let ws = config.websocket_config();
        assert_eq!(ws.max_message_size, Some(4096));
    }
}
