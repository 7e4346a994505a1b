//! Metric names recorded through the `metrics` facade.
//!
//! No recorder is installed here; the embedding binary picks an exporter.

/// `WebSocket` connections accepted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active `WebSocket` connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Active subscriptions across all connections (gauge).
pub const WS_SUBSCRIPTIONS_ACTIVE: &str = "ws_subscriptions_active";
/// Upgrades or handshakes that failed (counter).
pub const WS_HANDSHAKE_FAILURES_TOTAL: &str = "ws_handshake_failures_total";
/// Multiplexer wait errors (counter).
pub const WS_POLLER_WAIT_ERRORS_TOTAL: &str = "ws_poller_wait_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_SUBSCRIPTIONS_ACTIVE,
            WS_HANDSHAKE_FAILURES_TOTAL,
            WS_POLLER_WAIT_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
            assert!(name.starts_with("ws_"));
        }
    }
}
