//! # gate-settings
//!
//! Layered configuration for the subscription gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `$GATE_SETTINGS` or `~/.gate/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `GATE_WS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{GatewaySettings, PollerBackend, WebSocketSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<GatewaySettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings with env var overrides. If loading fails,
/// logs the error and returns compiled defaults.
pub fn get_settings() -> &'static GatewaySettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|error| {
            tracing::warn!(%error, "failed to load settings, using defaults");
            GatewaySettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: GatewaySettings) -> std::result::Result<(), GatewaySettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = GatewaySettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_values() {
        let ws = GatewaySettings::default().websocket;
        assert!(ws.enabled);
        assert!(ws.enable_poller);
        assert_eq!(ws.backend, PollerBackend::Auto);
        assert_eq!(ws.poll_timeout_ms, 1_000);
        assert_eq!(ws.connection_buffer_size, 128);
        assert_eq!(ws.max_events_per_wait, 8);
        assert_eq!(ws.read_timeout_ms, 5_000);
    }
}
