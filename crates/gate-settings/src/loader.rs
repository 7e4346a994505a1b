//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `GATE_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{GatewaySettings, PollerBackend};

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "GATE_SETTINGS";

/// Resolve the settings file: `$GATE_SETTINGS`, else `~/.gate/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gate").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`GatewaySettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    let ws = &mut settings.websocket;
    if let Some(v) = read_env_bool("GATE_WS_ENABLED") {
        ws.enabled = v;
    }
    if let Some(v) = read_env_bool("GATE_WS_POLLER") {
        ws.enable_poller = v;
    }
    if let Some(v) = read_env_string("GATE_WS_BACKEND") {
        match parse_backend(&v) {
            Some(backend) => ws.backend = backend,
            None => tracing::warn!(key = "GATE_WS_BACKEND", value = %v, "invalid backend env var, ignoring"),
        }
    }
    if let Some(v) = read_env_u64("GATE_WS_POLL_TIMEOUT_MS", 1, 60_000) {
        ws.poll_timeout_ms = v;
    }
    if let Some(v) = read_env_usize("GATE_WS_CONNECTION_BUFFER_SIZE", 1, 1_000_000) {
        ws.connection_buffer_size = v;
    }
    if let Some(v) = read_env_usize("GATE_WS_MAX_EVENTS_PER_WAIT", 1, 65_536) {
        ws.max_events_per_wait = v;
    }
    if let Some(v) = read_env_usize("GATE_WS_MAX_CONCURRENT_RESOLVERS", 1, 65_536) {
        ws.max_concurrent_resolvers = v;
    }
    if let Some(v) = read_env_u64("GATE_WS_HANDSHAKE_TIMEOUT_MS", 1, 600_000) {
        ws.handshake_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("GATE_WS_READ_TIMEOUT_MS", 1, 600_000) {
        ws.read_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("GATE_WS_WRITE_TIMEOUT_MS", 1, 600_000) {
        ws.write_timeout_ms = v;
    }
    if let Some(v) = read_env_usize("GATE_WS_MAX_MESSAGE_SIZE", 1, 1 << 30) {
        ws.max_message_size = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a backend name: `auto`, `epoll`, `pollList` (or `poll-list`).
pub fn parse_backend(val: &str) -> Option<PollerBackend> {
    match val.to_lowercase().as_str() {
        "auto" => Some(PollerBackend::Auto),
        "epoll" => Some(PollerBackend::Epoll),
        "polllist" | "poll-list" | "poll" => Some(PollerBackend::PollList),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
