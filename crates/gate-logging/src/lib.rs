//! # gate-logging
//!
//! Structured logging with `tracing`.
//!
//! Every gateway crate logs through `tracing` macros with structured fields
//! (`connection_id`, `fd`, `subscription_id`, `protocol`). The library
//! crates never install a subscriber themselves: [`init_subscriber`] and
//! [`init_json_subscriber`] are for the host binary that embeds the gateway,
//! called once at startup before the gateway is built. Tests use
//! [`capture_logs`] to assert on emitted events.
//!
//! ```no_run
//! gate_logging::init_subscriber("info");
//! tracing::info!("router starting");
//! ```

#![deny(unsafe_code)]

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with compact stderr output.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with one JSON object per line
/// on stderr, for log shippers.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(true);

    let _ = subscriber.try_init();
}
