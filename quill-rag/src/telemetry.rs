//! Logging setup for binaries and tests embedding the serving core.
//!
//! The library itself only emits `tracing` events and spans (`rag.handle`,
//! cache hits and misses, rate-limit waits); installing a subscriber is left
//! to the host process. This helper is the stock way to do so.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"quill_rag=info"`) when it is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
