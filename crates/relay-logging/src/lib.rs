//! # relay-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the global stderr subscriber in pretty or
//!   JSON form, honouring `RUST_LOG` over the configured level.
//! - [`capture_logs`] installs a thread-local subscriber that records events
//!   in memory so tests can assert on what was logged.

#![deny(unsafe_code)]

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

use relay_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at startup. Subsequent calls are no-ops.
pub fn init_subscriber(settings: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global default is already set
    let _ = match settings.format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.compact().try_init(),
    };
}
