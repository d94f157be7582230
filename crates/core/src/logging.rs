//! Structured logging setup.
//!
//! Log level is taken from `RUST_LOG` and defaults to `info`. Logs go to
//! stderr so stdout stays free for reports.

use crate::config::LogFormat;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter() -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

/// Unset, empty or unparsable directives fall back to `info`.
fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialize human-readable logging.
///
/// # Example
/// ```no_run
/// use ledgertrust_core::logging;
///
/// logging::init();
/// tracing::info!("Verifier started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
}

/// Initialize JSON logging for log aggregation.
///
/// # Example
/// ```no_run
/// use ledgertrust_core::logging;
///
/// logging::init_json();
/// tracing::info!(ledger = "!books:example.org", "Replay started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
}

/// Initialize logging in the configured format.
pub fn init_with(format: LogFormat) {
    match format {
        LogFormat::Pretty => init(),
        LogFormat::Json => init_json(),
    }
}
