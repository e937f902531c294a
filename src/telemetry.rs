//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global subscriber from the logging config.
///
/// Filter precedence: explicit config filter, then `RUST_LOG`, then `info`.
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    if !config.stdout {
        return;
    }

    let filter = match &config.filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("telemetry already initialised, keeping existing subscriber");
    }
}
