//! Diagnostics sink setup
//!
//! Installs a `tracing-subscriber` fmt subscriber writing to stderr, leaving
//! stdout to the report. `RUST_LOG` takes precedence
//! over the configured level so a single run can be turned up without editing
//! the config file.

use crate::config::LoggingConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initializes the global subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    let filter = env_filter(&config.level);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format.as_str() {
        "json" => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        _ => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_err() {
        // A subscriber is already installed, keep it.
        tracing::debug!("Global tracing subscriber already initialized");
    }
}
