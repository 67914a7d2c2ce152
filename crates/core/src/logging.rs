//! Structured logging infrastructure for fedreg.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use fedreg_core::logging;
///
/// logging::init();
/// tracing::info!("Registry started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for production environments.
///
/// # Example
/// ```no_run
/// use fedreg_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "fedreg-node", "Service started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize from the `[logging]` config section. `RUST_LOG` still wins.
pub fn init_with(config: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(filter(&config.level));
    match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
    }
}
