//! Tracing subscriber setup for binaries embedding the cache.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Install a global subscriber writing to stderr. `RUST_LOG` wins over `level`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing_with_level(level: &str) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn init_from_config(logging: &LoggingConfig) {
    init_tracing_with_level(&logging.level);
}

