//! Logging setup.
//!
//! Library code emits `tracing` events with structured fields. Binaries call
//! [`init_logging`] once; `RUST_LOG` takes precedence over the configured
//! level. Output goes to stderr so command output on stdout stays clean.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the filter: `RUST_LOG` if set and valid, else the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global fmt subscriber. Returns false if one was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
