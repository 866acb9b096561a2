//! Structured Logging Setup
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` still wins over the
//! configured default level. Logs go to stderr so `check` output stays clean.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the env filter for `level`
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber
///
/// `verbose` forces DEBUG regardless of the configured level.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.tracing_level()?
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr);

    let result = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
