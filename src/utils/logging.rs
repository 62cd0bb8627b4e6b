//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber from [`LoggingConfig`]. `RUST_LOG`, when set,
//! replaces the configured level and directives.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{RelayError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = config
        .directives
        .iter()
        .map(|d| {
            d.parse::<Directive>()
                .map_err(|e| RelayError::ConfigError(format!("Invalid log directive '{d}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(directives.into_iter().fold(
        EnvFilter::new(config.level.as_str().to_ascii_lowercase()),
        EnvFilter::add_directive,
    ))
}

/// Install the global subscriber described by `config`.
///
/// # Errors
/// Returns `RelayError::ConfigError` if a directive does not parse, the log file cannot be
/// opened, or a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config)?)
        .with_target(true);

    let json = config.format == LogFormat::Json;
    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| RelayError::ConfigError(format!("Failed to open log file: {e}")))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
    };

    installed.map_err(|e| RelayError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    tracing::info!(service = %config.service_name, "Logging initialised");
    Ok(())
}
