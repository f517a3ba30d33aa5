//! Structured logging setup
//!
//! Installs a global `tracing` subscriber from a [`LoggingConfig`]. Library
//! code only emits events; binaries and tests decide whether to call
//! [`init_logging`].

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`.
///
/// With `env_filter` enabled a non-empty `RUST_LOG` takes precedence over
/// `log_level`.
///
/// # Errors
/// Returns `ConfigError` if a global subscriber is already installed or the
/// filter directive does not parse.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if config.env_filter {
        if let Ok(directive) = std::env::var(EnvFilter::DEFAULT_ENV) {
            if !directive.trim().is_empty() {
                return EnvFilter::try_new(&directive).map_err(|e| {
                    ProtocolError::ConfigError(format!("Invalid RUST_LOG directive: {e}"))
                });
            }
        }
    }

    EnvFilter::try_new(config.log_level.as_str().to_ascii_lowercase())
        .map_err(|e| ProtocolError::ConfigError(format!("Invalid log level: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_filter_from_level() {
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            env_filter: false,
            ..LoggingConfig::default()
        };
        let filter = build_filter(&config).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }
}
