//! Logging initialization.

use crate::{ClaimqError, ClaimqResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info,claimq=debug,tower_http=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the effective filter. `RUST_LOG` wins over the configured one.
    pub fn env_filter(&self) -> ClaimqResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter).map_err(|e| {
                ClaimqError::Configuration(format!("Invalid log filter '{}': {}", self.filter, e))
            }),
        }
    }
}

/// Installs the global tracing subscriber.
pub fn init_logging(config: &LoggingConfig) -> ClaimqResult<()> {
    let filter = config.env_filter()?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| ClaimqError::Internal(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert!(!config.json);
        assert!(config.filter.contains("claimq=debug"));
    }

    #[test]
    fn test_invalid_filter_is_configuration_error() {
        let config = LoggingConfig {
            filter: "claimq=notalevel".to_string(),
            json: false,
        };
        if std::env::var("RUST_LOG").is_err() {
            let err = config.env_filter().unwrap_err();
            assert!(matches!(err, ClaimqError::Configuration(_)));
        }
    }
}
