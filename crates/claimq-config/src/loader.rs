//! Configuration loader with layered sources.

use crate::AppConfig;
use claimq_core::ClaimqError;
use claimq_jobs::{StoreBackend, WorkingHours};
use config::{Config, ConfigError, Environment, File};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Environment variable selecting the environment-specific config file.
pub const ENVIRONMENT_VAR: &str = "CLAIMQ_ENVIRONMENT";

/// Prefix of environment variable overrides (`CLAIMQ__SERVER__PORT=9000`).
pub const ENV_PREFIX: &str = "CLAIMQ";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `CLAIMQ__` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, ClaimqError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ClaimqError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), ClaimqError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, ClaimqError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_claimq_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_claimq_error)?;

        validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

/// Validates the configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), ClaimqError> {
    if config.jobs.processor.failure_threshold == 0 {
        return Err(ClaimqError::Configuration(
            "jobs.processor.failure_threshold must be at least 1".to_string(),
        ));
    }

    match config.jobs.backend {
        StoreBackend::Redis => {
            if config.jobs.redis.url.trim().is_empty() {
                return Err(ClaimqError::Configuration(
                    "jobs.redis.url is required for the redis backend".to_string(),
                ));
            }
        }
        StoreBackend::Memory => {
            if config.app.is_production() {
                warn!("Using the in-memory job store in production, the queue is lost on restart");
            }
        }
    }

    WorkingHours::from_config(&config.jobs.schedule)
        .map_err(|e| ClaimqError::Configuration(format!("jobs.schedule: {}", e)))?;

    validate_service_url("extractor.base_url", &config.extractor.base_url)?;
    validate_service_url("sink.base_url", &config.sink.base_url)?;

    Ok(())
}

fn validate_service_url(field: &str, value: &str) -> Result<(), ClaimqError> {
    if value.trim().is_empty() {
        return Err(ClaimqError::Configuration(format!("{} is required", field)));
    }

    let url = Url::parse(value)
        .map_err(|e| ClaimqError::Configuration(format!("{} is not a valid URL: {}", field, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ClaimqError::Configuration(format!(
            "{} must use http or https, got {}",
            field, other
        ))),
    }
}

fn config_error_to_claimq_error(err: ConfigError) -> ClaimqError {
    ClaimqError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimq_jobs::RetryMode;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_layered_files() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "default.toml",
            &toml::to_string(&AppConfig::default()).unwrap(),
        );
        write(
            &dir,
            "local.toml",
            r#"
            [jobs]
            backend = "memory"

            [jobs.processor]
            failure_threshold = 3
            retry_mode = "requeue_until_poisoned"
            "#,
        );

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        let config = loader.get().await;

        assert_eq!(config.jobs.backend, StoreBackend::Memory);
        assert_eq!(config.jobs.processor.failure_threshold, 3);
        assert_eq!(config.jobs.processor.retry_mode, RetryMode::RequeueUntilPoisoned);
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            loader.get_value::<u32>("jobs.processor.failure_threshold").await,
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "[server]\nport = 8081\n");

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        assert_eq!(loader.get().await.server.port, 8081);

        write(&dir, "default.toml", "[server]\nport = 8082\n");
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.server.port, 8082);
    }

    #[test]
    fn test_default_config_is_valid() {
        validate_config(&AppConfig::default()).unwrap();
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let mut config = AppConfig::default();
        config.jobs.processor.failure_threshold = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ClaimqError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_redis_url_only_matters_for_redis_backend() {
        let mut config = AppConfig::default();
        config.jobs.redis.url = String::new();
        assert!(validate_config(&config).is_err());

        config.jobs.backend = StoreBackend::Memory;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_schedule_is_rejected() {
        let mut config = AppConfig::default();
        config.jobs.schedule.enabled = true;
        config.jobs.schedule.start = "8 o'clock".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("jobs.schedule"));
    }

    #[test]
    fn test_service_urls_are_checked() {
        let mut config = AppConfig::default();
        config.extractor.base_url = String::new();
        assert!(validate_config(&config)
            .unwrap_err()
            .to_string()
            .contains("extractor.base_url"));

        let mut config = AppConfig::default();
        config.sink.base_url = "ftp://archive".to_string();
        assert!(validate_config(&config)
            .unwrap_err()
            .to_string()
            .contains("http or https"));
    }
}
