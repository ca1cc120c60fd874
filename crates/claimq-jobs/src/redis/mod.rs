//! Redis-backed job store implementation.

mod store;

pub use store::RedisJobStore;

use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool and check that the server answers.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!(url = %redact_url(&config.url), "Creating Redis connection pool for job store...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .wait_timeout(Some(config.connect_timeout()))
        .create_timeout(Some(config.connect_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Strips the password from a Redis URL for logging.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Redis key builder for the job store.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Pending queue (list, RPUSH at the tail, LPOP at the head).
    pub fn pending(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    /// In-flight jobs (hash: key field -> job).
    pub fn inflight(&self) -> String {
        format!("{}:inflight", self.prefix)
    }

    /// Completed jobs (hash: key field -> job).
    pub fn completed(&self) -> String {
        format!("{}:completed", self.prefix)
    }

    /// Failure counters (hash: key field -> count).
    pub fn failures(&self) -> String {
        format!("{}:failures", self.prefix)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("claimq:queue")
    }
}
