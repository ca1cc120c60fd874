//! Common test infrastructure for Redis integration tests.

use claimq_jobs::{create_pool, RedisConfig, RedisJobStore};
use std::sync::Arc;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::{Redis, REDIS_PORT};

/// Test Redis container wrapper.
///
/// Manages a Redis testcontainer lifecycle and provides a job store.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    config: RedisConfig,
}

impl TestRedis {
    /// Starts a fresh Redis container.
    pub async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(REDIS_PORT)
            .await
            .expect("Failed to get Redis port");

        let config = RedisConfig {
            url: format!("redis://127.0.0.1:{}", port),
            pool_size: 4,
            connect_timeout_secs: 5,
            key_prefix: "claimq:test".to_string(),
        };

        Self {
            _container: container,
            config,
        }
    }

    /// Connection settings of the container.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Creates a store, retrying while the server starts accepting
    /// connections.
    pub async fn store(&self) -> Arc<RedisJobStore> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match create_pool(&self.config).await {
                Ok(pool) => return Arc::new(RedisJobStore::new(pool, &self.config)),
                Err(e) => {
                    if attempts >= 30 {
                        panic!("Failed to connect to Redis after {} attempts: {}", attempts, e);
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
