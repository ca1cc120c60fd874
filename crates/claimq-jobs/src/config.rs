//! Job queue configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job queue system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Which store implementation backs the queue.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Processor loop configuration.
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Working-hours window.
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Store implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Durable Redis store.
    #[default]
    Redis,
    /// Process-local store, lost on exit.
    Memory,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all queue keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "claimq:queue".to_string()
}

/// What the processor does with a job whose attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Record the failure in `completed`; the producer decides whether to
    /// enqueue again.
    #[default]
    SingleAttempt,
    /// Put the job back on the tail of the pending queue until it is
    /// escalated as a poison job. Cancelled attempts are never requeued.
    RequeueUntilPoisoned,
}

/// Processor loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Wait between polls of an empty queue, in seconds.
    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,

    /// Wait after a store error before the loop retries, in seconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Consecutive failures after which a job is escalated.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failure handling.
    #[serde(default)]
    pub retry_mode: RetryMode,

    /// Purge every queue collection when the processor is stopped.
    #[serde(default = "default_true")]
    pub purge_on_stop: bool,

    /// How long `stop()` waits for the loop to exit, in seconds.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Start the processor together with the server.
    #[serde(default)]
    pub autostart: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            idle_interval_secs: default_idle_interval(),
            error_backoff_secs: default_error_backoff(),
            failure_threshold: default_failure_threshold(),
            retry_mode: RetryMode::default(),
            purge_on_stop: true,
            stop_timeout_secs: default_stop_timeout(),
            autostart: false,
        }
    }
}

fn default_idle_interval() -> u64 {
    5
}

fn default_error_backoff() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_stop_timeout() -> u64 {
    30
}

/// Working-hours window configuration.
///
/// Times are `HH:MM` in the configured UTC offset. A window whose end is
/// before its start wraps past midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Only process jobs inside the window.
    #[serde(default)]
    pub enabled: bool,

    /// Window start (inclusive).
    #[serde(default = "default_start")]
    pub start: String,

    /// Window end (exclusive).
    #[serde(default = "default_end")]
    pub end: String,

    /// Offset of the window's clock from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Wait between checks while outside the window, in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_start(),
            end: default_end(),
            utc_offset_minutes: 0,
            check_interval_secs: default_check_interval(),
        }
    }
}

fn default_start() -> String {
    "08:00".to_string()
}

fn default_end() -> String {
    "18:00".to_string()
}

fn default_check_interval() -> u64 {
    60
}

impl RedisConfig {
    /// Get connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ProcessorConfig {
    /// Get idle interval as Duration.
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    /// Get error backoff as Duration.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Get stop timeout as Duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl ScheduleConfig {
    /// Get check interval as Duration.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}
