//! HTTP adapters for the services around the queue.

mod extractor;
mod sink;

pub use extractor::HttpExtractor;
pub use sink::HttpResultSink;

use claimq_core::{ClaimqError, ClaimqResult};
use reqwest::Client;
use std::time::Duration;

fn build_client(service: &str, timeout: Duration) -> ClaimqResult<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| ClaimqError::Configuration(format!("Failed to create {} HTTP client: {}", service, e)))
}
