//! Extraction service client.

use super::build_client;
use async_trait::async_trait;
use claimq_config::ExtractorConfig;
use claimq_core::ClaimqResult;
use claimq_jobs::{Artifact, Credentials, Job, Worker, WorkerError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// [`Worker`] calling the extraction service over HTTP.
///
/// One `POST /extract` per attempt. The request is dropped as soon as the
/// cancellation token fires.
pub struct HttpExtractor {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    claim_number: &'a str,
    vin_number: &'a str,
    collect_diagrams: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials: Option<&'a Credentials>,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    success: bool,
    #[serde(default)]
    data: Option<Artifact>,
    #[serde(default)]
    error: Option<String>,
    /// Set when the service aborted the extraction itself.
    #[serde(default)]
    cancelled: bool,
}

impl HttpExtractor {
    /// Creates a new extractor client.
    pub fn new(config: &ExtractorConfig) -> ClaimqResult<Self> {
        Ok(Self {
            client: build_client("extractor", config.request_timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn extract(&self, job: &Job) -> Result<Artifact, WorkerError> {
        let body = ExtractRequest {
            claim_number: &job.key.record_id,
            vin_number: &job.key.secondary_id,
            collect_diagrams: job.payload.collect_diagrams,
            credentials: job.payload.credentials.as_ref(),
        };

        let response = self
            .client
            .post(self.url("/extract"))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkerError::Failed(format!(
                "Extractor returned {}: {}",
                status, text
            )));
        }

        let parsed: ExtractResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::Failed(format!("Invalid extractor response: {}", e)))?;

        if parsed.success {
            return Ok(parsed.data.unwrap_or(Artifact::Null));
        }

        let message = parsed
            .error
            .unwrap_or_else(|| "extractor reported failure".to_string());
        if parsed.cancelled {
            Err(WorkerError::Cancelled(message))
        } else {
            Err(WorkerError::Failed(message))
        }
    }
}

fn request_error(err: reqwest::Error) -> WorkerError {
    if err.is_timeout() {
        WorkerError::Failed(format!("Extractor timed out: {}", err))
    } else {
        WorkerError::Failed(format!("Extractor unreachable: {}", err))
    }
}

#[async_trait]
impl Worker for HttpExtractor {
    async fn process(&self, job: &Job, cancel: CancellationToken) -> Result<Artifact, WorkerError> {
        debug!(key = %job.key, "Calling extractor");

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Err(WorkerError::Cancelled("extraction aborted by stop request".to_string()))
            }
            result = self.extract(job) => result,
        }
    }
}
