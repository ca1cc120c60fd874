//! Seams to the outside world: the extraction worker and the downstream
//! result sink.

use crate::job::{Job, JobKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Extraction result handed to the sink. Opaque to the queue.
pub type Artifact = serde_json::Value;

/// Outcome of a failed worker invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker reported that it could not extract the record.
    #[error("Worker failed: {0}")]
    Failed(String),

    /// The attempt was aborted through the cancellation token.
    #[error("Worker cancelled: {0}")]
    Cancelled(String),

    /// The worker task panicked or was torn down.
    #[error("Worker crashed: {0}")]
    Crashed(String),
}

impl WorkerError {
    /// Short label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            WorkerError::Failed(_) => "failed",
            WorkerError::Cancelled(_) => "cancelled",
            WorkerError::Crashed(_) => "crashed",
        }
    }

    /// Returns true for an aborted attempt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled(_))
    }
}

/// Extraction worker.
///
/// Implementations should return [`WorkerError::Cancelled`] promptly once
/// `cancel` fires; the processor waits for the call to return either way.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Extract the record identified by the job.
    async fn process(&self, job: &Job, cancel: CancellationToken) -> Result<Artifact, WorkerError>;
}

/// Errors returned by a [`ResultSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be reached.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The sink refused the record.
    #[error("Sink rejected the record: {0}")]
    Rejected(String),
}

/// Record written downstream when a job is escalated as a poison job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermanentFailure {
    pub key: JobKey,
    /// Explanation shown to operators.
    pub diagnostic: String,
    /// Failure count at escalation time.
    pub failures: u32,
    /// The last attempt was cancelled rather than failed.
    pub cancelled: bool,
    pub collect_diagrams: bool,
    pub job_added_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

impl PermanentFailure {
    /// Builds the record for a job that failed `failures` times in a row.
    pub fn new(job: &Job, error: &WorkerError, failures: u32) -> Self {
        Self {
            key: job.key.clone(),
            diagnostic: format!(
                "Extraction failed {} consecutive times, giving up on this record. Last error: {}",
                failures, error
            ),
            failures,
            cancelled: error.is_cancelled(),
            collect_diagrams: job.payload.collect_diagrams,
            job_added_at: job.added_at,
            failed_at: Utc::now(),
        }
    }
}

/// Downstream persistence.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist the escalation record of a poison job.
    async fn write_permanent_failure(&self, failure: &PermanentFailure) -> Result<(), SinkError>;

    /// Persist the extraction result of a successful job.
    async fn write_artifact(&self, job: &Job, artifact: &Artifact) -> Result<(), SinkError>;
}
