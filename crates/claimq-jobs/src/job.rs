//! Job definitions.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a job: the record id (claim number) and the
/// secondary identifier (VIN).
///
/// Two enqueues with the same pair are the same job for failure counting,
/// even though each enqueue creates its own queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Primary record id (claim number).
    pub record_id: String,

    /// Secondary identifier (VIN).
    pub secondary_id: String,
}

impl JobKey {
    /// Creates a key from its two identifiers.
    pub fn new(record_id: impl Into<String>, secondary_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            secondary_id: secondary_id.into(),
        }
    }

    /// Hash field used by the store maps.
    ///
    /// The Redis dequeue script builds the same string, keep them in sync.
    pub fn field(&self) -> String {
        format!("{}:{}", self.record_id, self.secondary_id)
    }

    /// Returns true if neither identifier carries any information.
    pub fn is_blank(&self) -> bool {
        self.record_id.trim().is_empty() && self.secondary_id.trim().is_empty()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record_id, self.secondary_id)
    }
}

/// Login used by the worker to reach the source system.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Everything the worker needs besides the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Also collect the damage diagrams, not only the record data.
    #[serde(default = "default_collect_diagrams")]
    pub collect_diagrams: bool,

    /// Source-system login, if the worker should not use its default.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

fn default_collect_diagrams() -> bool {
    true
}

impl Default for JobPayload {
    fn default() -> Self {
        Self {
            collect_diagrams: default_collect_diagrams(),
            credentials: None,
        }
    }
}

/// A producer's request to enqueue a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub key: JobKey,
    #[serde(default)]
    pub payload: JobPayload,
}

impl JobRequest {
    /// Creates a request with the default payload.
    pub fn new(record_id: impl Into<String>, secondary_id: impl Into<String>) -> Self {
        Self {
            key: JobKey::new(record_id, secondary_id),
            payload: JobPayload::default(),
        }
    }

    /// Sets the diagram collection flag.
    pub fn collect_diagrams(mut self, collect: bool) -> Self {
        self.payload.collect_diagrams = collect;
        self
    }

    /// Sets the worker credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.payload.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the pending queue.
    #[default]
    Pending,
    /// Handed to the worker.
    Processing,
    /// Worker finished successfully.
    Completed,
    /// Worker failed, was cancelled or crashed.
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A queued unit of work.
///
/// Only the processor (and recovery) change status and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when crash recovery put the job back on the queue.
    #[serde(default)]
    pub restored_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success: Option<bool>,
}

impl Job {
    /// Builds a pending job from a request.
    pub fn new(request: JobRequest) -> JobResult<Self> {
        Self::new_at(request, Utc::now())
    }

    /// Builds a pending job with an explicit enqueue time.
    pub fn new_at(request: JobRequest, now: DateTime<Utc>) -> JobResult<Self> {
        if request.key.is_blank() {
            return Err(JobError::InvalidJob(
                "either a record id or a secondary id is required".to_string(),
            ));
        }

        Ok(Self {
            key: request.key,
            payload: request.payload,
            status: JobStatus::Pending,
            added_at: now,
            started_at: None,
            completed_at: None,
            restored_at: None,
            success: None,
        })
    }

    /// Pending -> Processing.
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
    }

    /// Processing -> Completed / Failed.
    pub fn mark_finished(&mut self, success: bool, now: DateTime<Utc>) {
        self.status = if success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.completed_at = Some(now);
        self.success = Some(success);
    }

    /// Back to Pending after an interrupted attempt.
    pub fn mark_restored(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.restored_at = Some(now);
    }

    /// Back to Pending for another attempt after a failure.
    pub fn mark_requeued(&mut self) {
        self.status = JobStatus::Pending;
        self.completed_at = None;
        self.success = None;
    }

    /// Time spent waiting in the queue before the last start.
    pub fn wait_time(&self) -> Option<std::time::Duration> {
        let started = self.started_at?;
        (started - self.added_at).to_std().ok()
    }

    /// Copy safe to hand out through the admin surface.
    pub fn redacted(&self) -> Self {
        let mut job = self.clone();
        if let Some(credentials) = job.payload.credentials.as_mut() {
            credentials.password = "***".to_string();
        }
        job
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
