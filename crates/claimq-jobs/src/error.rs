//! Job queue error types.

use thiserror::Error;

/// Result type for job queue operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job queue errors.
///
/// Business failures of the extraction worker are not represented here;
/// they are [`WorkerError`](crate::worker::WorkerError)s and become state
/// transitions inside the processor.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job request cannot form a job key.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Job not found in the expected collection.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The processor is already running.
    #[error("Processor is already running")]
    AlreadyRunning,

    /// The processor did not stop within the allotted time.
    #[error("Processor did not stop within {0} seconds")]
    StopTimeout(u64),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if the error comes from the backing store rather than
    /// from the caller. Such operations should be retried as-is.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, JobError::Redis(_) | JobError::Pool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_job_is_not_infrastructure() {
        let err = JobError::InvalidJob("empty key".into());
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_redis_error_is_infrastructure() {
        let err = JobError::from(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )));
        assert!(err.is_infrastructure());
    }

    #[test]
    fn test_already_running_display() {
        assert_eq!(
            JobError::AlreadyRunning.to_string(),
            "Processor is already running"
        );
    }

    #[test]
    fn test_stop_timeout_display() {
        let err = JobError::StopTimeout(30);
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<u32>("{").unwrap_err();
        let err = JobError::from(json_err);
        assert!(matches!(err, JobError::Serialization(_)));
        assert!(!err.is_infrastructure());
    }
}
