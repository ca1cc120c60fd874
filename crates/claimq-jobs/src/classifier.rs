//! Poison-job containment.
//!
//! Every failed attempt increments the key's failure counter. When the
//! counter reaches the threshold the store clears it in the same step and
//! the job is escalated once: a [`PermanentFailure`] goes to the sink. A
//! successful attempt forgets the history. The classifier only touches the
//! `failures` collection.
//!
//! A store error leaves nothing half done: either the attempt was counted
//! (and any escalation decided) or it was not, so callers may retry.

use crate::error::JobResult;
use crate::job::Job;
use crate::metrics::JobMetrics;
use crate::store::JobStore;
use crate::worker::{PermanentFailure, ResultSink, WorkerError};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default number of consecutive failures before escalation.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// What the classifier decided about an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The attempt succeeded; failure history cleared.
    Succeeded,
    /// The attempt failed below the threshold.
    TransientFailure { failures: u32 },
    /// The attempt reached the threshold and the job was escalated.
    /// `delivered` is false when the sink write failed.
    Poisoned { failures: u32, delivered: bool },
}

impl Classification {
    /// Returns true if the job was escalated.
    pub fn is_poisoned(&self) -> bool {
        matches!(self, Classification::Poisoned { .. })
    }
}

/// Failure classifier.
pub struct FailureClassifier {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn ResultSink>,
    threshold: u32,
}

impl FailureClassifier {
    /// Creates a classifier. A threshold of 0 is treated as 1.
    pub fn new(store: Arc<dyn JobStore>, sink: Arc<dyn ResultSink>, threshold: u32) -> Self {
        Self {
            store,
            sink,
            threshold: threshold.max(1),
        }
    }

    /// Escalation threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Records a successful attempt.
    pub async fn record_success(&self, job: &Job) -> JobResult<Classification> {
        self.store.reset_failures(&job.key).await?;
        Ok(Classification::Succeeded)
    }

    /// Records a failed attempt and escalates the job if it reached the
    /// threshold.
    pub async fn record_failure(&self, job: &Job, error: &WorkerError) -> JobResult<Classification> {
        let failures = self.store.count_failure(&job.key, self.threshold).await?;

        if failures < self.threshold {
            info!(
                record_id = %job.key.record_id,
                secondary_id = %job.key.secondary_id,
                failures,
                threshold = self.threshold,
                reason = error.reason(),
                "Job attempt failed"
            );
            return Ok(Classification::TransientFailure { failures });
        }

        warn!(
            record_id = %job.key.record_id,
            secondary_id = %job.key.secondary_id,
            failures,
            "Job reached the failure threshold, escalating as permanent failure"
        );

        let record = PermanentFailure::new(job, error, failures);
        let delivered = match self.sink.write_permanent_failure(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    record_id = %job.key.record_id,
                    secondary_id = %job.key.secondary_id,
                    error = %e,
                    "Failed to deliver permanent failure record"
                );
                JobMetrics::sink_error("permanent_failure");
                false
            }
        };

        JobMetrics::job_poisoned(delivered);

        Ok(Classification::Poisoned {
            failures,
            delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRequest;
    use crate::memory::InMemoryJobStore;
    use crate::worker::{Artifact, SinkError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        failures: Mutex<Vec<PermanentFailure>>,
        unavailable: AtomicBool,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn write_permanent_failure(&self, failure: &PermanentFailure) -> Result<(), SinkError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(SinkError::Unavailable("connection refused".into()));
            }
            self.failures.lock().push(failure.clone());
            Ok(())
        }

        async fn write_artifact(&self, _job: &Job, _artifact: &Artifact) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn setup(threshold: u32) -> (Arc<InMemoryJobStore>, Arc<RecordingSink>, FailureClassifier) {
        let store = Arc::new(InMemoryJobStore::new());
        let sink = Arc::new(RecordingSink::default());
        let classifier = FailureClassifier::new(store.clone(), sink.clone(), threshold);
        (store, sink, classifier)
    }

    fn job() -> Job {
        Job::new(JobRequest::new("100", "ABC")).unwrap()
    }

    fn failed() -> WorkerError {
        WorkerError::Failed("record not found".into())
    }

    #[tokio::test]
    async fn test_below_threshold_is_transient() {
        let (store, sink, classifier) = setup(DEFAULT_FAILURE_THRESHOLD);
        let job = job();

        for expected in 1..=9 {
            let outcome = classifier.record_failure(&job, &failed()).await.unwrap();
            assert_eq!(outcome, Classification::TransientFailure { failures: expected });
        }

        assert_eq!(store.failure_count(&job.key).await.unwrap(), 9);
        assert!(sink.failures.lock().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_escalates_once_and_resets() {
        let (store, sink, classifier) = setup(DEFAULT_FAILURE_THRESHOLD);
        let job = job();

        for _ in 0..9 {
            classifier.record_failure(&job, &failed()).await.unwrap();
        }
        let outcome = classifier.record_failure(&job, &failed()).await.unwrap();

        assert_eq!(
            outcome,
            Classification::Poisoned {
                failures: 10,
                delivered: true
            }
        );
        assert_eq!(store.failure_count(&job.key).await.unwrap(), 0);

        let written = sink.failures.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].key, job.key);
        assert_eq!(written[0].failures, 10);
    }

    #[tokio::test]
    async fn test_escalation_fires_once_per_threshold() {
        let (_store, sink, classifier) = setup(3);
        let job = job();

        for _ in 0..7 {
            classifier.record_failure(&job, &failed()).await.unwrap();
        }

        assert_eq!(sink.failures.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_success_resets_history() {
        let (store, sink, classifier) = setup(DEFAULT_FAILURE_THRESHOLD);
        let job = job();

        for _ in 0..5 {
            classifier.record_failure(&job, &failed()).await.unwrap();
        }
        assert_eq!(
            classifier.record_success(&job).await.unwrap(),
            Classification::Succeeded
        );
        assert_eq!(store.failure_count(&job.key).await.unwrap(), 0);

        for _ in 0..9 {
            classifier.record_failure(&job, &failed()).await.unwrap();
        }
        assert!(sink.failures.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_attempts_count() {
        let (_store, sink, classifier) = setup(2);
        let job = job();
        let cancelled = WorkerError::Cancelled("stop requested".into());

        classifier.record_failure(&job, &cancelled).await.unwrap();
        let outcome = classifier.record_failure(&job, &cancelled).await.unwrap();

        assert!(outcome.is_poisoned());
        assert!(sink.failures.lock()[0].cancelled);
    }

    #[tokio::test]
    async fn test_sink_failure_still_resets_counter() {
        let (store, sink, classifier) = setup(1);
        sink.unavailable.store(true, Ordering::SeqCst);
        let job = job();

        let outcome = classifier.record_failure(&job, &failed()).await.unwrap();

        assert_eq!(
            outcome,
            Classification::Poisoned {
                failures: 1,
                delivered: false
            }
        );
        assert_eq!(store.failure_count(&job.key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_counted_separately() {
        let (store, _sink, classifier) = setup(DEFAULT_FAILURE_THRESHOLD);
        let a = job();
        let b = Job::new(JobRequest::new("100", "XYZ")).unwrap();

        classifier.record_failure(&a, &failed()).await.unwrap();
        classifier.record_failure(&a, &failed()).await.unwrap();
        classifier.record_failure(&b, &failed()).await.unwrap();

        assert_eq!(store.failure_count(&a.key).await.unwrap(), 2);
        assert_eq!(store.failure_count(&b.key).await.unwrap(), 1);
    }
}
