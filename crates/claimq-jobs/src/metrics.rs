//! Prometheus metrics for queue monitoring.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the binary installs a recorder.

use crate::store::QueueStats;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the queue.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "claimq_jobs_enqueued_total";
    /// Total jobs dequeued for processing.
    pub const JOBS_DEQUEUED_TOTAL: &str = "claimq_jobs_dequeued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "claimq_jobs_completed_total";
    /// Total failed attempts, by reason.
    pub const JOBS_FAILED_TOTAL: &str = "claimq_jobs_failed_total";
    /// Total jobs requeued after a failed attempt.
    pub const JOBS_REQUEUED_TOTAL: &str = "claimq_jobs_requeued_total";
    /// Total jobs escalated as poison jobs.
    pub const JOBS_POISONED_TOTAL: &str = "claimq_jobs_poisoned_total";
    /// Total jobs restored after an interrupted run.
    pub const JOBS_RESTORED_TOTAL: &str = "claimq_jobs_restored_total";
    /// Total store operation errors seen by the processor.
    pub const STORE_ERRORS_TOTAL: &str = "claimq_store_errors_total";
    /// Total sink delivery errors.
    pub const SINK_ERRORS_TOTAL: &str = "claimq_sink_errors_total";

    /// Current pending jobs.
    pub const JOBS_PENDING: &str = "claimq_jobs_pending";
    /// Current in-flight jobs.
    pub const JOBS_INFLIGHT: &str = "claimq_jobs_inflight";
    /// Current completed jobs.
    pub const JOBS_COMPLETED: &str = "claimq_jobs_completed";
    /// Processor running (1) or stopped (0).
    pub const PROCESSOR_RUNNING: &str = "claimq_processor_running";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "claimq_job_duration_seconds";
    /// Job wait time (time in queue) in seconds.
    pub const JOB_WAIT_TIME_SECONDS: &str = "claimq_job_wait_time_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_DEQUEUED_TOTAL,
        "Total number of jobs dequeued for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of failed attempts");
    describe_counter!(
        names::JOBS_REQUEUED_TOTAL,
        "Total number of jobs put back on the queue after a failure"
    );
    describe_counter!(
        names::JOBS_POISONED_TOTAL,
        "Total number of jobs escalated as permanent failures"
    );
    describe_counter!(
        names::JOBS_RESTORED_TOTAL,
        "Total number of interrupted jobs restored at startup"
    );
    describe_counter!(names::STORE_ERRORS_TOTAL, "Total number of store errors");
    describe_counter!(names::SINK_ERRORS_TOTAL, "Total number of sink delivery errors");

    describe_gauge!(names::JOBS_PENDING, "Current number of pending jobs");
    describe_gauge!(names::JOBS_INFLIGHT, "Current number of in-flight jobs");
    describe_gauge!(names::JOBS_COMPLETED, "Current number of completed jobs");
    describe_gauge!(
        names::PROCESSOR_RUNNING,
        "Whether the processor loop is running (1) or not (0)"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );
    describe_histogram!(
        names::JOB_WAIT_TIME_SECONDS,
        "Job wait time (time in queue) in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued() {
        counter!(names::JOBS_ENQUEUED_TOTAL).increment(1);
    }

    /// Record a job dequeued.
    pub fn job_dequeued(wait_time: Option<Duration>) {
        counter!(names::JOBS_DEQUEUED_TOTAL).increment(1);
        if let Some(wait) = wait_time {
            histogram!(names::JOB_WAIT_TIME_SECONDS).record(wait.as_secs_f64());
        }
    }

    /// Record a job completed.
    pub fn job_completed(duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
        histogram!(names::JOB_DURATION_SECONDS, "status" => "completed")
            .record(duration.as_secs_f64());
    }

    /// Record a failed attempt.
    pub fn job_failed(reason: &'static str, duration: Duration) {
        counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
        histogram!(names::JOB_DURATION_SECONDS, "status" => "failed")
            .record(duration.as_secs_f64());
    }

    /// Record a job requeued.
    pub fn job_requeued() {
        counter!(names::JOBS_REQUEUED_TOTAL).increment(1);
    }

    /// Record a poison job escalation.
    pub fn job_poisoned(delivered: bool) {
        counter!(
            names::JOBS_POISONED_TOTAL,
            "delivered" => if delivered { "true" } else { "false" }
        )
        .increment(1);
    }

    /// Record jobs restored by crash recovery.
    pub fn jobs_restored(count: usize) {
        counter!(names::JOBS_RESTORED_TOTAL).increment(count as u64);
    }

    /// Record a store error.
    pub fn store_error(operation: &'static str) {
        counter!(names::STORE_ERRORS_TOTAL, "operation" => operation).increment(1);
    }

    /// Record a sink error.
    pub fn sink_error(kind: &'static str) {
        counter!(names::SINK_ERRORS_TOTAL, "kind" => kind).increment(1);
    }

    /// Update queue size gauges.
    pub fn update_queue_sizes(stats: &QueueStats) {
        gauge!(names::JOBS_PENDING).set(stats.pending as f64);
        gauge!(names::JOBS_INFLIGHT).set(stats.inflight as f64);
        gauge!(names::JOBS_COMPLETED).set(stats.completed as f64);
    }

    /// Update processor running flag.
    pub fn processor_running(running: bool) {
        gauge!(names::PROCESSOR_RUNNING).set(if running { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        register_metrics();
    }

    #[test]
    fn test_job_metrics() {
        JobMetrics::job_enqueued();
        JobMetrics::job_dequeued(Some(Duration::from_secs(2)));
        JobMetrics::job_completed(Duration::from_secs(1));
        JobMetrics::job_failed("cancelled", Duration::from_secs(5));
        JobMetrics::job_poisoned(false);
        JobMetrics::update_queue_sizes(&QueueStats::default());
    }
}
