//! Job store abstraction.
//!
//! A store holds four disjoint collections:
//!
//! - `pending`: FIFO list of jobs waiting for the processor
//! - `inflight`: jobs handed to the worker and not yet recorded as done
//! - `completed`: last terminal outcome per job key
//! - `failures`: consecutive failure count per job key
//!
//! Every operation is atomic with respect to concurrent producers. Stores
//! carry no business logic; the processor and the failure classifier decide
//! what moves where.

use crate::error::JobResult;
use crate::job::{Job, JobKey, JobRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sizes of the four store collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting in the pending queue.
    pub pending: u64,
    /// Jobs currently handed to the worker.
    pub inflight: u64,
    /// Jobs with a recorded terminal outcome.
    pub completed: u64,
    /// Keys with a non-zero failure count.
    pub failures: u64,
}

/// Durable job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Builds a pending job from the request and appends it to the tail of
    /// the pending queue. Returns the stored job.
    async fn enqueue(&self, request: JobRequest) -> JobResult<Job>;

    /// Pops the head of the pending queue, marks it processing and records
    /// it as in flight. Returns `None` when the queue is empty.
    async fn dequeue_next(&self) -> JobResult<Option<Job>>;

    /// Removes the job from the in-flight map and records its terminal
    /// outcome in the completed map, replacing any earlier outcome.
    async fn mark_done(&self, job: &Job, success: bool) -> JobResult<Job>;

    /// Moves an in-flight job back to the tail of the pending queue.
    async fn requeue(&self, job: &Job) -> JobResult<()>;

    /// Moves every in-flight job back to the tail of the pending queue and
    /// returns them. Calling it again without new work is a no-op.
    async fn restore_interrupted(&self) -> JobResult<Vec<Job>>;

    /// Collection sizes.
    async fn stats(&self) -> JobResult<QueueStats>;

    /// Pending jobs in queue order.
    async fn list_pending(&self) -> JobResult<Vec<Job>>;

    /// In-flight jobs.
    async fn list_inflight(&self) -> JobResult<Vec<Job>>;

    /// Completed jobs.
    async fn list_completed(&self) -> JobResult<Vec<Job>>;

    /// Consecutive failure count for a key; 0 when never failed or reset.
    async fn failure_count(&self, key: &JobKey) -> JobResult<u32>;

    /// Increments the failure count and returns the new value. When the new
    /// value reaches `threshold` the count is cleared in the same atomic
    /// step, so a threshold is crossed at most once per run of failures.
    async fn count_failure(&self, key: &JobKey, threshold: u32) -> JobResult<u32>;

    /// Forgets the failure history of a key.
    async fn reset_failures(&self, key: &JobKey) -> JobResult<()>;

    /// Empties the pending queue only. Returns how many jobs were dropped.
    async fn clear_pending(&self) -> JobResult<u64>;

    /// Empties all four collections.
    async fn clear_all(&self) -> JobResult<()>;

    /// Checks that the backing store is reachable.
    async fn health_check(&self) -> JobResult<()>;
}
