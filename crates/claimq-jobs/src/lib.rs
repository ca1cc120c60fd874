//! Claimq Jobs - durable single-consumer job queue
//!
//! Queue and processing lifecycle for claim extraction jobs:
//! - Durable job store (Redis, or in-memory for tests and throwaway runs)
//! - Single-consumer processor loop with cooperative cancellation
//! - Crash recovery of jobs left in flight by an earlier run
//! - Poison-job containment with escalation to a downstream sink
//! - Optional working-hours window
//!
//! # Architecture
//!
//! ```text
//!  Producer ──enqueue──▶ ┌──────────────── JobStore ────────────────┐
//!                        │ pending (FIFO)   inflight   completed     │
//!                        │ failures (per job key)                    │
//!                        └───────┬────────────▲───────────▲──────────┘
//!                        dequeue │            │ mark_done │ failures
//!                                ▼            │           │
//!                        ┌──────────────┐     │   ┌───────┴──────────┐
//!                        │  Processor   │─────┴──▶│ FailureClassifier│
//!                        └──────┬───────┘         └───────┬──────────┘
//!                               │ process(job, cancel)    │ poison job
//!                               ▼                         ▼
//!                        ┌──────────────┐         ┌──────────────────┐
//!                        │    Worker    │         │    ResultSink    │
//!                        └──────────────┘         └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use claimq_jobs::{InMemoryJobStore, JobRequest, JobStore, Processor, ProcessorSettings};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! store.enqueue(JobRequest::new("100", "ABC")).await?;
//!
//! let processor = Arc::new(Processor::new(store, worker, sink, ProcessorSettings::default()));
//! let handle = processor.spawn()?;
//! // ...
//! processor.pause().await?;
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod processor;
pub mod redis;
pub mod schedule;
pub mod store;
pub mod worker;

pub use classifier::{Classification, FailureClassifier, DEFAULT_FAILURE_THRESHOLD};
pub use config::{JobsConfig, ProcessorConfig, RedisConfig, RetryMode, ScheduleConfig, StoreBackend};
pub use error::{JobError, JobResult};
pub use job::{Credentials, Job, JobKey, JobPayload, JobRequest, JobStatus};
pub use memory::InMemoryJobStore;
pub use metrics::{register_metrics, JobMetrics};
pub use processor::{Processor, ProcessorSettings, ProcessorState, ProcessorStats};
pub use redis::{create_pool, RedisJobStore, RedisKeys};
pub use schedule::WorkingHours;
pub use store::{JobStore, QueueStats};
pub use worker::{Artifact, PermanentFailure, ResultSink, SinkError, Worker, WorkerError};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::job::{Job, JobKey, JobRequest, JobStatus};
    pub use crate::store::JobStore;
    pub use crate::worker::{ResultSink, Worker, WorkerError};
    pub use crate::{JobError, JobResult};
}
