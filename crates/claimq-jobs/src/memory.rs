//! In-process job store.
//!
//! Used by tests and by deployments that accept losing the queue on exit.
//! All four collections live behind one mutex, so each operation is atomic.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobKey, JobRequest};
use crate::store::{JobStore, QueueStats};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Default)]
struct State {
    pending: VecDeque<Job>,
    inflight: HashMap<String, Job>,
    completed: HashMap<String, Job>,
    failures: HashMap<String, u32>,
}

/// Job store kept in process memory.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, request: JobRequest) -> JobResult<Job> {
        let job = Job::new(request)?;
        let mut state = self.state.lock();
        state.pending.push_back(job.clone());
        debug!(key = %job.key, pending = state.pending.len(), "Job enqueued");
        Ok(job)
    }

    async fn dequeue_next(&self) -> JobResult<Option<Job>> {
        let mut state = self.state.lock();
        let Some(mut job) = state.pending.pop_front() else {
            return Ok(None);
        };
        job.mark_started(Utc::now());
        state.inflight.insert(job.key.field(), job.clone());
        Ok(Some(job))
    }

    async fn mark_done(&self, job: &Job, success: bool) -> JobResult<Job> {
        let mut done = job.clone();
        done.mark_finished(success, Utc::now());

        let field = done.key.field();
        let mut state = self.state.lock();
        state.inflight.remove(&field);
        state.completed.insert(field, done.clone());
        Ok(done)
    }

    async fn requeue(&self, job: &Job) -> JobResult<()> {
        let mut queued = job.clone();
        queued.mark_requeued();

        let mut state = self.state.lock();
        if state.inflight.remove(&queued.key.field()).is_none() {
            return Err(JobError::NotFound(queued.key.field()));
        }
        state.pending.push_back(queued);
        Ok(())
    }

    async fn restore_interrupted(&self) -> JobResult<Vec<Job>> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let mut restored: Vec<Job> = state.inflight.drain().map(|(_, job)| job).collect();
        restored.sort_by_key(|job| job.started_at);
        for job in &mut restored {
            job.mark_restored(now);
        }
        state.pending.extend(restored.iter().cloned());
        Ok(restored)
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let state = self.state.lock();
        Ok(QueueStats {
            pending: state.pending.len() as u64,
            inflight: state.inflight.len() as u64,
            completed: state.completed.len() as u64,
            failures: state.failures.len() as u64,
        })
    }

    async fn list_pending(&self) -> JobResult<Vec<Job>> {
        Ok(self.state.lock().pending.iter().cloned().collect())
    }

    async fn list_inflight(&self) -> JobResult<Vec<Job>> {
        Ok(self.state.lock().inflight.values().cloned().collect())
    }

    async fn list_completed(&self) -> JobResult<Vec<Job>> {
        Ok(self.state.lock().completed.values().cloned().collect())
    }

    async fn failure_count(&self, key: &JobKey) -> JobResult<u32> {
        Ok(self
            .state
            .lock()
            .failures
            .get(&key.field())
            .copied()
            .unwrap_or(0))
    }

    async fn count_failure(&self, key: &JobKey, threshold: u32) -> JobResult<u32> {
        let mut state = self.state.lock();
        let field = key.field();
        let count = state.failures.get(&field).copied().unwrap_or(0) + 1;
        if count >= threshold {
            state.failures.remove(&field);
        } else {
            state.failures.insert(field, count);
        }
        Ok(count)
    }

    async fn reset_failures(&self, key: &JobKey) -> JobResult<()> {
        self.state.lock().failures.remove(&key.field());
        Ok(())
    }

    async fn clear_pending(&self) -> JobResult<u64> {
        let mut state = self.state.lock();
        let dropped = state.pending.len() as u64;
        state.pending.clear();
        Ok(dropped)
    }

    async fn clear_all(&self) -> JobResult<()> {
        *self.state.lock() = State::default();
        Ok(())
    }

    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}
