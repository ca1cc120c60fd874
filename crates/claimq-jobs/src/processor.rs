//! The single-consumer processor loop.
//!
//! The processor drains the store one job at a time: it dequeues the head of
//! the pending queue, hands it to the [`Worker`], routes the outcome through
//! the [`FailureClassifier`] and records it with `mark_done` (or puts the job
//! back on the queue in [`RetryMode::RequeueUntilPoisoned`]).
//!
//! State machine: `Stopped -> Running -> StopRequested -> Stopped`. The first
//! action of every run is crash recovery; the last action of a run stopped
//! with purge is `clear_all`, executed by the loop itself so that nothing it
//! records afterwards can repopulate the store.

use crate::classifier::{Classification, FailureClassifier};
use crate::config::{JobsConfig, RetryMode};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobKey};
use crate::metrics::JobMetrics;
use crate::schedule::WorkingHours;
use crate::store::{JobStore, QueueStats};
use crate::worker::{Artifact, ResultSink, Worker, WorkerError};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Wait between polls of an empty queue.
    pub idle_interval: Duration,
    /// Wait after a store error.
    pub error_backoff: Duration,
    /// Consecutive failures before escalation.
    pub failure_threshold: u32,
    /// Failure handling.
    pub retry_mode: RetryMode,
    /// Purge the store when stopped through [`Processor::stop`].
    pub purge_on_stop: bool,
    /// How long `stop()` waits for the loop to exit.
    pub stop_timeout: Duration,
    /// Only take jobs inside this window.
    pub working_hours: Option<WorkingHours>,
    /// Wait between checks while outside the window.
    pub check_interval: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
            failure_threshold: crate::classifier::DEFAULT_FAILURE_THRESHOLD,
            retry_mode: RetryMode::SingleAttempt,
            purge_on_stop: true,
            stop_timeout: Duration::from_secs(30),
            working_hours: None,
            check_interval: Duration::from_secs(60),
        }
    }
}

impl ProcessorSettings {
    /// Builds settings from the queue configuration.
    pub fn from_config(config: &JobsConfig) -> JobResult<Self> {
        Ok(Self {
            idle_interval: config.processor.idle_interval(),
            error_backoff: config.processor.error_backoff(),
            failure_threshold: config.processor.failure_threshold,
            retry_mode: config.processor.retry_mode,
            purge_on_stop: config.processor.purge_on_stop,
            stop_timeout: config.processor.stop_timeout(),
            working_hours: WorkingHours::from_config(&config.schedule)?,
            check_interval: config.schedule.check_interval(),
        })
    }
}

/// Lifecycle state of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Stopped,
    Running,
    StopRequested,
}

/// Snapshot of processor counters plus best-effort store counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub state: ProcessorState,
    pub is_running: bool,
    pub stop_requested: bool,
    /// Attempts finished since the process started.
    pub processed: u64,
    pub succeeded: u64,
    /// Failed attempts, cancelled and crashed ones included.
    pub failed: u64,
    /// Cancelled attempts, including those interrupted by stop or pause.
    pub cancelled: u64,
    pub poisoned: u64,
    pub requeued: u64,
    pub restored: u64,
    /// Job the worker is currently busy with.
    pub current_job: Option<JobKey>,
    /// Store counts, absent when the store could not be read.
    pub store: Option<QueueStats>,
    pub store_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    poisoned: AtomicU64,
    requeued: AtomicU64,
    restored: AtomicU64,
}

#[derive(Default)]
struct Control {
    /// Present while a run owns the loop.
    token: Option<CancellationToken>,
    purge_on_exit: bool,
}

/// Single-consumer processor.
pub struct Processor {
    store: Arc<dyn JobStore>,
    worker: Arc<dyn Worker>,
    sink: Arc<dyn ResultSink>,
    classifier: FailureClassifier,
    settings: ProcessorSettings,
    control: Mutex<Control>,
    state: watch::Sender<ProcessorState>,
    current_job: Mutex<Option<JobKey>>,
    counters: Counters,
}

impl Processor {
    /// Create a new processor.
    pub fn new(
        store: Arc<dyn JobStore>,
        worker: Arc<dyn Worker>,
        sink: Arc<dyn ResultSink>,
        settings: ProcessorSettings,
    ) -> Self {
        let classifier = FailureClassifier::new(store.clone(), sink.clone(), settings.failure_threshold);
        let (state, _) = watch::channel(ProcessorState::Stopped);

        Self {
            store,
            worker,
            sink,
            classifier,
            settings,
            control: Mutex::new(Control::default()),
            state,
            current_job: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Processor settings.
    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Returns true while a run owns the loop.
    pub fn is_running(&self) -> bool {
        self.state() != ProcessorState::Stopped
    }

    /// Runs the processor loop until it is stopped.
    ///
    /// Fails with [`JobError::AlreadyRunning`] if another run is active.
    pub async fn start(&self) -> JobResult<()> {
        let token = self.begin()?;
        self.run(token).await
    }

    /// Starts the processor loop on a background task.
    ///
    /// The already-running check happens before this returns.
    pub fn spawn(self: &Arc<Self>) -> JobResult<JoinHandle<JobResult<()>>> {
        let token = self.begin()?;
        let processor = Arc::clone(self);
        Ok(tokio::spawn(async move { processor.run(token).await }))
    }

    /// Stops the loop and, when `purge_on_stop` is set, empties the store.
    ///
    /// Purges directly if the processor is not running.
    pub async fn stop(&self) -> JobResult<()> {
        self.halt(self.settings.purge_on_stop).await
    }

    /// Stops the loop and keeps the store as it is.
    pub async fn pause(&self) -> JobResult<()> {
        self.halt(false).await
    }

    /// Counters and best-effort store counts.
    pub async fn stats(&self) -> ProcessorStats {
        let (store, store_error) = match self.store.stats().await {
            Ok(stats) => (Some(stats), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let state = self.state();

        ProcessorStats {
            state,
            is_running: state != ProcessorState::Stopped,
            stop_requested: state == ProcessorState::StopRequested,
            processed: self.counters.processed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            poisoned: self.counters.poisoned.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            restored: self.counters.restored.load(Ordering::Relaxed),
            current_job: self.current_job.lock().clone(),
            store,
            store_error,
        }
    }

    fn begin(&self) -> JobResult<CancellationToken> {
        let mut control = self.control.lock();
        if control.token.is_some() || *self.state.borrow() != ProcessorState::Stopped {
            return Err(JobError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        control.token = Some(token.clone());
        control.purge_on_exit = false;
        self.state.send_replace(ProcessorState::Running);
        Ok(token)
    }

    async fn halt(&self, purge: bool) -> JobResult<()> {
        let signalled = {
            let mut guard = self.control.lock();
            let control = &mut *guard;
            match control.token.as_ref() {
                Some(token) => {
                    control.purge_on_exit = purge;
                    token.cancel();
                    self.state.send_if_modified(|state| {
                        if *state == ProcessorState::Running {
                            *state = ProcessorState::StopRequested;
                            true
                        } else {
                            false
                        }
                    });
                    true
                }
                None => false,
            }
        };

        if signalled {
            info!(purge, "Stop requested, waiting for the processor to finish");
        }

        let mut rx = self.state.subscribe();
        let stopped = tokio::time::timeout(self.settings.stop_timeout, async {
            rx.wait_for(|state| *state == ProcessorState::Stopped)
                .await
                .map(|_| ())
        })
        .await;

        match stopped {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(JobError::Internal("Processor state channel closed".to_string())),
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.stop_timeout.as_secs(),
                    "Processor did not stop in time, it will finish in the background"
                );
                return Err(JobError::StopTimeout(self.settings.stop_timeout.as_secs()));
            }
        }

        // Not running: nothing else can touch the store, purge here.
        if !signalled && purge {
            self.store.clear_all().await?;
            info!("Queue purged");
        }

        Ok(())
    }

    async fn run(&self, token: CancellationToken) -> JobResult<()> {
        info!(
            retry_mode = ?self.settings.retry_mode,
            failure_threshold = self.classifier.threshold(),
            "Processor started"
        );
        JobMetrics::processor_running(true);

        self.recover(&token).await;

        let mut idle_logged = false;
        let mut outside_logged = false;
        let mut last_pending: Option<u64> = None;

        while !token.is_cancelled() {
            if let Some(hours) = &self.settings.working_hours {
                let now = Utc::now();
                if !hours.is_open_at(now) {
                    if !outside_logged {
                        info!(
                            opens_in_secs = hours.until_open_at(now).as_secs(),
                            "Outside working hours, pausing"
                        );
                        outside_logged = true;
                    }
                    self.wait(&token, self.settings.check_interval).await;
                    continue;
                }
                if outside_logged {
                    info!("Inside working hours, resuming");
                    outside_logged = false;
                }
            }

            let stats = match self.store.stats().await {
                Ok(stats) => stats,
                Err(e) => {
                    error!(error = %e, "Failed to read queue stats");
                    JobMetrics::store_error("stats");
                    self.wait(&token, self.settings.error_backoff).await;
                    continue;
                }
            };
            JobMetrics::update_queue_sizes(&stats);

            if last_pending != Some(stats.pending) {
                debug!(pending = stats.pending, "Queue length changed");
                last_pending = Some(stats.pending);
            }

            if stats.pending == 0 {
                if !idle_logged {
                    info!("Queue is empty, waiting for jobs");
                    idle_logged = true;
                }
                self.wait(&token, self.settings.idle_interval).await;
                continue;
            }
            idle_logged = false;

            let job = match self.store.dequeue_next().await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Failed to dequeue job");
                    JobMetrics::store_error("dequeue");
                    self.wait(&token, self.settings.error_backoff).await;
                    continue;
                }
            };

            self.process(job, &token).await;
        }

        self.finish().await
    }

    /// Puts jobs stranded by an earlier run back on the queue. Retried until
    /// it succeeds or the run is stopped.
    async fn recover(&self, token: &CancellationToken) {
        loop {
            match self.store.restore_interrupted().await {
                Ok(restored) => {
                    if !restored.is_empty() {
                        info!(count = restored.len(), "Recovered interrupted jobs");
                        self.counters
                            .restored
                            .fetch_add(restored.len() as u64, Ordering::Relaxed);
                        JobMetrics::jobs_restored(restored.len());
                    }
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to restore interrupted jobs");
                    JobMetrics::store_error("restore");
                    if token.is_cancelled() {
                        return;
                    }
                    self.wait(token, self.settings.error_backoff).await;
                }
            }
        }
    }

    async fn process(&self, job: Job, token: &CancellationToken) {
        JobMetrics::job_dequeued(job.wait_time());
        *self.current_job.lock() = Some(job.key.clone());
        info!(
            record_id = %job.key.record_id,
            secondary_id = %job.key.secondary_id,
            restored = job.restored_at.is_some(),
            "Processing job"
        );

        let started = Instant::now();
        let outcome = match self.invoke_worker(&job, token.child_token()).await {
            Ok(artifact) => self.deliver_artifact(&job, &artifact).await,
            Err(e) => Err((e.reason(), e)),
        };
        let elapsed = started.elapsed();

        // Interrupted by stop or pause: the attempt never finished, so it
        // stays in flight and the next run's recovery puts it back.
        if let Err((_, e)) = &outcome {
            if e.is_cancelled() && token.is_cancelled() {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                info!(
                    record_id = %job.key.record_id,
                    secondary_id = %job.key.secondary_id,
                    "Job interrupted, leaving it in flight for recovery"
                );
                *self.current_job.lock() = None;
                return;
            }
        }

        let Some(classification) = self.classify(&job, &outcome, token).await else {
            warn!(key = %job.key, "Stopping with job still in flight, it will be recovered on next start");
            *self.current_job.lock() = None;
            return;
        };

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        match &outcome {
            Ok(()) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                JobMetrics::job_completed(elapsed);
                info!(
                    record_id = %job.key.record_id,
                    secondary_id = %job.key.secondary_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
            }
            Err((reason, e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if e.is_cancelled() {
                    self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                }
                JobMetrics::job_failed(*reason, elapsed);
                warn!(
                    record_id = %job.key.record_id,
                    secondary_id = %job.key.secondary_id,
                    reason = *reason,
                    error = %e,
                    "Job failed"
                );
            }
        }
        if classification.is_poisoned() {
            self.counters.poisoned.fetch_add(1, Ordering::Relaxed);
        }

        let requeue = match (&outcome, classification) {
            (Err((_, e)), Classification::TransientFailure { .. }) => {
                self.settings.retry_mode == RetryMode::RequeueUntilPoisoned && !e.is_cancelled()
            }
            _ => false,
        };

        self.settle(&job, outcome.is_ok(), requeue, token).await;
        *self.current_job.lock() = None;
    }

    /// Routes the outcome through the classifier. Store errors are retried
    /// until the update succeeds or the run is stopped; `None` means the run
    /// was stopped first.
    async fn classify(
        &self,
        job: &Job,
        outcome: &Result<(), (&'static str, WorkerError)>,
        token: &CancellationToken,
    ) -> Option<Classification> {
        loop {
            let result = match outcome {
                Ok(()) => self.classifier.record_success(job).await,
                Err((_, e)) => self.classifier.record_failure(job, e).await,
            };

            match result {
                Ok(classification) => return Some(classification),
                Err(e) => {
                    error!(
                        record_id = %job.key.record_id,
                        secondary_id = %job.key.secondary_id,
                        error = %e,
                        "Failed to update failure history"
                    );
                    JobMetrics::store_error("failures");
                    if token.is_cancelled() {
                        return None;
                    }
                    self.wait(token, self.settings.error_backoff).await;
                }
            }
        }
    }

    /// Runs the worker on its own task so a panic surfaces as a crash.
    async fn invoke_worker(&self, job: &Job, cancel: CancellationToken) -> Result<Artifact, WorkerError> {
        let worker = Arc::clone(&self.worker);
        let job = job.clone();
        let handle = tokio::spawn(async move { worker.process(&job, cancel).await });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(WorkerError::Crashed(panic_message(e.into_panic()))),
            Err(e) => Err(WorkerError::Crashed(e.to_string())),
        }
    }

    async fn deliver_artifact(
        &self,
        job: &Job,
        artifact: &Artifact,
    ) -> Result<(), (&'static str, WorkerError)> {
        self.sink.write_artifact(job, artifact).await.map_err(|e| {
            error!(
                record_id = %job.key.record_id,
                secondary_id = %job.key.secondary_id,
                error = %e,
                "Failed to deliver extraction result"
            );
            JobMetrics::sink_error("artifact");
            (
                "artifact",
                WorkerError::Failed(format!("Result delivery failed: {}", e)),
            )
        })
    }

    /// Records the outcome in the store. Store errors are retried until the
    /// write succeeds or the run is stopped; in the latter case the job stays
    /// in flight and is recovered by the next run.
    async fn settle(&self, job: &Job, success: bool, requeue: bool, token: &CancellationToken) {
        loop {
            let result = if requeue {
                self.store.requeue(job).await
            } else {
                self.store.mark_done(job, success).await.map(|_| ())
            };

            match result {
                Ok(()) => {
                    if requeue {
                        self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                        JobMetrics::job_requeued();
                        debug!(key = %job.key, "Job put back on the queue");
                    }
                    return;
                }
                Err(JobError::NotFound(field)) => {
                    warn!(field = %field, "Job is no longer in flight, dropping outcome");
                    return;
                }
                Err(e) => {
                    error!(key = %job.key, error = %e, "Failed to record job outcome");
                    JobMetrics::store_error("mark_done");
                    if token.is_cancelled() {
                        warn!(key = %job.key, "Stopping with job still in flight, it will be recovered on next start");
                        return;
                    }
                    self.wait(token, self.settings.error_backoff).await;
                }
            }
        }
    }

    async fn finish(&self) -> JobResult<()> {
        let purge = {
            let mut control = self.control.lock();
            control.token = None;
            control.purge_on_exit
        };

        let result = if purge {
            let result = self.store.clear_all().await;
            match &result {
                Ok(()) => info!("Queue purged"),
                Err(e) => error!(error = %e, "Failed to purge queue on stop"),
            }
            result
        } else {
            Ok(())
        };

        JobMetrics::processor_running(false);
        self.state.send_replace(ProcessorState::Stopped);
        info!("Processor stopped");
        result
    }

    async fn wait(&self, token: &CancellationToken, duration: Duration) {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
