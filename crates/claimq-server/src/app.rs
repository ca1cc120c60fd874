//! Application assembly and lifecycle.

use crate::clients::{HttpExtractor, HttpResultSink};
use axum::Router;
use claimq_config::AppConfig;
use claimq_core::{ClaimqError, ClaimqResult};
use claimq_jobs::{
    create_pool, InMemoryJobStore, JobError, JobResult, JobStore, Processor, ProcessorSettings,
    RedisJobStore, ResultSink, StoreBackend, Worker,
};
use claimq_rest::{create_router, AppState};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Fully wired service, ready to serve.
pub struct Application {
    pub config: AppConfig,
    pub store: Arc<dyn JobStore>,
    pub processor: Arc<Processor>,
    pub router: Router,
}

/// Creates the job store selected by `jobs.backend`.
pub async fn build_store(config: &AppConfig) -> ClaimqResult<Arc<dyn JobStore>> {
    match config.jobs.backend {
        StoreBackend::Redis => {
            let pool = create_pool(&config.jobs.redis)
                .await
                .map_err(|e| ClaimqError::Store(e.to_string()))?;
            Ok(Arc::new(RedisJobStore::new(pool, &config.jobs.redis)))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory job store, queued jobs do not survive a restart");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}

/// Builds the service with the HTTP extractor and sink.
pub async fn build(config: AppConfig, metrics: Option<PrometheusHandle>) -> ClaimqResult<Application> {
    let store = build_store(&config).await?;
    let worker: Arc<dyn Worker> = Arc::new(HttpExtractor::new(&config.extractor)?);
    let sink: Arc<dyn ResultSink> = Arc::new(HttpResultSink::new(&config.sink)?);

    Application::assemble(config, store, worker, sink, metrics)
}

impl Application {
    /// Wires the processor and router around the given seams.
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn JobStore>,
        worker: Arc<dyn Worker>,
        sink: Arc<dyn ResultSink>,
        metrics: Option<PrometheusHandle>,
    ) -> ClaimqResult<Self> {
        let settings = ProcessorSettings::from_config(&config.jobs)
            .map_err(|e| ClaimqError::Configuration(e.to_string()))?;
        let processor = Arc::new(Processor::new(store.clone(), worker, sink, settings));

        let mut state = AppState::new(store.clone(), processor.clone());
        if let Some(handle) = metrics {
            state = state.with_metrics(handle);
        }
        let router = create_router(state, &config.server);

        Ok(Self {
            config,
            store,
            processor,
            router,
        })
    }

    /// Serves the API until `shutdown` resolves, then pauses the processor.
    ///
    /// Pausing keeps the queue, anything still pending is picked up by the
    /// next start.
    pub async fn run<F>(self, shutdown: F) -> ClaimqResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.server.addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ClaimqError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        info!(
            "Starting REST server on http://{}",
            listener.local_addr().map_or(addr, |a| a.to_string())
        );

        let processor_task = if self.config.jobs.processor.autostart {
            info!("Autostarting processor");
            Some(self.processor.spawn().map_err(job_error)?)
        } else {
            None
        };

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ClaimqError::Internal(format!("REST server error: {}", e)));

        info!("Pausing processor");
        if let Err(e) = self.processor.pause().await {
            error!(error = %e, "Processor did not pause cleanly");
        }
        if let Some(task) = processor_task {
            await_processor(task).await;
        }

        served?;
        info!("Server shutdown complete");
        Ok(())
    }
}

async fn await_processor(task: JoinHandle<JobResult<()>>) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Processor exited with an error"),
        Err(e) => error!(error = %e, "Processor task failed"),
    }
}

fn job_error(err: JobError) -> ClaimqError {
    match err {
        JobError::AlreadyRunning => ClaimqError::Conflict(err.to_string()),
        JobError::Redis(_) | JobError::Pool(_) => ClaimqError::Store(err.to_string()),
        other => ClaimqError::Internal(other.to_string()),
    }
}
