//! Application state for Axum handlers.

use claimq_jobs::{JobStore, Processor};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub processor: Arc<Processor>,
    /// Absent when no Prometheus recorder is installed (tests).
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(store: Arc<dyn JobStore>, processor: Arc<Processor>) -> Self {
        Self {
            store,
            processor,
            metrics: None,
        }
    }

    /// Attaches the handle used to render `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
