//! Queue administration REST API controller.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use claimq_core::ClaimqError;
use claimq_jobs::{Job, JobMetrics, JobRequest, ProcessorStats};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    responses::{created, ok, ApiResponse, ApiResult, AppError},
    state::AppState,
};

/// Create the queue router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/add", post(add_job))
        .route("/start", post(start_processor))
        .route("/stop", post(stop_processor))
        .route("/pause", post(pause_processor))
        .route("/status", get(processor_status))
        .route("/requests", get(list_requests))
        .route("/clear", delete(clear_all))
        .route("/pending", delete(clear_pending))
        .route("/health", get(store_health))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of `POST /add`.
#[derive(Debug, Deserialize)]
pub struct AddJobRequest {
    #[serde(default)]
    pub claim_number: String,
    #[serde(default)]
    pub vin_number: String,
    #[serde(default = "default_collect_diagrams")]
    pub collect_diagrams: bool,
    pub credentials: Option<CredentialsBody>,
}

fn default_collect_diagrams() -> bool {
    true
}

/// Source-system login supplied with a job.
#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub username: String,
    pub password: String,
}

/// Response for `POST /add`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddJobResponse {
    pub claim_number: String,
    pub vin_number: String,
    pub queue_length: u64,
}

/// Processor state after a lifecycle call.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessorStateResponse {
    pub is_running: bool,
}

/// Jobs in every collection, credentials redacted.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestsResponse {
    pub queue_length: usize,
    pub processing_count: usize,
    pub completed_count: usize,
    pub pending: Vec<Job>,
    pub processing: Vec<Job>,
    pub completed: Vec<Job>,
}

/// Response for the clear endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    /// Pending entries removed, when the store reports it.
    pub removed: Option<u64>,
}

/// Store connectivity.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreHealthResponse {
    pub store_status: String,
    pub processor_running: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn add_job(
    State(state): State<AppState>,
    Json(body): Json<AddJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AddJobResponse>>), AppError> {
    let claim_number = body.claim_number.trim().to_string();
    let vin_number = body.vin_number.trim().to_string();
    if claim_number.is_empty() && vin_number.is_empty() {
        return Err(ClaimqError::validation("claim_number or vin_number is required").into());
    }

    let mut request = JobRequest::new(&claim_number, &vin_number)
        .collect_diagrams(body.collect_diagrams);
    if let Some(credentials) = body.credentials {
        request = request.credentials(credentials.username, credentials.password);
    }

    let job = state.store.enqueue(request).await?;
    JobMetrics::job_enqueued();

    let queue_length = state.store.stats().await?.pending;
    info!(key = %job.key, queue_length, "Job added to queue");

    Ok(created(
        format!("Job {} added to queue", job.key),
        AddJobResponse {
            claim_number,
            vin_number,
            queue_length,
        },
    ))
}

async fn start_processor(State(state): State<AppState>) -> ApiResult<ProcessorStateResponse> {
    let handle = state.processor.spawn()?;

    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Processor exited with an error"),
            Err(e) => warn!(error = %e, "Processor task failed"),
        }
    });

    info!("Processor started through the API");
    ok(
        "Processor started",
        ProcessorStateResponse { is_running: true },
    )
}

async fn stop_processor(State(state): State<AppState>) -> ApiResult<ProcessorStateResponse> {
    state.processor.stop().await?;
    ok(
        "Processor stopped",
        ProcessorStateResponse {
            is_running: state.processor.is_running(),
        },
    )
}

async fn pause_processor(State(state): State<AppState>) -> ApiResult<ProcessorStateResponse> {
    state.processor.pause().await?;
    ok(
        "Processor paused, queue kept",
        ProcessorStateResponse {
            is_running: state.processor.is_running(),
        },
    )
}

async fn processor_status(State(state): State<AppState>) -> ApiResult<ProcessorStats> {
    let stats = state.processor.stats().await;
    ok("Processor status", stats)
}

async fn list_requests(State(state): State<AppState>) -> ApiResult<RequestsResponse> {
    let redact = |jobs: Vec<Job>| jobs.iter().map(Job::redacted).collect::<Vec<_>>();

    let pending = redact(state.store.list_pending().await?);
    let processing = redact(state.store.list_inflight().await?);
    let completed = redact(state.store.list_completed().await?);

    ok(
        "Queue contents",
        RequestsResponse {
            queue_length: pending.len(),
            processing_count: processing.len(),
            completed_count: completed.len(),
            pending,
            processing,
            completed,
        },
    )
}

async fn clear_all(State(state): State<AppState>) -> ApiResult<ClearResponse> {
    state.store.clear_all().await?;
    info!("Queue store cleared through the API");
    ok("All queue data cleared", ClearResponse { removed: None })
}

async fn clear_pending(State(state): State<AppState>) -> ApiResult<ClearResponse> {
    let removed = state.store.clear_pending().await?;
    info!(removed, "Pending jobs cleared through the API");
    ok(
        format!("{} pending jobs removed", removed),
        ClearResponse {
            removed: Some(removed),
        },
    )
}

async fn store_health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<StoreHealthResponse>>) {
    let processor_running = state.processor.is_running();

    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                "Queue store reachable",
                StoreHealthResponse {
                    store_status: "connected".to_string(),
                    processor_running,
                },
            )),
        ),
        Err(e) => {
            warn!(error = %e, "Queue store health check failed");
            let mut response = ApiResponse::success(
                format!("Queue store unreachable: {}", e),
                StoreHealthResponse {
                    store_status: "disconnected".to_string(),
                    processor_running,
                },
            );
            response.success = false;
            (StatusCode::SERVICE_UNAVAILABLE, Json(response))
        }
    }
}
