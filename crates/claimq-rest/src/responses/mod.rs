//! API response types.

use claimq_core::{ClaimqError, ErrorResponse};
use claimq_jobs::JobError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Envelope returned by every queue endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful response.
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            message: error.message.clone(),
            data: None,
            error: Some(error),
        }
    }
}

/// Application error type for Axum.
#[derive(Debug)]
pub struct AppError(pub ClaimqError);

impl From<ClaimqError> for AppError {
    fn from(err: ClaimqError) -> Self {
        Self(err)
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        let mapped = match err {
            JobError::InvalidJob(message) => ClaimqError::Validation(message),
            JobError::AlreadyRunning => ClaimqError::Conflict(err.to_string()),
            JobError::StopTimeout(_) => ClaimqError::Timeout(err.to_string()),
            JobError::Redis(_) | JobError::Pool(_) => ClaimqError::Store(err.to_string()),
            JobError::Configuration(message) => ClaimqError::Configuration(message),
            JobError::Serialization(_) | JobError::NotFound(_) | JobError::Internal(_) => {
                ClaimqError::Internal(err.to_string())
            }
        };
        Self(mapped)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let error_response = ErrorResponse::from_error(&self.0);
        let body = Json(ApiResponse::<()>::error(error_response));

        (status, body).into_response()
    }
}

/// Result type for Axum handlers.
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// Helper to create a success response.
pub fn ok<T: Serialize>(message: impl Into<String>, data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(message, data)))
}

/// Helper to create a created (201) response.
pub fn created<T: Serialize>(
    message: impl Into<String>,
    data: T,
) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(message, data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: JobError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_job_error_status_mapping() {
        assert_eq!(status_of(JobError::InvalidJob("blank".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(JobError::AlreadyRunning), StatusCode::CONFLICT);
        assert_eq!(status_of(JobError::StopTimeout(30)), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(JobError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_envelope() {
        let response = ApiResponse::<()>::error(ErrorResponse::from_error(&ClaimqError::conflict(
            "processor already running",
        )));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "CONFLICT");
        assert!(json.get("data").is_none());
    }
}
