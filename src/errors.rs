use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

/// Unified error kinds surfaced at the HTTP boundary.
///
/// Subsystems return `Result<T, CoreError>` (or `anyhow::Result<T>` converted
/// at the edge); translation to a status code happens exactly once, here.
#[derive(Debug)]
pub enum CoreError {
    InvalidRequest(String),
    NotFound(String),
    PermissionDenied(String),
    UpstreamUnavailable(String),
    Internal(anyhow::Error),
}

impl CoreError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Internal(err.into())
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            CoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            CoreError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            CoreError::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {msg}"),
            CoreError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
    trace_id: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let trace_id = Uuid::new_v4().to_string();

        let (status, error_code, message) = match self {
            CoreError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            CoreError::PermissionDenied(msg) => {
                (StatusCode::FORBIDDEN, "permission_denied", msg)
            }
            CoreError::UpstreamUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", msg)
            }
            CoreError::Internal(err) => {
                tracing::error!(trace_id = %trace_id, error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "an internal error occurred".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorBody {
                error_code,
                message,
                trace_id,
            }),
        )
            .into_response()
    }
}
