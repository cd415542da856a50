//! HTTP handlers: one module per resource family, mirroring the `actions/`
//! layout these handlers are grounded on.

pub mod vector;
pub mod volume;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

/// Consistent JSON error body for handler-level validation failures that
/// don't go through [`crate::errors::CoreError`] (e.g. bad path params axum
/// itself rejects before a handler runs).
pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(json!({ "errors": message })))
}
