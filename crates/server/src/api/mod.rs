//! HTTP handlers, grouped by resource.

pub mod doc;
pub mod events;
pub mod executions;
pub mod health;
pub mod hooks;
pub mod schedules;
pub mod webhooks;

use axum::http::StatusCode;
use axum::Json;

/// JSON error body + status, shared by every handler.
pub(crate) type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn error_response(code: u16, message: impl ToString) -> ApiError {
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(serde_json::json!({ "error": message.to_string() })),
    )
}

pub(crate) fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "request failed");
    error_response(500, "internal error")
}
