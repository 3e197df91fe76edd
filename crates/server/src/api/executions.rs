//! Execution history queries.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use botsched_engine::execution_store::{ExecutionFilter, ExecutionStore, ExecutionStoreError};
use botsched_engine::model::ScheduleExecution;

use crate::state::AppState;

use super::{error_response, ApiError};

fn store_error(e: ExecutionStoreError) -> ApiError {
    error_response(e.status_code(), e)
}

/// Execution history for one schedule, newest first. Supports status and
/// time-range filters plus a result limit.
#[utoipa::path(
    get,
    path = "/api/schedules/{id}/executions",
    tag = "Executions",
    params(
        ("id" = Uuid, Path, description = "Schedule id"),
        ("status" = Option<String>, Query, description = "Filter by execution status"),
        ("from" = Option<String>, Query, description = "Oldest created_at (RFC 3339)"),
        ("to" = Option<String>, Query, description = "Newest created_at (RFC 3339)"),
        ("limit" = Option<i64>, Query, description = "Max rows (default 100, cap 1000)")
    ),
    responses(
        (status = 200, description = "Execution rows", body = Vec<Object>)
    )
)]
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(filter): Query<ExecutionFilter>,
) -> Result<Json<Vec<ScheduleExecution>>, ApiError> {
    let rows = ExecutionStore::list_for_schedule(&state.pool, id, &filter)
        .await
        .map_err(store_error)?;
    Ok(Json(rows))
}

/// Fetch one execution by id.
#[utoipa::path(
    get,
    path = "/api/executions/{id}",
    tag = "Executions",
    params(("id" = Uuid, Path, description = "Execution id")),
    responses(
        (status = 200, description = "Execution row", body = Object),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduleExecution>, ApiError> {
    ExecutionStore::get(&state.pool, id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| error_response(404, format!("execution not found: {}", id)))
}
