//! Health and aggregate statistics endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use botsched_engine::schedule_store::{ScheduleStats, ScheduleStore};

use crate::state::AppState;

use super::{error_response, ApiError};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub instance_id: String,
    pub is_leader: bool,
}

/// Liveness plus this instance's leadership state.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service health", body = Object))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance_id: state.config.scheduler.instance_id.clone(),
        is_leader: state.elector.is_leader(),
    })
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub tenant_id: Option<Uuid>,
}

/// Aggregate scheduling statistics: status counts, success rate,
/// upcoming runs, and recent failures.
#[utoipa::path(
    get,
    path = "/api/schedules/stats",
    tag = "Health",
    params(("tenant_id" = Option<Uuid>, Query, description = "Restrict to one tenant")),
    responses((status = 200, description = "Aggregate statistics", body = Object))
)]
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ScheduleStats>, ApiError> {
    let stats = ScheduleStore::stats(&state.pool, query.tenant_id)
        .await
        .map_err(|e| error_response(e.status_code(), e))?;
    Ok(Json(stats))
}
