//! Schedule CRUD, lifecycle actions, and manual triggering.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use botsched_engine::model::{Schedule, TriggerResult, TriggerSource};
use botsched_engine::policy::{catchup_plan, missed_slots};
use botsched_engine::schedule_store::{
    CreateScheduleRequest, ListScheduleFilter, ScheduleStore, ScheduleStoreError,
    UpdateScheduleRequest,
};
use botsched_engine::TriggerRequest;

use crate::state::AppState;

use super::{error_response, internal_error, ApiError};

fn store_error(e: ScheduleStoreError) -> ApiError {
    error_response(e.status_code(), e)
}

/// List schedules, optionally filtered by tenant, status, or bot.
#[utoipa::path(
    get,
    path = "/api/schedules",
    tag = "Schedules",
    params(
        ("tenant_id" = Option<Uuid>, Query, description = "Filter by tenant"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("bot_id" = Option<Uuid>, Query, description = "Filter by bot")
    ),
    responses(
        (status = 200, description = "Schedules, newest first", body = Vec<Object>)
    )
)]
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ListScheduleFilter>,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    let rows = ScheduleStore::list(&state.pool, &filter)
        .await
        .map_err(store_error)?;
    Ok(Json(rows))
}

/// Create a schedule (draft unless `activate` is set).
#[utoipa::path(
    post,
    path = "/api/schedules",
    tag = "Schedules",
    request_body = Object,
    responses(
        (status = 201, description = "Schedule created", body = Object),
        (status = 400, description = "Invalid trigger config or unresolvable bot")
    )
)]
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let row = ScheduleStore::create(&state.pool, state.catalog.as_ref(), req)
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Get one schedule.
#[utoipa::path(
    get,
    path = "/api/schedules/{id}",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Schedule", body = Object),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    ScheduleStore::get(&state.pool, id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| error_response(404, format!("schedule not found: {}", id)))
}

/// Update a schedule's configuration.
#[utoipa::path(
    put,
    path = "/api/schedules/{id}",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    request_body = Object,
    responses(
        (status = 200, description = "Updated schedule", body = Object),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    let row = ScheduleStore::update(&state.pool, id, req)
        .await
        .map_err(store_error)?;
    Ok(Json(row))
}

/// Soft-delete a schedule. Execution history is retained.
#[utoipa::path(
    delete,
    path = "/api/schedules/{id}",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ScheduleStore::soft_delete(&state.pool, id)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Lifecycle ────────────────────────────────────────────────────────

/// Activate a schedule (re-resolves the bot, computes the next run).
#[utoipa::path(
    post,
    path = "/api/schedules/{id}/activate",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Activated schedule", body = Object),
        (status = 409, description = "Invalid transition")
    )
)]
pub async fn activate_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    let row = ScheduleStore::activate(&state.pool, state.catalog.as_ref(), id)
        .await
        .map_err(store_error)?;
    Ok(Json(row))
}

/// Pause an active schedule.
#[utoipa::path(
    post,
    path = "/api/schedules/{id}/pause",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Paused schedule", body = Object),
        (status = 409, description = "Invalid transition")
    )
)]
pub async fn pause_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    let row = ScheduleStore::pause(&state.pool, id)
        .await
        .map_err(store_error)?;
    Ok(Json(row))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeRequest {
    /// Replay slots missed while paused, per the schedule's catchup policy.
    #[serde(default)]
    pub catchup: bool,
    /// Fire once immediately after resuming.
    #[serde(default)]
    pub fire_now: bool,
}

#[derive(Serialize)]
pub struct ResumeResponse {
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub catchup_results: Vec<TriggerResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fire_result: Option<TriggerResult>,
}

/// Resume a paused schedule. The optional body can replay missed catchup
/// slots and/or fire immediately.
#[utoipa::path(
    post,
    path = "/api/schedules/{id}/resume",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    request_body = Object,
    responses(
        (status = 200, description = "Resumed schedule", body = Object),
        (status = 409, description = "Invalid transition")
    )
)]
pub async fn resume_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResumeRequest>>,
) -> Result<Json<ResumeResponse>, ApiError> {
    let opts = body.map(|Json(b)| b).unwrap_or_default();
    let row = ScheduleStore::resume(&state.pool, id)
        .await
        .map_err(store_error)?;

    let mut catchup_results = Vec::new();
    if opts.catchup {
        if let (Ok(trigger), Some(last)) = (row.trigger(), row.last_run_at) {
            if trigger.trigger_type().is_time_based() {
                let catchup = row.catchup();
                let missed = missed_slots(&trigger, last, Utc::now(), catchup.window_secs)
                    .map_err(internal_error)?;
                for slot in catchup_plan(&catchup, &missed) {
                    let result = state
                        .processor
                        .process(TriggerRequest::catchup(id, slot))
                        .await
                        .map_err(internal_error)?;
                    catchup_results.push(result);
                }
            }
        }
    }

    let fire_result = if opts.fire_now {
        let result = state
            .processor
            .process(TriggerRequest {
                schedule_id: id,
                scheduled_at: Utc::now(),
                source: TriggerSource::Manual,
                trigger_context: format!("resume-{}", Uuid::new_v4()),
                extra_inputs: serde_json::Map::new(),
                ignore_blackout: false,
                ignore_quota: false,
            })
            .await
            .map_err(internal_error)?;
        Some(result)
    } else {
        None
    };

    // Counters moved if anything fired; return the fresh row.
    let schedule = if catchup_results.is_empty() && fire_result.is_none() {
        row
    } else {
        ScheduleStore::get(&state.pool, id)
            .await
            .map_err(store_error)?
            .unwrap_or(row)
    };

    Ok(Json(ResumeResponse {
        schedule,
        catchup_results,
        fire_result,
    }))
}

/// Disable a schedule.
#[utoipa::path(
    post,
    path = "/api/schedules/{id}/disable",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Disabled schedule", body = Object),
        (status = 409, description = "Invalid transition")
    )
)]
pub async fn disable_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ApiError> {
    let row = ScheduleStore::disable(&state.pool, id)
        .await
        .map_err(store_error)?;
    Ok(Json(row))
}

// ── Manual trigger ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ManualTriggerRequest {
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub ignore_blackout: bool,
    #[serde(default)]
    pub ignore_quota: bool,
}

/// Fire a schedule now, through the same chokepoint as every other
/// trigger source. `ignore_blackout`/`ignore_quota` skip those checks;
/// overlap policy always applies.
#[utoipa::path(
    post,
    path = "/api/schedules/{id}/trigger",
    tag = "Schedules",
    params(("id" = Uuid, Path, description = "Schedule id")),
    request_body = Object,
    responses(
        (status = 200, description = "Trigger outcome (fired or recorded skip)", body = Object),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn trigger_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<ManualTriggerRequest>>,
) -> Result<Json<TriggerResult>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();

    if ScheduleStore::get(&state.pool, id)
        .await
        .map_err(store_error)?
        .is_none()
    {
        return Err(error_response(404, format!("schedule not found: {}", id)));
    }

    let result = state
        .processor
        .process(TriggerRequest {
            schedule_id: id,
            scheduled_at: Utc::now(),
            source: TriggerSource::Manual,
            trigger_context: format!("manual-{}", Uuid::new_v4()),
            extra_inputs: req.inputs,
            ignore_blackout: req.ignore_blackout,
            ignore_quota: req.ignore_quota,
        })
        .await
        .map_err(internal_error)?;
    Ok(Json(result))
}
