//! Event trigger management.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use botsched_engine::events::{EventStoreError, EventTriggerStore, UpsertEventTriggerRequest};
use botsched_engine::model::EventTrigger;

use crate::state::AppState;

use super::{error_response, ApiError};

fn store_error(e: EventStoreError) -> ApiError {
    error_response(e.status_code(), e)
}

/// Create an event trigger binding a schedule to a platform event class.
#[utoipa::path(
    post,
    path = "/api/schedules/{id}/events",
    tag = "Event Triggers",
    params(("id" = Uuid, Path, description = "Schedule id")),
    request_body = Object,
    responses(
        (status = 201, description = "Event trigger created", body = Object),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn create_event_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertEventTriggerRequest>,
) -> Result<(StatusCode, Json<EventTrigger>), ApiError> {
    let schedule = botsched_engine::schedule_store::ScheduleStore::get(&state.pool, id)
        .await
        .map_err(|e| error_response(e.status_code(), e))?
        .ok_or_else(|| error_response(404, format!("schedule not found: {}", id)))?;

    let row = EventTriggerStore::create(&state.pool, schedule.tenant_id, id, req)
        .await
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// List a schedule's event triggers.
#[utoipa::path(
    get,
    path = "/api/schedules/{id}/events",
    tag = "Event Triggers",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Event triggers", body = Vec<Object>)
    )
)]
pub async fn list_event_triggers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EventTrigger>>, ApiError> {
    let rows = EventTriggerStore::list_for_schedule(&state.pool, id)
        .await
        .map_err(store_error)?;
    Ok(Json(rows))
}

/// Update an event trigger.
#[utoipa::path(
    put,
    path = "/api/events/{id}",
    tag = "Event Triggers",
    params(("id" = Uuid, Path, description = "Event trigger id")),
    request_body = Object,
    responses(
        (status = 200, description = "Updated event trigger", body = Object),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_event_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertEventTriggerRequest>,
) -> Result<Json<EventTrigger>, ApiError> {
    let row = EventTriggerStore::update(&state.pool, id, req)
        .await
        .map_err(store_error)?;
    Ok(Json(row))
}

/// Delete an event trigger.
#[utoipa::path(
    delete,
    path = "/api/events/{id}",
    tag = "Event Triggers",
    params(("id" = Uuid, Path, description = "Event trigger id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_event_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    EventTriggerStore::delete(&state.pool, id)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
