//! Webhook trigger management (per-schedule, 1:1).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use botsched_engine::model::WebhookTrigger;
use botsched_engine::webhook::{UpsertWebhookRequest, WebhookStore, WebhookStoreError};

use crate::state::AppState;

use super::{error_response, ApiError};

fn store_error(e: WebhookStoreError) -> ApiError {
    error_response(e.status_code(), e)
}

/// Create response: the only place the plaintext token ever appears.
#[derive(Serialize)]
pub struct CreatedWebhookResponse {
    #[serde(flatten)]
    pub trigger: WebhookTrigger,
    pub token: String,
}

/// Create the webhook trigger for a schedule. The bearer token in the
/// response is shown exactly once; only its hash is stored.
#[utoipa::path(
    post,
    path = "/api/schedules/{id}/webhook",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Schedule id")),
    request_body = Object,
    responses(
        (status = 201, description = "Webhook trigger with one-time token", body = Object),
        (status = 409, description = "Schedule already has a webhook trigger")
    )
)]
pub async fn create_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertWebhookRequest>,
) -> Result<(StatusCode, Json<CreatedWebhookResponse>), ApiError> {
    let schedule = botsched_engine::schedule_store::ScheduleStore::get(&state.pool, id)
        .await
        .map_err(|e| error_response(e.status_code(), e))?
        .ok_or_else(|| error_response(404, format!("schedule not found: {}", id)))?;

    let (trigger, token) = WebhookStore::create(&state.pool, schedule.tenant_id, id, req)
        .await
        .map_err(store_error)?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedWebhookResponse { trigger, token }),
    ))
}

/// Inspect a schedule's webhook trigger (token never included).
#[utoipa::path(
    get,
    path = "/api/schedules/{id}/webhook",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Webhook trigger", body = Object),
        (status = 404, description = "No webhook trigger")
    )
)]
pub async fn get_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookTrigger>, ApiError> {
    WebhookStore::get_for_schedule(&state.pool, id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| error_response(404, format!("no webhook trigger for schedule {}", id)))
}

/// Update webhook verification policy. The token is never rotated here.
#[utoipa::path(
    put,
    path = "/api/schedules/{id}/webhook",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Schedule id")),
    request_body = Object,
    responses(
        (status = 200, description = "Updated webhook trigger", body = Object),
        (status = 404, description = "No webhook trigger")
    )
)]
pub async fn update_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertWebhookRequest>,
) -> Result<Json<WebhookTrigger>, ApiError> {
    let row = WebhookStore::update(&state.pool, id, req)
        .await
        .map_err(store_error)?;
    Ok(Json(row))
}

/// Revoke the webhook trigger. The token is not recoverable afterwards.
#[utoipa::path(
    delete,
    path = "/api/schedules/{id}/webhook",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 204, description = "Revoked"),
        (status = 404, description = "No webhook trigger")
    )
)]
pub async fn revoke_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    WebhookStore::revoke(&state.pool, id)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
