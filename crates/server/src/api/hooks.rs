//! Inbound firing surfaces: webhook calls, platform event ingestion,
//! and the Dispatch run-completion callback.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use botsched_engine::events::{debounced, filters_match, EventTriggerStore, PlatformEvent};
use botsched_engine::model::{TriggerResult, TriggerSource};
use botsched_engine::payload::map_fields;
use botsched_engine::webhook::{verify_call, InboundCall, WebhookRejection, WebhookStore};
use botsched_engine::TriggerRequest;

use crate::state::AppState;

use super::{error_response, internal_error, ApiError};

/// Signature headers accepted on inbound webhook calls.
const SIGNATURE_HEADERS: [&str; 2] = ["x-signature-256", "x-hub-signature-256"];
/// Optional caller-supplied delivery id, folded into the idempotency key.
const DELIVERY_HEADER: &str = "x-delivery-id";

fn rejection(e: WebhookRejection) -> ApiError {
    error_response(e.status_code(), e)
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// Fire a schedule from an inbound webhook call.
///
/// Verification order: token, IP allow-list, required headers, HMAC
/// signature, rate budgets, expiry/cap, payload rule. A rejected call
/// never reaches the trigger chokepoint.
#[utoipa::path(
    post,
    path = "/hooks/{token}",
    tag = "Inbound",
    params(("token" = String, Path, description = "Webhook bearer token")),
    request_body = Object,
    responses(
        (status = 200, description = "Trigger outcome", body = Object),
        (status = 401, description = "Unknown token or bad signature"),
        (status = 429, description = "Rate budget exhausted")
    )
)]
pub async fn inbound_webhook(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TriggerResult>, ApiError> {
    let trigger = WebhookStore::get_by_token(&state.pool, &token)
        .await
        .map_err(|e| error_response(e.status_code(), e))?
        .ok_or_else(|| rejection(WebhookRejection::UnknownToken))?;

    let payload: serde_json::Value = if body.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| error_response(400, format!("invalid JSON payload: {}", e)))?
    };

    let header_map = lowercase_headers(&headers);
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|h| header_map.get(*h))
        .map(String::as_str);
    let forwarded_ip = header_map
        .get("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .map(str::to_string);
    let remote_ip = forwarded_ip.unwrap_or_else(|| addr.ip().to_string());

    let now = Utc::now();
    let call = InboundCall {
        remote_ip: Some(&remote_ip),
        headers: &header_map,
        signature,
        raw_body: &body,
        payload: &payload,
    };
    verify_call(&trigger, &call, now).map_err(rejection)?;

    // CAS counter bump; losing the race means a concurrent delivery
    // exhausted the budget first.
    let consumed = WebhookStore::consume_call(&state.pool, trigger.id, now)
        .await
        .map_err(|e| error_response(e.status_code(), e))?;
    if !consumed {
        return Err(rejection(WebhookRejection::RateLimitedMinute));
    }

    let context = header_map
        .get(DELIVERY_HEADER)
        .cloned()
        .unwrap_or_else(|| format!("webhook-{}", Uuid::new_v4()));
    let result = state
        .processor
        .process(TriggerRequest {
            schedule_id: trigger.schedule_id,
            scheduled_at: now,
            source: TriggerSource::Webhook,
            trigger_context: context,
            extra_inputs: map_fields(&payload, &trigger.field_mapping()),
            ignore_blackout: false,
            ignore_quota: false,
        })
        .await
        .map_err(internal_error)?;
    Ok(Json(result))
}

/// Ingest one platform event and fire every matching event trigger.
#[utoipa::path(
    post,
    path = "/api/events",
    tag = "Inbound",
    request_body = Object,
    responses(
        (status = 200, description = "Trigger outcomes for matched schedules", body = Vec<Object>)
    )
)]
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<PlatformEvent>,
) -> Result<Json<Vec<TriggerResult>>, ApiError> {
    let candidates =
        EventTriggerStore::list_candidates(&state.pool, event.tenant_id, event.event_type)
            .await
            .map_err(|e| error_response(e.status_code(), e))?;

    let now = Utc::now();
    let delivery = event.event_id.unwrap_or_else(Uuid::new_v4);
    let mut results = Vec::new();
    for trigger in candidates {
        if !filters_match(&trigger.filters(), &event.payload) {
            continue;
        }
        if debounced(&trigger, now) {
            tracing::debug!(
                trigger_id = %trigger.id,
                schedule_id = %trigger.schedule_id,
                "event match suppressed by debounce window"
            );
            continue;
        }
        EventTriggerStore::mark_triggered(&state.pool, trigger.id, now)
            .await
            .map_err(|e| error_response(e.status_code(), e))?;

        let result = state
            .processor
            .process(TriggerRequest {
                schedule_id: trigger.schedule_id,
                scheduled_at: now,
                source: TriggerSource::Event,
                trigger_context: format!("event-{}-{}", trigger.id, delivery),
                extra_inputs: map_fields(&event.payload, &trigger.field_mapping()),
                ignore_blackout: false,
                ignore_quota: false,
            })
            .await
            .map_err(internal_error)?;
        results.push(result);
    }
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct RunCompletionRequest {
    pub success: bool,
    pub error: Option<String>,
}

/// Dispatch's completion callback: closes the execution, updates the
/// schedule's statistics, and fires a queued execution if one is waiting
/// on the freed slot.
#[utoipa::path(
    post,
    path = "/api/runs/{run_id}/complete",
    tag = "Inbound",
    params(("run_id" = Uuid, Path, description = "Run id reported by Dispatch")),
    request_body = Object,
    responses(
        (status = 200, description = "Completion applied; optional follow-up firing", body = Object)
    )
)]
pub async fn complete_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
    Json(req): Json<RunCompletionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let follow_up = state
        .processor
        .handle_run_completion(run_id, req.success, req.error.as_deref())
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({
        "acknowledged": true,
        "queued_firing": follow_up,
    })))
}
