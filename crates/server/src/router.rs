//! HTTP router construction.
//!
//! Assembles all Axum routes, middleware, and OpenAPI docs into a single
//! `Router`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        // Static paths MUST precede /api/schedules/{id} to avoid capture.
        .route("/api/schedules/stats", get(api::health::stats))
        .route(
            "/api/schedules",
            get(api::schedules::list_schedules).post(api::schedules::create_schedule),
        )
        .route(
            "/api/schedules/{id}",
            get(api::schedules::get_schedule)
                .put(api::schedules::update_schedule)
                .delete(api::schedules::delete_schedule),
        )
        .route("/api/schedules/{id}/activate", post(api::schedules::activate_schedule))
        .route("/api/schedules/{id}/pause", post(api::schedules::pause_schedule))
        .route("/api/schedules/{id}/resume", post(api::schedules::resume_schedule))
        .route("/api/schedules/{id}/disable", post(api::schedules::disable_schedule))
        .route("/api/schedules/{id}/trigger", post(api::schedules::trigger_schedule))
        .route("/api/schedules/{id}/executions", get(api::executions::list_executions))
        .route("/api/executions/{id}", get(api::executions::get_execution))
        .route(
            "/api/schedules/{id}/webhook",
            get(api::webhooks::get_webhook)
                .post(api::webhooks::create_webhook)
                .put(api::webhooks::update_webhook)
                .delete(api::webhooks::revoke_webhook),
        )
        .route(
            "/api/schedules/{id}/events",
            get(api::events::list_event_triggers).post(api::events::create_event_trigger),
        )
        .route(
            "/api/events/{id}",
            axum::routing::put(api::events::update_event_trigger)
                .delete(api::events::delete_event_trigger),
        )
        .route("/api/events", post(api::hooks::ingest_event))
        .route("/api/runs/{run_id}/complete", post(api::hooks::complete_run))
        .route("/hooks/{token}", post(api::hooks::inbound_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(Scalar::with_url("/docs", api::doc::ApiDoc::openapi()))
}
