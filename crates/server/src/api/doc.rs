//! OpenAPI documentation aggregator.
//!
//! Collects all `#[utoipa::path]`-annotated handlers into a single
//! OpenAPI spec, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "botsched API",
        version = "0.1.0",
        description = "Bot scheduling service: time-based, webhook, and event triggers with blackout, quota, overlap, and catchup policies.",
    ),
    tags(
        (name = "Health", description = "Liveness, leadership, and aggregate statistics"),
        (name = "Schedules", description = "Schedule CRUD, lifecycle actions, manual triggering"),
        (name = "Executions", description = "Per-schedule firing history"),
        (name = "Webhooks", description = "Webhook trigger management (token shown once on create)"),
        (name = "Event Triggers", description = "Event trigger CRUD"),
        (name = "Inbound", description = "Webhook firing, event ingestion, run completion callback"),
    ),
    paths(
        crate::api::health::health,
        crate::api::health::stats,
        crate::api::schedules::list_schedules,
        crate::api::schedules::create_schedule,
        crate::api::schedules::get_schedule,
        crate::api::schedules::update_schedule,
        crate::api::schedules::delete_schedule,
        crate::api::schedules::activate_schedule,
        crate::api::schedules::pause_schedule,
        crate::api::schedules::resume_schedule,
        crate::api::schedules::disable_schedule,
        crate::api::schedules::trigger_schedule,
        crate::api::executions::list_executions,
        crate::api::executions::get_execution,
        crate::api::webhooks::create_webhook,
        crate::api::webhooks::get_webhook,
        crate::api::webhooks::update_webhook,
        crate::api::webhooks::revoke_webhook,
        crate::api::events::create_event_trigger,
        crate::api::events::list_event_triggers,
        crate::api::events::update_event_trigger,
        crate::api::events::delete_event_trigger,
        crate::api::hooks::inbound_webhook,
        crate::api::hooks::ingest_event,
        crate::api::hooks::complete_run,
    )
)]
pub struct ApiDoc;
