//! Wire-contract tests for the management API.
//!
//! Since `botsched-server` is a binary crate (no lib.rs), handler-local
//! request bodies are validated through mirror types; everything the API
//! shares with `botsched-engine` is exercised through the real types.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use botsched_engine::events::{PlatformEvent, UpsertEventTriggerRequest};
use botsched_engine::model::{
    EventType, ExecutionStatus, TriggerConfig, TriggerResult, TriggerSource, WebhookTrigger,
};

// ── Mirror types matching handler-local request bodies ────────────────

/// Mirrors `ManualTriggerRequest` in api/schedules.rs.
#[derive(Debug, Serialize, Deserialize)]
struct ManualTriggerBody {
    #[serde(default)]
    inputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    ignore_blackout: bool,
    #[serde(default)]
    ignore_quota: bool,
}

/// Mirrors `ResumeRequest` in api/schedules.rs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ResumeBody {
    #[serde(default)]
    catchup: bool,
    #[serde(default)]
    fire_now: bool,
}

/// Mirrors `RunCompletionRequest` in api/hooks.rs.
#[derive(Debug, Serialize, Deserialize)]
struct RunCompletionBody {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[test]
fn manual_trigger_body_fields_are_optional() {
    let parsed: ManualTriggerBody = serde_json::from_str("{}").unwrap();
    assert!(parsed.inputs.is_empty());
    assert!(!parsed.ignore_blackout);
    assert!(!parsed.ignore_quota);

    let parsed: ManualTriggerBody = serde_json::from_value(json!({
        "inputs": {"region": "eu"},
        "ignore_blackout": true,
    }))
    .unwrap();
    assert_eq!(parsed.inputs["region"], "eu");
    assert!(parsed.ignore_blackout);
    assert!(!parsed.ignore_quota);
}

#[test]
fn resume_body_defaults_to_plain_resume() {
    let parsed: ResumeBody = serde_json::from_str("{}").unwrap();
    assert!(!parsed.catchup);
    assert!(!parsed.fire_now);

    let parsed: ResumeBody =
        serde_json::from_value(json!({"catchup": true, "fire_now": true})).unwrap();
    assert!(parsed.catchup);
    assert!(parsed.fire_now);
}

#[test]
fn run_completion_body_roundtrip() {
    let parsed: RunCompletionBody =
        serde_json::from_value(json!({"success": false, "error": "runner OOM"})).unwrap();
    assert!(!parsed.success);
    assert_eq!(parsed.error.as_deref(), Some("runner OOM"));

    let parsed: RunCompletionBody = serde_json::from_value(json!({"success": true})).unwrap();
    assert!(parsed.success);
    assert!(parsed.error.is_none());
}

// ── Engine types crossing the API boundary ────────────────────────────

#[test]
fn platform_event_parses_with_minimal_body() {
    let event: PlatformEvent = serde_json::from_value(json!({
        "event_type": "bot_completed",
        "tenant_id": Uuid::new_v4(),
    }))
    .unwrap();
    assert_eq!(event.event_type, EventType::BotCompleted);
    assert!(event.event_id.is_none());
    assert_eq!(event.payload, json!(null));

    let event: PlatformEvent = serde_json::from_value(json!({
        "event_type": "file_event",
        "tenant_id": Uuid::new_v4(),
        "event_id": Uuid::new_v4(),
        "payload": {"path": "/inbox/report.csv"},
    }))
    .unwrap();
    assert_eq!(event.event_type, EventType::FileEvent);
    assert!(event.event_id.is_some());
    assert_eq!(event.payload["path"], "/inbox/report.csv");
}

#[test]
fn event_trigger_upsert_defaults() {
    let req: UpsertEventTriggerRequest =
        serde_json::from_value(json!({"event_type": "custom"})).unwrap();
    assert_eq!(req.event_type, EventType::Custom);
    assert!(req.filters.is_empty());
    assert!(req.field_mapping.is_empty());
    assert_eq!(req.debounce_secs, 0);
    assert!(req.enabled);
}

#[test]
fn trigger_result_omits_empty_fields() {
    let result = TriggerResult {
        schedule_id: Uuid::new_v4(),
        execution_id: Some(Uuid::new_v4()),
        run_id: None,
        triggered_at: chrono::Utc::now(),
        status: ExecutionStatus::SkippedBlackout,
        skip_reason: Some("blackout window 'nightly-maintenance'".into()),
        error_message: None,
    };
    let v = serde_json::to_value(&result).unwrap();
    assert_eq!(v["status"], "skipped_blackout");
    assert!(v.get("error_message").is_none());
    assert!(v["skip_reason"].as_str().unwrap().contains("blackout"));
}

#[test]
fn trigger_config_rejects_unknown_type_tag() {
    let err = serde_json::from_value::<TriggerConfig>(json!({
        "type": "lunar",
        "expression": "* * * * *",
    }));
    assert!(err.is_err(), "unknown trigger type must not parse");

    let cfg: TriggerConfig = serde_json::from_value(json!({
        "type": "interval",
        "every_minutes": 15,
        "start_at": null,
    }))
    .unwrap();
    assert!(matches!(cfg, TriggerConfig::Interval(_)));
}

#[test]
fn trigger_source_wire_names() {
    for (source, wire) in [
        (TriggerSource::Tick, "tick"),
        (TriggerSource::Manual, "manual"),
        (TriggerSource::Webhook, "webhook"),
        (TriggerSource::Event, "event"),
        (TriggerSource::Catchup, "catchup"),
    ] {
        assert_eq!(serde_json::to_value(source).unwrap(), json!(wire));
        assert_eq!(source.as_str(), wire);
    }
}

#[test]
fn webhook_trigger_never_serializes_secrets() {
    let now = chrono::Utc::now();
    let trigger = WebhookTrigger {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        schedule_id: Uuid::new_v4(),
        token_hash: "deadbeef".into(),
        token_prefix: "a1b2c3d4".into(),
        hmac_secret: Some("topsecret".into()),
        require_signature: true,
        allowed_ips: json!([]),
        required_headers: json!({}),
        payload_rule: json!({}),
        field_mapping: json!({}),
        max_calls_per_minute: Some(10),
        max_calls_per_hour: None,
        calls_this_minute: 0,
        minute_window_start: None,
        calls_this_hour: 0,
        hour_window_start: None,
        expires_at: None,
        max_total_calls: None,
        total_calls: 0,
        enabled: true,
        last_called_at: None,
        created_at: now,
        updated_at: now,
    };
    let v = serde_json::to_value(&trigger).unwrap();
    assert!(v.get("token_hash").is_none());
    assert!(v.get("hmac_secret").is_none());
    assert_eq!(v["token_prefix"], "a1b2c3d4");
}
