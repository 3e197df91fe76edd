//! Event triggers: bind schedules to upstream platform events.
//!
//! The external ingestion collaborator posts events to the API; matching
//! triggers (source type + filter predicates, debounce window) map the
//! payload into inputs and call the trigger chokepoint.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::{EventFilter, EventTrigger, EventType, FilterOp};
use crate::payload::lookup_path;

// ── Matching (pure) ──────────────────────────────────────────────────

/// An event delivered by the ingestion collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformEvent {
    pub event_type: EventType,
    pub tenant_id: Uuid,
    /// Delivery id; part of the firing idempotency key when present.
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Whether a trigger's filter predicates all hold for the payload.
pub fn filters_match(filters: &[EventFilter], payload: &serde_json::Value) -> bool {
    filters.iter().all(|f| filter_matches(f, payload))
}

fn filter_matches(filter: &EventFilter, payload: &serde_json::Value) -> bool {
    let Some(actual) = lookup_path(payload, &filter.path) else {
        return false;
    };
    match filter.op {
        FilterOp::Equals => actual == &filter.value,
        FilterOp::Contains => match (actual, &filter.value) {
            (serde_json::Value::String(haystack), serde_json::Value::String(needle)) => {
                haystack.contains(needle.as_str())
            }
            (serde_json::Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
    }
}

/// Whether the debounce window suppresses this firing.
pub fn debounced(trigger: &EventTrigger, now: DateTime<Utc>) -> bool {
    match trigger.last_triggered_at {
        Some(last) if trigger.debounce_secs > 0 => {
            now < last + Duration::seconds(trigger.debounce_secs)
        }
        _ => false,
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Request body for creating/updating an event trigger.
#[derive(Debug, Deserialize)]
pub struct UpsertEventTriggerRequest {
    pub event_type: EventType,
    #[serde(default)]
    pub filters: Vec<EventFilter>,
    #[serde(default)]
    pub field_mapping: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub debounce_secs: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Errors from event trigger store operations.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("event trigger not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EventStoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Database(_) => 500,
        }
    }
}

/// Stateless store for `event_triggers`.
pub struct EventTriggerStore;

impl EventTriggerStore {
    pub async fn create(
        pool: &PgPool,
        tenant_id: Uuid,
        schedule_id: Uuid,
        req: UpsertEventTriggerRequest,
    ) -> Result<EventTrigger, EventStoreError> {
        let row = sqlx::query_as::<_, EventTrigger>(
            "INSERT INTO event_triggers
                (tenant_id, schedule_id, event_type, filters, field_mapping,
                 debounce_secs, enabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .bind(req.event_type.as_str())
        .bind(serde_json::json!(req.filters))
        .bind(serde_json::json!(req.field_mapping))
        .bind(req.debounce_secs.max(0))
        .bind(req.enabled)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<EventTrigger>, EventStoreError> {
        let row = sqlx::query_as::<_, EventTrigger>(
            "SELECT * FROM event_triggers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn list_for_schedule(
        pool: &PgPool,
        schedule_id: Uuid,
    ) -> Result<Vec<EventTrigger>, EventStoreError> {
        let rows = sqlx::query_as::<_, EventTrigger>(
            "SELECT * FROM event_triggers WHERE schedule_id = $1 ORDER BY created_at",
        )
        .bind(schedule_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Enabled triggers for one tenant + event class, for ingestion fan-out.
    pub async fn list_candidates(
        pool: &PgPool,
        tenant_id: Uuid,
        event_type: EventType,
    ) -> Result<Vec<EventTrigger>, EventStoreError> {
        let rows = sqlx::query_as::<_, EventTrigger>(
            "SELECT * FROM event_triggers
             WHERE tenant_id = $1 AND event_type = $2 AND enabled = TRUE",
        )
        .bind(tenant_id)
        .bind(event_type.as_str())
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        req: UpsertEventTriggerRequest,
    ) -> Result<EventTrigger, EventStoreError> {
        let row = sqlx::query_as::<_, EventTrigger>(
            "UPDATE event_triggers SET
                event_type = $2,
                filters = $3,
                field_mapping = $4,
                debounce_secs = $5,
                enabled = $6,
                updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(req.event_type.as_str())
        .bind(serde_json::json!(req.filters))
        .bind(serde_json::json!(req.field_mapping))
        .bind(req.debounce_secs.max(0))
        .bind(req.enabled)
        .fetch_optional(pool)
        .await?
        .ok_or(EventStoreError::NotFound(id))?;
        Ok(row)
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), EventStoreError> {
        let result = sqlx::query("DELETE FROM event_triggers WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EventStoreError::NotFound(id));
        }
        Ok(())
    }

    /// Stamp the debounce clock and match counter after a firing.
    pub async fn mark_triggered(
        pool: &PgPool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            "UPDATE event_triggers SET
                last_triggered_at = $2,
                total_matches = total_matches + 1,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(path: &str, op: FilterOp, value: serde_json::Value) -> EventFilter {
        EventFilter {
            path: path.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn equals_and_contains_predicates() {
        let payload = json!({"bot": {"name": "invoicer"}, "tags": ["prod", "eu"]});

        assert!(filters_match(
            &[filter("bot.name", FilterOp::Equals, json!("invoicer"))],
            &payload
        ));
        assert!(!filters_match(
            &[filter("bot.name", FilterOp::Equals, json!("other"))],
            &payload
        ));
        assert!(filters_match(
            &[filter("bot.name", FilterOp::Contains, json!("voice"))],
            &payload
        ));
        assert!(filters_match(
            &[filter("tags", FilterOp::Contains, json!("prod"))],
            &payload
        ));
        assert!(!filters_match(
            &[filter("tags", FilterOp::Contains, json!("staging"))],
            &payload
        ));
    }

    #[test]
    fn all_filters_must_hold() {
        let payload = json!({"a": 1, "b": 2});
        let filters = vec![
            filter("a", FilterOp::Equals, json!(1)),
            filter("b", FilterOp::Equals, json!(3)),
        ];
        assert!(!filters_match(&filters, &payload));
    }

    #[test]
    fn missing_path_never_matches() {
        let payload = json!({});
        assert!(!filters_match(
            &[filter("x.y", FilterOp::Equals, json!(null))],
            &payload
        ));
    }

    #[test]
    fn debounce_window_suppresses_rapid_refire() {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut trigger = EventTrigger {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            event_type: "custom".into(),
            filters: json!([]),
            field_mapping: json!({}),
            debounce_secs: 60,
            enabled: true,
            last_triggered_at: Some(now - Duration::seconds(30)),
            total_matches: 0,
            created_at: now,
            updated_at: now,
        };
        assert!(debounced(&trigger, now));

        trigger.last_triggered_at = Some(now - Duration::seconds(90));
        assert!(!debounced(&trigger, now));

        trigger.debounce_secs = 0;
        trigger.last_triggered_at = Some(now);
        assert!(!debounced(&trigger, now));
    }
}
