//! Webhook trigger storage and request verification.
//!
//! Verification order is fixed: token → IP allow-list → required headers
//! → HMAC signature → per-minute budget → per-hour budget → expiry →
//! max-calls cap → payload validation. A rejected call never reaches the
//! trigger chokepoint and never bumps `calls_this_minute` past its cap
//! (the counter bump is a guarded single-statement CAS).

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::WebhookTrigger;
use crate::policy::{window_start, QuotaGranularity};

// ── Rejections ───────────────────────────────────────────────────────

/// Why an inbound webhook call was refused. Returned to the caller;
/// never recorded as a schedule error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookRejection {
    #[error("unknown webhook token")]
    UnknownToken,

    #[error("webhook trigger is disabled")]
    Disabled,

    #[error("caller IP not in allow-list")]
    IpNotAllowed,

    #[error("missing required header: {0}")]
    MissingHeader(String),

    #[error("header {0} has unexpected value")]
    HeaderMismatch(String),

    #[error("signature required but missing")]
    MissingSignature,

    #[error("signature verification failed")]
    BadSignature,

    #[error("per-minute rate limit exceeded")]
    RateLimitedMinute,

    #[error("per-hour rate limit exceeded")]
    RateLimitedHour,

    #[error("webhook trigger expired")]
    Expired,

    #[error("webhook call cap reached")]
    CallCapReached,

    #[error("payload invalid: missing field {0}")]
    PayloadInvalid(String),
}

impl WebhookRejection {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownToken | Self::BadSignature | Self::MissingSignature => 401,
            Self::Disabled | Self::IpNotAllowed | Self::Expired | Self::CallCapReached => 403,
            Self::MissingHeader(_) | Self::HeaderMismatch(_) | Self::PayloadInvalid(_) => 400,
            Self::RateLimitedMinute | Self::RateLimitedHour => 429,
        }
    }
}

// ── Verification (pure) ──────────────────────────────────────────────

/// The parts of an inbound HTTP call the verification chain inspects.
#[derive(Debug)]
pub struct InboundCall<'a> {
    pub remote_ip: Option<&'a str>,
    pub headers: &'a HashMap<String, String>,
    /// Value of the signature header (e.g. "sha256=<hex>"), if present.
    pub signature: Option<&'a str>,
    pub raw_body: &'a [u8],
    pub payload: &'a serde_json::Value,
}

/// Run the static verification chain (everything except the rate/usage
/// counters, which need the CAS bump). Order matters and is observable
/// through which rejection the caller sees first.
pub fn verify_call(
    trigger: &WebhookTrigger,
    call: &InboundCall<'_>,
    now: DateTime<Utc>,
) -> Result<(), WebhookRejection> {
    if !trigger.enabled {
        return Err(WebhookRejection::Disabled);
    }

    let allowed_ips = trigger.allowed_ips();
    if !allowed_ips.is_empty() {
        match call.remote_ip {
            Some(ip) if allowed_ips.iter().any(|a| a == ip) => {}
            _ => return Err(WebhookRejection::IpNotAllowed),
        }
    }

    for (name, expected) in trigger.required_headers() {
        match call.headers.get(&name.to_lowercase()) {
            None => return Err(WebhookRejection::MissingHeader(name)),
            Some(actual) if !expected.is_empty() && actual != &expected => {
                return Err(WebhookRejection::HeaderMismatch(name))
            }
            Some(_) => {}
        }
    }

    if trigger.require_signature {
        let secret = trigger
            .hmac_secret
            .as_deref()
            .ok_or(WebhookRejection::BadSignature)?;
        let signature = call.signature.ok_or(WebhookRejection::MissingSignature)?;
        verify_signature(call.raw_body, signature, secret)?;
    }

    check_budgets(trigger, now)?;

    for field in trigger.required_payload_fields() {
        if crate::payload::lookup_path(call.payload, &field).is_none() {
            return Err(WebhookRejection::PayloadInvalid(field));
        }
    }

    Ok(())
}

/// Rate budgets, expiry, and the lifetime call cap, evaluated over the
/// stored counters. Counters whose window rolled over count as zero.
pub fn check_budgets(trigger: &WebhookTrigger, now: DateTime<Utc>) -> Result<(), WebhookRejection> {
    if let Some(cap) = trigger.max_calls_per_minute {
        let current = match trigger.minute_window_start {
            Some(start) if start >= minute_window(now) => trigger.calls_this_minute,
            _ => 0,
        };
        if current >= cap {
            return Err(WebhookRejection::RateLimitedMinute);
        }
    }
    if let Some(cap) = trigger.max_calls_per_hour {
        let current = match trigger.hour_window_start {
            Some(start) if start >= window_start(QuotaGranularity::Hour, now) => {
                trigger.calls_this_hour
            }
            _ => 0,
        };
        if current >= cap {
            return Err(WebhookRejection::RateLimitedHour);
        }
    }
    if let Some(expiry) = trigger.expires_at {
        if now >= expiry {
            return Err(WebhookRejection::Expired);
        }
    }
    if let Some(cap) = trigger.max_total_calls {
        if trigger.total_calls >= cap {
            return Err(WebhookRejection::CallCapReached);
        }
    }
    Ok(())
}

/// Verify a `sha256=<hex>` HMAC-SHA256 signature over the raw body.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Result<(), WebhookRejection> {
    let digest_hex = signature
        .strip_prefix("sha256=")
        .ok_or(WebhookRejection::BadSignature)?;
    let expected = hex::decode(digest_hex).map_err(|_| WebhookRejection::BadSignature)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookRejection::BadSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookRejection::BadSignature)
}

/// Sign a body the way [`verify_signature`] expects (used by tests and
/// by callers that need to document the signing scheme).
pub fn sign_body(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn minute_window(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

// ── Token generation ─────────────────────────────────────────────────

/// Generate a bearer token. The plaintext is returned exactly once; only
/// its SHA-256 hash is stored.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

// ── Store ────────────────────────────────────────────────────────────

/// Request body for creating/updating a webhook trigger.
#[derive(Debug, Default, Deserialize)]
pub struct UpsertWebhookRequest {
    pub hmac_secret: Option<String>,
    #[serde(default)]
    pub require_signature: bool,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub required_headers: HashMap<String, String>,
    #[serde(default)]
    pub required_payload_fields: Vec<String>,
    #[serde(default)]
    pub field_mapping: HashMap<String, String>,
    pub max_calls_per_minute: Option<i32>,
    pub max_calls_per_hour: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_total_calls: Option<i64>,
}

/// Errors from webhook trigger store operations.
#[derive(Debug, thiserror::Error)]
pub enum WebhookStoreError {
    #[error("webhook trigger not found for schedule {0}")]
    NotFound(Uuid),

    #[error("schedule {0} already has a webhook trigger")]
    AlreadyExists(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl WebhookStoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::Database(_) => 500,
        }
    }
}

/// Stateless store for `webhook_triggers`.
pub struct WebhookStore;

impl WebhookStore {
    /// Create the 1:1 webhook trigger for a schedule. Returns the row and
    /// the plaintext token — the only time the token is available.
    pub async fn create(
        pool: &PgPool,
        tenant_id: Uuid,
        schedule_id: Uuid,
        req: UpsertWebhookRequest,
    ) -> Result<(WebhookTrigger, String), WebhookStoreError> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let token_prefix = token[..8].to_string();

        let payload_rule = serde_json::json!({ "required_fields": req.required_payload_fields });

        let result = sqlx::query_as::<_, WebhookTrigger>(
            "INSERT INTO webhook_triggers
                (tenant_id, schedule_id, token_hash, token_prefix, hmac_secret,
                 require_signature, allowed_ips, required_headers, payload_rule,
                 field_mapping, max_calls_per_minute, max_calls_per_hour,
                 expires_at, max_total_calls)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING *",
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .bind(&token_hash)
        .bind(&token_prefix)
        .bind(&req.hmac_secret)
        .bind(req.require_signature)
        .bind(serde_json::json!(req.allowed_ips))
        .bind(serde_json::json!(req.required_headers))
        .bind(payload_rule)
        .bind(serde_json::json!(req.field_mapping))
        .bind(req.max_calls_per_minute)
        .bind(req.max_calls_per_hour)
        .bind(req.expires_at)
        .bind(req.max_total_calls)
        .fetch_one(pool)
        .await;

        match result {
            Ok(row) => Ok((row, token)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(WebhookStoreError::AlreadyExists(schedule_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_for_schedule(
        pool: &PgPool,
        schedule_id: Uuid,
    ) -> Result<Option<WebhookTrigger>, WebhookStoreError> {
        let row = sqlx::query_as::<_, WebhookTrigger>(
            "SELECT * FROM webhook_triggers WHERE schedule_id = $1",
        )
        .bind(schedule_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Look up by plaintext token (hashed before the query).
    pub async fn get_by_token(
        pool: &PgPool,
        token: &str,
    ) -> Result<Option<WebhookTrigger>, WebhookStoreError> {
        let row = sqlx::query_as::<_, WebhookTrigger>(
            "SELECT * FROM webhook_triggers WHERE token_hash = $1",
        )
        .bind(hash_token(token))
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Update policy fields. The token is never touched here.
    pub async fn update(
        pool: &PgPool,
        schedule_id: Uuid,
        req: UpsertWebhookRequest,
    ) -> Result<WebhookTrigger, WebhookStoreError> {
        let payload_rule = serde_json::json!({ "required_fields": req.required_payload_fields });
        let row = sqlx::query_as::<_, WebhookTrigger>(
            "UPDATE webhook_triggers SET
                hmac_secret = COALESCE($2, hmac_secret),
                require_signature = $3,
                allowed_ips = $4,
                required_headers = $5,
                payload_rule = $6,
                field_mapping = $7,
                max_calls_per_minute = $8,
                max_calls_per_hour = $9,
                expires_at = $10,
                max_total_calls = $11,
                updated_at = now()
             WHERE schedule_id = $1
             RETURNING *",
        )
        .bind(schedule_id)
        .bind(&req.hmac_secret)
        .bind(req.require_signature)
        .bind(serde_json::json!(req.allowed_ips))
        .bind(serde_json::json!(req.required_headers))
        .bind(payload_rule)
        .bind(serde_json::json!(req.field_mapping))
        .bind(req.max_calls_per_minute)
        .bind(req.max_calls_per_hour)
        .bind(req.expires_at)
        .bind(req.max_total_calls)
        .fetch_optional(pool)
        .await?
        .ok_or(WebhookStoreError::NotFound(schedule_id))?;
        Ok(row)
    }

    /// Revoke the trigger. The token is not re-derivable, so revocation
    /// deletes the row outright.
    pub async fn revoke(pool: &PgPool, schedule_id: Uuid) -> Result<(), WebhookStoreError> {
        let result = sqlx::query("DELETE FROM webhook_triggers WHERE schedule_id = $1")
            .bind(schedule_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WebhookStoreError::NotFound(schedule_id));
        }
        Ok(())
    }

    /// Consume one call from the rate budgets. Guarded single-statement
    /// CAS: when any budget is already at its cap for the current window
    /// no row is updated and the call must be rejected, so the counters
    /// can never exceed their caps even under concurrent delivery.
    pub async fn consume_call(
        pool: &PgPool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, WebhookStoreError> {
        let minute_ws = minute_window(now);
        let hour_ws = window_start(QuotaGranularity::Hour, now);

        let result = sqlx::query(
            "UPDATE webhook_triggers SET
                calls_this_minute = CASE WHEN minute_window_start IS NULL OR minute_window_start < $2
                                         THEN 1 ELSE calls_this_minute + 1 END,
                minute_window_start = GREATEST(COALESCE(minute_window_start, $2), $2),
                calls_this_hour = CASE WHEN hour_window_start IS NULL OR hour_window_start < $3
                                       THEN 1 ELSE calls_this_hour + 1 END,
                hour_window_start = GREATEST(COALESCE(hour_window_start, $3), $3),
                total_calls = total_calls + 1,
                last_called_at = $4,
                updated_at = now()
             WHERE id = $1
               AND (max_calls_per_minute IS NULL
                    OR minute_window_start IS NULL OR minute_window_start < $2
                    OR calls_this_minute < max_calls_per_minute)
               AND (max_calls_per_hour IS NULL
                    OR hour_window_start IS NULL OR hour_window_start < $3
                    OR calls_this_hour < max_calls_per_hour)
               AND (max_total_calls IS NULL OR total_calls < max_total_calls)",
        )
        .bind(id)
        .bind(minute_ws)
        .bind(hour_ws)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn trigger() -> WebhookTrigger {
        WebhookTrigger {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            token_hash: hash_token("secret-token"),
            token_prefix: "secret-t".into(),
            hmac_secret: None,
            require_signature: false,
            allowed_ips: serde_json::json!([]),
            required_headers: serde_json::json!({}),
            payload_rule: serde_json::json!({}),
            field_mapping: serde_json::json!({}),
            max_calls_per_minute: None,
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn call<'a>(
        headers: &'a HashMap<String, String>,
        payload: &'a serde_json::Value,
    ) -> InboundCall<'a> {
        InboundCall {
            remote_ip: Some("10.0.0.1"),
            headers,
            signature: None,
            raw_body: b"{}",
            payload,
        }
    }

    #[test]
    fn sixth_call_in_same_minute_is_rejected() {
        let mut t = trigger();
        t.max_calls_per_minute = Some(5);
        let now = utc(2025, 3, 10, 12, 0, 30);
        t.calls_this_minute = 5;
        t.minute_window_start = Some(utc(2025, 3, 10, 12, 0, 0));
        assert_eq!(
            check_budgets(&t, now),
            Err(WebhookRejection::RateLimitedMinute)
        );

        // Next minute: budget replenished.
        assert_eq!(check_budgets(&t, utc(2025, 3, 10, 12, 1, 5)), Ok(()));
    }

    #[test]
    fn hourly_budget_checked_after_minute_budget() {
        let mut t = trigger();
        t.max_calls_per_hour = Some(10);
        t.calls_this_hour = 10;
        t.hour_window_start = Some(utc(2025, 3, 10, 12, 0, 0));
        assert_eq!(
            check_budgets(&t, utc(2025, 3, 10, 12, 30, 0)),
            Err(WebhookRejection::RateLimitedHour)
        );
    }

    #[test]
    fn expired_and_capped_triggers_are_rejected() {
        let mut t = trigger();
        t.expires_at = Some(utc(2025, 1, 1, 0, 0, 0));
        assert_eq!(
            check_budgets(&t, utc(2025, 2, 1, 0, 0, 0)),
            Err(WebhookRejection::Expired)
        );

        let mut t = trigger();
        t.max_total_calls = Some(100);
        t.total_calls = 100;
        assert_eq!(
            check_budgets(&t, Utc::now()),
            Err(WebhookRejection::CallCapReached)
        );
    }

    #[test]
    fn ip_allow_list_is_enforced() {
        let mut t = trigger();
        t.allowed_ips = serde_json::json!(["192.168.1.1"]);
        let headers = HashMap::new();
        let payload = serde_json::json!({});
        let c = call(&headers, &payload);
        assert_eq!(
            verify_call(&t, &c, Utc::now()),
            Err(WebhookRejection::IpNotAllowed)
        );

        t.allowed_ips = serde_json::json!(["10.0.0.1"]);
        assert_eq!(verify_call(&t, &c, Utc::now()), Ok(()));
    }

    #[test]
    fn required_headers_and_payload_fields() {
        let mut t = trigger();
        t.required_headers = serde_json::json!({"X-Source": ""});
        let headers = HashMap::new();
        let payload = serde_json::json!({});
        assert!(matches!(
            verify_call(&t, &call(&headers, &payload), Utc::now()),
            Err(WebhookRejection::MissingHeader(_))
        ));

        let headers = HashMap::from([("x-source".to_string(), "erp".to_string())]);
        assert_eq!(verify_call(&t, &call(&headers, &payload), Utc::now()), Ok(()));

        t.payload_rule = serde_json::json!({"required_fields": ["order.id"]});
        assert!(matches!(
            verify_call(&t, &call(&headers, &payload), Utc::now()),
            Err(WebhookRejection::PayloadInvalid(_))
        ));
    }

    #[test]
    fn hmac_signature_round_trip() {
        let body = br#"{"order": 1}"#;
        let sig = sign_body(body, "s3cret");
        assert_eq!(verify_signature(body, &sig, "s3cret"), Ok(()));
        assert_eq!(
            verify_signature(body, &sig, "wrong"),
            Err(WebhookRejection::BadSignature)
        );
        assert_eq!(
            verify_signature(b"tampered", &sig, "s3cret"),
            Err(WebhookRejection::BadSignature)
        );
    }

    #[test]
    fn disabled_trigger_rejected_before_anything_else() {
        let mut t = trigger();
        t.enabled = false;
        let headers = HashMap::new();
        let payload = serde_json::json!({});
        assert_eq!(
            verify_call(&t, &call(&headers, &payload), Utc::now()),
            Err(WebhookRejection::Disabled)
        );
    }

    #[test]
    fn token_hash_is_stable_and_token_is_random() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), hash_token(&b));
    }
}
