//! Entity types for schedules, executions, and trigger sources.
//!
//! DB rows keep status/policy discriminators as TEXT and nested
//! configuration as JSONB; typed accessors deserialize the JSON columns
//! into the tagged unions below. Hot fields the tick loop filters or
//! mutates in SQL (status, next_run_at, quota counters, running count)
//! are real columns.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Schedule status ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Draft,
    Active,
    Paused,
    Disabled,
    Expired,
    Error,
    QuotaExceeded,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
            Self::Expired => "expired",
            Self::Error => "error",
            Self::QuotaExceeded => "quota_exceeded",
        }
    }

    /// Parse a DB value. The column carries a CHECK constraint, so unknown
    /// values only appear if the migration and this list drift apart.
    pub fn from_db(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "active" => Self::Active,
            "paused" => Self::Paused,
            "disabled" => Self::Disabled,
            "expired" => Self::Expired,
            "quota_exceeded" => Self::QuotaExceeded,
            _ => Self::Error,
        }
    }
}

// ── Trigger configuration (tagged union) ─────────────────────────────

/// Trigger-type discriminator, mirrored in the `trigger_type` column so
/// the tick loop can filter time-based schedules in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cron,
    Interval,
    Calendar,
    Event,
    Webhook,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::Calendar => "calendar",
            Self::Event => "event",
            Self::Webhook => "webhook",
        }
    }

    /// Whether the tick loop drives this trigger (computes `next_run_at`).
    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::Cron | Self::Interval | Self::Calendar)
    }
}

/// Trigger-specific configuration, tagged by `type`.
///
/// Stored as JSONB in the `trigger_json` column of `schedules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    Cron(CronTrigger),
    Interval(IntervalTrigger),
    Calendar(CalendarTrigger),
    /// Fired by the event-trigger ingestion path; never tick-driven.
    Event,
    /// Fired by inbound webhook calls; never tick-driven.
    Webhook,
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Cron(_) => TriggerType::Cron,
            Self::Interval(_) => TriggerType::Interval,
            Self::Calendar(_) => TriggerType::Calendar,
            Self::Event => TriggerType::Event,
            Self::Webhook => TriggerType::Webhook,
        }
    }
}

/// 5-field cron expression evaluated in an IANA timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronTrigger {
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// Fixed-interval firing anchored at a start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalTrigger {
    /// Minutes between firings (>= 1).
    pub every_minutes: i64,
    /// Anchor for the interval grid; defaults to schedule creation time.
    pub start_at: Option<DateTime<Utc>>,
}

/// Explicit list of firing instants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarTrigger {
    /// Firing instants, not necessarily sorted.
    pub dates: Vec<DateTime<Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

// ── Target selection & execution defaults ────────────────────────────

/// Where a run should execute, passed through to Dispatch as hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSelection {
    /// Named runner pool.
    pub pool: Option<String>,
    /// Pin to a specific runner.
    pub runner_id: Option<Uuid>,
    /// Required runner capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Free-form matching labels.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Defaults applied to every run created from this schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    /// Input values passed to the bot.
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Environment variable overrides.
    #[serde(default)]
    pub environment: serde_json::Map<String, serde_json::Value>,
    /// References to stored credentials (by name).
    #[serde(default)]
    pub credential_refs: Vec<String>,
    /// Run timeout in seconds.
    pub timeout_secs: Option<i64>,
    /// Retry attempts on run failure (Dispatch-side).
    pub max_retries: Option<i32>,
}

// ── Concurrency / overlap ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    Skip,
    Queue,
    Allow,
    CancelPrevious,
    CancelNew,
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        Self::Skip
    }
}

/// Stored as JSONB in `concurrency_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_runs: i32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            overlap_policy: OverlapPolicy::Skip,
            max_concurrent_runs: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> i32 {
    1
}

// ── Catchup ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchupPolicy {
    None,
    One,
    All,
    Latest,
}

impl Default for CatchupPolicy {
    fn default() -> Self {
        Self::None
    }
}

/// Stored as JSONB in `catchup_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchupConfig {
    #[serde(default)]
    pub policy: CatchupPolicy,
    /// Only slots missed within this window are considered.
    #[serde(default = "default_catchup_window")]
    pub window_secs: i64,
    /// Upper bound on replayed firings for `all`.
    #[serde(default = "default_max_catchup")]
    pub max_catchup_runs: i32,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            policy: CatchupPolicy::None,
            window_secs: default_catchup_window(),
            max_catchup_runs: default_max_catchup(),
        }
    }
}

fn default_catchup_window() -> i64 {
    3600
}

fn default_max_catchup() -> i32 {
    10
}

// ── Blackout windows ─────────────────────────────────────────────────

/// A time-of-day range during which the schedule must not fire.
/// Overnight ranges (start > end, e.g. 22:00-06:00) wrap midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackoutWindow {
    pub name: String,
    /// "HH:MM", inclusive.
    pub start_time: String,
    /// "HH:MM", exclusive.
    pub end_time: String,
    /// Weekdays the window applies to (0=Sunday..6), all days if empty.
    #[serde(default)]
    pub days_of_week: Option<Vec<u8>>,
    /// Optional one-off date range the window is confined to.
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    /// Timezone the times are interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

// ── Quota limits ─────────────────────────────────────────────────────

/// Per-granularity firing caps. Stored as JSONB in `quota_json`; the
/// rolling counters themselves are columns so they can be bumped with
/// single-statement SQL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_per_hour: Option<i64>,
    pub max_per_day: Option<i64>,
    pub max_per_week: Option<i64>,
    pub max_per_month: Option<i64>,
    /// Lifetime cap across all firings.
    pub max_total: Option<i64>,
}

impl QuotaLimits {
    pub fn is_unlimited(&self) -> bool {
        self.max_per_hour.is_none()
            && self.max_per_day.is_none()
            && self.max_per_week.is_none()
            && self.max_per_month.is_none()
            && self.max_total.is_none()
    }
}

// ── SLA / alerting ───────────────────────────────────────────────────

/// Stored as JSONB in `sla_json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Alert when a run exceeds this duration.
    pub max_duration_secs: Option<i64>,
    /// Alert after this many consecutive failures.
    pub alert_after_failures: Option<i32>,
    /// Alert after this many consecutive skips.
    pub alert_after_skips: Option<i32>,
    /// Webhook URL notified on SLA breach.
    pub alert_webhook_url: Option<String>,
}

// ── Schedule row ─────────────────────────────────────────────────────

/// One row of the `schedules` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Schedule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub bot_id: Uuid,
    /// Pinned bot version; ignored when `use_latest_version` is set.
    pub bot_version: Option<String>,
    pub use_latest_version: bool,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub trigger_type: String,
    pub trigger_json: serde_json::Value,
    pub target_json: serde_json::Value,
    pub defaults_json: serde_json::Value,
    pub concurrency_json: serde_json::Value,
    pub catchup_json: serde_json::Value,
    pub blackout_json: serde_json::Value,
    pub quota_json: serde_json::Value,
    pub sla_json: Option<serde_json::Value>,
    pub priority: i32,

    // Concurrency state.
    pub current_running_count: i32,
    pub active_run_ids: Vec<Uuid>,

    // Rolling quota counters (window starts stored alongside).
    pub runs_this_hour: i64,
    pub hour_window_start: Option<DateTime<Utc>>,
    pub runs_today: i64,
    pub day_window_start: Option<DateTime<Utc>>,
    pub runs_this_week: i64,
    pub week_window_start: Option<DateTime<Utc>>,
    pub runs_this_month: i64,
    pub month_window_start: Option<DateTime<Utc>>,
    pub total_runs: i64,

    // Validity window.
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
    pub auto_disable_on_expiry: bool,

    // Rolling statistics.
    pub total_successes: i64,
    pub total_failures: i64,
    pub total_skips: i64,
    pub consecutive_failures: i32,
    pub consecutive_skips: i32,
    pub avg_duration_ms: Option<f64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,

    // Auto-pause / auto-resume.
    pub auto_pause_on_failure: bool,
    pub auto_pause_after_failures: i32,
    pub auto_paused_at: Option<DateTime<Utc>>,
    pub auto_resume_enabled: bool,
    pub auto_resume_after_secs: i64,
    pub auto_resume_at: Option<DateTime<Utc>>,

    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn status(&self) -> ScheduleStatus {
        ScheduleStatus::from_db(&self.status)
    }

    pub fn is_active(&self) -> bool {
        self.status() == ScheduleStatus::Active
    }

    /// Deserialize the stored `trigger_json` into a typed [`TriggerConfig`].
    pub fn trigger(&self) -> Result<TriggerConfig, serde_json::Error> {
        serde_json::from_value(self.trigger_json.clone())
    }

    pub fn target(&self) -> Result<TargetSelection, serde_json::Error> {
        serde_json::from_value(self.target_json.clone())
    }

    pub fn defaults(&self) -> Result<ExecutionDefaults, serde_json::Error> {
        serde_json::from_value(self.defaults_json.clone())
    }

    pub fn concurrency(&self) -> ConcurrencyConfig {
        serde_json::from_value(self.concurrency_json.clone()).unwrap_or_default()
    }

    pub fn catchup(&self) -> CatchupConfig {
        serde_json::from_value(self.catchup_json.clone()).unwrap_or_default()
    }

    pub fn blackouts(&self) -> Vec<BlackoutWindow> {
        serde_json::from_value(self.blackout_json.clone()).unwrap_or_default()
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        serde_json::from_value(self.quota_json.clone()).unwrap_or_default()
    }

    pub fn sla(&self) -> Option<SlaConfig> {
        self.sla_json
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Snapshot of the rolling quota counters for policy evaluation.
    pub fn quota_counters(&self) -> QuotaCounters {
        QuotaCounters {
            runs_this_hour: self.runs_this_hour,
            hour_window_start: self.hour_window_start,
            runs_today: self.runs_today,
            day_window_start: self.day_window_start,
            runs_this_week: self.runs_this_week,
            week_window_start: self.week_window_start,
            runs_this_month: self.runs_this_month,
            month_window_start: self.month_window_start,
            total_runs: self.total_runs,
        }
    }

    /// Whether `effective_until` has elapsed.
    pub fn is_past_validity(&self, now: DateTime<Utc>) -> bool {
        self.effective_until.map(|u| now >= u).unwrap_or(false)
    }

    /// Whether `effective_from` is still in the future.
    pub fn is_before_validity(&self, now: DateTime<Utc>) -> bool {
        self.effective_from.map(|f| now < f).unwrap_or(false)
    }
}

/// Rolling quota counter snapshot, decoupled from the row for testing.
#[derive(Debug, Clone, Default)]
pub struct QuotaCounters {
    pub runs_this_hour: i64,
    pub hour_window_start: Option<DateTime<Utc>>,
    pub runs_today: i64,
    pub day_window_start: Option<DateTime<Utc>>,
    pub runs_this_week: i64,
    pub week_window_start: Option<DateTime<Utc>>,
    pub runs_this_month: i64,
    pub month_window_start: Option<DateTime<Utc>>,
    pub total_runs: i64,
}

// ── Executions ───────────────────────────────────────────────────────

/// Terminal and in-flight states of one firing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Triggered,
    Completed,
    Cancelled,
    SkippedOverlap,
    SkippedBlackout,
    SkippedQuota,
    SkippedDisabled,
    SkippedPaused,
    SkippedError,
    Failed,
    Catchup,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Triggered => "triggered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::SkippedOverlap => "skipped_overlap",
            Self::SkippedBlackout => "skipped_blackout",
            Self::SkippedQuota => "skipped_quota",
            Self::SkippedDisabled => "skipped_disabled",
            Self::SkippedPaused => "skipped_paused",
            Self::SkippedError => "skipped_error",
            Self::Failed => "failed",
            Self::Catchup => "catchup",
        }
    }

    /// Policy skips are terminal statuses, not errors.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::SkippedOverlap
                | Self::SkippedBlackout
                | Self::SkippedQuota
                | Self::SkippedDisabled
                | Self::SkippedPaused
                | Self::SkippedError
        )
    }
}

/// Where a firing attempt originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Tick,
    Manual,
    Webhook,
    Event,
    Catchup,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Manual => "manual",
            Self::Webhook => "webhook",
            Self::Event => "event",
            Self::Catchup => "catchup",
        }
    }
}

/// One row of the append-only `schedule_executions` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScheduleExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub schedule_id: Uuid,
    pub status: String,
    /// The slot this firing was due at (idempotency key component).
    pub scheduled_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Downstream run created by Dispatch, when one exists.
    pub run_id: Option<Uuid>,
    pub trigger_source: String,
    /// Caller-supplied context (idempotency key component).
    pub trigger_context: String,
    pub skip_reason: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Webhook triggers ─────────────────────────────────────────────────

/// One row of the `webhook_triggers` table. The bearer token is stored
/// only as a SHA-256 hash; the plaintext is returned once on creation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookTrigger {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub schedule_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    /// First 8 characters of the token, for display.
    pub token_prefix: String,
    #[serde(skip_serializing)]
    pub hmac_secret: Option<String>,
    pub require_signature: bool,
    pub allowed_ips: serde_json::Value,
    pub required_headers: serde_json::Value,
    pub payload_rule: serde_json::Value,
    pub field_mapping: serde_json::Value,
    pub max_calls_per_minute: Option<i32>,
    pub max_calls_per_hour: Option<i32>,
    pub calls_this_minute: i32,
    pub minute_window_start: Option<DateTime<Utc>>,
    pub calls_this_hour: i32,
    pub hour_window_start: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_total_calls: Option<i64>,
    pub total_calls: i64,
    pub enabled: bool,
    pub last_called_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookTrigger {
    pub fn allowed_ips(&self) -> Vec<String> {
        serde_json::from_value(self.allowed_ips.clone()).unwrap_or_default()
    }

    pub fn required_headers(&self) -> std::collections::HashMap<String, String> {
        serde_json::from_value(self.required_headers.clone()).unwrap_or_default()
    }

    /// Payload fields that must be present for the call to be accepted.
    pub fn required_payload_fields(&self) -> Vec<String> {
        #[derive(Deserialize)]
        struct Rule {
            #[serde(default)]
            required_fields: Vec<String>,
        }
        serde_json::from_value::<Rule>(self.payload_rule.clone())
            .map(|r| r.required_fields)
            .unwrap_or_default()
    }

    /// payload field -> schedule input name mapping.
    pub fn field_mapping(&self) -> std::collections::HashMap<String, String> {
        serde_json::from_value(self.field_mapping.clone()).unwrap_or_default()
    }
}

// ── Event triggers ───────────────────────────────────────────────────

/// Upstream event classes a schedule can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BotCompleted,
    BotFailed,
    FileEvent,
    EmailReceived,
    QueueMessage,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotCompleted => "bot_completed",
            Self::BotFailed => "bot_failed",
            Self::FileEvent => "file_event",
            Self::EmailReceived => "email_received",
            Self::QueueMessage => "queue_message",
            Self::Custom => "custom",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "bot_completed" => Some(Self::BotCompleted),
            "bot_failed" => Some(Self::BotFailed),
            "file_event" => Some(Self::FileEvent),
            "email_received" => Some(Self::EmailReceived),
            "queue_message" => Some(Self::QueueMessage),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Predicate over the event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFilter {
    /// Dot-separated path into the payload (e.g. "bot.name").
    pub path: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equals,
    Contains,
}

/// One row of the `event_triggers` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventTrigger {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub schedule_id: Uuid,
    pub event_type: String,
    pub filters: serde_json::Value,
    pub field_mapping: serde_json::Value,
    /// Minimum seconds between two firings from this trigger.
    pub debounce_secs: i64,
    pub enabled: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub total_matches: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventTrigger {
    pub fn filters(&self) -> Vec<EventFilter> {
        serde_json::from_value(self.filters.clone()).unwrap_or_default()
    }

    pub fn field_mapping(&self) -> std::collections::HashMap<String, String> {
        serde_json::from_value(self.field_mapping.clone()).unwrap_or_default()
    }
}

// ── Chokepoint result ────────────────────────────────────────────────

/// Outcome of one trigger-processing call, returned to every caller
/// (tick loop, webhook, event ingestion, manual trigger).
#[derive(Debug, Clone, Serialize)]
pub struct TriggerResult {
    pub schedule_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub triggered_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_config_round_trips_through_tagged_json() {
        let cfg = TriggerConfig::Cron(CronTrigger {
            expression: "0 9 * * 1-5".into(),
            timezone: "UTC".into(),
        });
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(v["type"], "cron");
        let back: TriggerConfig = serde_json::from_value(v).unwrap();
        assert_eq!(back.trigger_type(), TriggerType::Cron);
    }

    #[test]
    fn status_db_mapping_is_total() {
        for s in [
            ScheduleStatus::Draft,
            ScheduleStatus::Active,
            ScheduleStatus::Paused,
            ScheduleStatus::Disabled,
            ScheduleStatus::Expired,
            ScheduleStatus::Error,
            ScheduleStatus::QuotaExceeded,
        ] {
            assert_eq!(ScheduleStatus::from_db(s.as_str()), s);
        }
    }

    #[test]
    fn time_based_trigger_classification() {
        assert!(TriggerType::Cron.is_time_based());
        assert!(TriggerType::Interval.is_time_based());
        assert!(TriggerType::Calendar.is_time_based());
        assert!(!TriggerType::Event.is_time_based());
        assert!(!TriggerType::Webhook.is_time_based());
    }
}
