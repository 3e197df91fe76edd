//! CRUD, lifecycle transitions, and counter mutations for the
//! `schedules` PostgreSQL table.
//!
//! [`ScheduleStore`] is a stateless unit struct with async methods that
//! take a `&PgPool`. Trigger configuration is validated before hitting
//! the database. Counter fields the tick loop and concurrent trigger
//! sources race on (`current_running_count`, quota counters) are only
//! ever mutated with single-statement guarded SQL, never read-modify-
//! write in memory.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::BotCatalog;
use crate::model::{
    BlackoutWindow, CatchupConfig, ConcurrencyConfig, ExecutionDefaults, QuotaLimits, Schedule,
    ScheduleStatus, SlaConfig, TargetSelection, TriggerConfig,
};
use crate::next_run::next_run_for;
use crate::policy::{window_start, QuotaGranularity};

// ── Request types ────────────────────────────────────────────────────

/// Request body for creating a schedule. Created in `draft` unless
/// `activate` is set.
#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub tenant_id: Uuid,
    pub bot_id: Uuid,
    pub bot_version: Option<String>,
    #[serde(default)]
    pub use_latest_version: bool,
    pub name: String,
    pub description: Option<String>,
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub target: TargetSelection,
    #[serde(default)]
    pub defaults: ExecutionDefaults,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub catchup: CatchupConfig,
    #[serde(default)]
    pub blackout_windows: Vec<BlackoutWindow>,
    #[serde(default)]
    pub quota: QuotaLimits,
    pub sla: Option<SlaConfig>,
    #[serde(default)]
    pub priority: i32,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_disable_on_expiry: bool,
    #[serde(default)]
    pub auto_pause_on_failure: bool,
    #[serde(default = "default_auto_pause_after")]
    pub auto_pause_after_failures: i32,
    #[serde(default)]
    pub auto_resume_enabled: bool,
    #[serde(default = "default_auto_resume_secs")]
    pub auto_resume_after_secs: i64,
    /// Activate immediately instead of leaving the schedule in draft.
    #[serde(default)]
    pub activate: bool,
}

fn default_auto_pause_after() -> i32 {
    5
}

fn default_auto_resume_secs() -> i64 {
    3600
}

/// Request body for updating a schedule (all fields optional).
#[derive(Debug, Default, Deserialize)]
pub struct UpdateScheduleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger: Option<TriggerConfig>,
    pub target: Option<TargetSelection>,
    pub defaults: Option<ExecutionDefaults>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub catchup: Option<CatchupConfig>,
    pub blackout_windows: Option<Vec<BlackoutWindow>>,
    pub quota: Option<QuotaLimits>,
    pub sla: Option<SlaConfig>,
    pub priority: Option<i32>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
    pub auto_disable_on_expiry: Option<bool>,
    pub auto_pause_on_failure: Option<bool>,
    pub auto_pause_after_failures: Option<i32>,
    pub auto_resume_enabled: Option<bool>,
    pub auto_resume_after_secs: Option<i64>,
}

/// Query filters for listing schedules.
#[derive(Debug, Default, Deserialize)]
pub struct ListScheduleFilter {
    pub tenant_id: Option<Uuid>,
    pub status: Option<String>,
    pub bot_id: Option<Uuid>,
}

// ── Error type ───────────────────────────────────────────────────────

/// Errors from schedule store operations.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleStoreError {
    #[error("{0}")]
    Validation(String),

    #[error("schedule not found: {0}")]
    NotFound(Uuid),

    #[error("invalid transition: cannot {action} a {status} schedule")]
    InvalidTransition {
        action: &'static str,
        status: &'static str,
    },

    #[error("bot not resolvable: {0}")]
    BotNotResolvable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ScheduleStoreError {
    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::BotNotResolvable(_) => 400,
            Self::NotFound(_) => 404,
            Self::InvalidTransition { .. } => 409,
            Self::Database(_) => 500,
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────

/// Validate a trigger configuration at the API boundary so bad configs
/// never reach the tick loop.
pub fn validate_trigger(trigger: &TriggerConfig) -> Result<(), ScheduleStoreError> {
    match trigger {
        TriggerConfig::Cron(cron) => {
            botsched_cron::CronExpression::parse(&cron.expression, &cron.timezone)
                .map(|_| ())
                .map_err(|e| ScheduleStoreError::Validation(e.to_string()))
        }
        TriggerConfig::Interval(iv) => {
            if iv.every_minutes < 1 {
                return Err(ScheduleStoreError::Validation(format!(
                    "interval must be >= 1 minute, got {}",
                    iv.every_minutes
                )));
            }
            Ok(())
        }
        TriggerConfig::Calendar(cal) => {
            if cal.dates.is_empty() {
                return Err(ScheduleStoreError::Validation(
                    "calendar trigger needs at least one date".into(),
                ));
            }
            Ok(())
        }
        TriggerConfig::Event | TriggerConfig::Webhook => Ok(()),
    }
}

fn compute_next_run(
    trigger: &TriggerConfig,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleStoreError> {
    next_run_for(trigger, after).map_err(|e| ScheduleStoreError::Validation(e.to_string()))
}

fn json(v: &impl serde::Serialize) -> serde_json::Value {
    serde_json::to_value(v).unwrap_or(serde_json::Value::Null)
}

// ── Store ────────────────────────────────────────────────────────────

/// Stateless store for the `schedules` table.
pub struct ScheduleStore;

impl ScheduleStore {
    /// Create a schedule. The bot must resolve in the catalog; unless
    /// `use_latest_version`, the pinned version must be published.
    pub async fn create(
        pool: &PgPool,
        catalog: &dyn BotCatalog,
        req: CreateScheduleRequest,
    ) -> Result<Schedule, ScheduleStoreError> {
        if req.name.trim().is_empty() {
            return Err(ScheduleStoreError::Validation("name must not be empty".into()));
        }
        validate_trigger(&req.trigger)?;

        let resolved = catalog
            .resolve(req.bot_id, req.bot_version.as_deref(), req.use_latest_version)
            .await
            .map_err(|e| ScheduleStoreError::BotNotResolvable(e.to_string()))?;
        if !req.use_latest_version && !resolved.published {
            return Err(ScheduleStoreError::BotNotResolvable(format!(
                "bot {} version {} is not published",
                req.bot_id, resolved.version
            )));
        }

        let now = Utc::now();
        let (status, next_run_at) = if req.activate {
            let next = compute_next_run(&req.trigger, now)?;
            (ScheduleStatus::Active, next)
        } else {
            (ScheduleStatus::Draft, None)
        };

        let row = sqlx::query_as::<_, Schedule>(
            "INSERT INTO schedules (
                tenant_id, bot_id, bot_version, use_latest_version, name, description,
                status, trigger_type, trigger_json, target_json, defaults_json,
                concurrency_json, catchup_json, blackout_json, quota_json, sla_json,
                priority, effective_from, effective_until, auto_disable_on_expiry,
                auto_pause_on_failure, auto_pause_after_failures,
                auto_resume_enabled, auto_resume_after_secs, next_run_at
             ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
             )
             RETURNING *",
        )
        .bind(req.tenant_id)
        .bind(req.bot_id)
        .bind(&req.bot_version)
        .bind(req.use_latest_version)
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(status.as_str())
        .bind(req.trigger.trigger_type().as_str())
        .bind(json(&req.trigger))
        .bind(json(&req.target))
        .bind(json(&req.defaults))
        .bind(json(&req.concurrency))
        .bind(json(&req.catchup))
        .bind(json(&req.blackout_windows))
        .bind(json(&req.quota))
        .bind(req.sla.as_ref().map(json))
        .bind(req.priority)
        .bind(req.effective_from)
        .bind(req.effective_until)
        .bind(req.auto_disable_on_expiry)
        .bind(req.auto_pause_on_failure)
        .bind(req.auto_pause_after_failures)
        .bind(req.auto_resume_enabled)
        .bind(req.auto_resume_after_secs)
        .bind(next_run_at)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    /// Fetch one schedule (soft-deleted rows excluded).
    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Schedule>, ScheduleStoreError> {
        let row = sqlx::query_as::<_, Schedule>(
            "SELECT * FROM schedules WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// List schedules, newest first.
    pub async fn list(
        pool: &PgPool,
        filter: &ListScheduleFilter,
    ) -> Result<Vec<Schedule>, ScheduleStoreError> {
        let rows = sqlx::query_as::<_, Schedule>(
            "SELECT * FROM schedules
             WHERE deleted_at IS NULL
               AND ($1::uuid IS NULL OR tenant_id = $1)
               AND ($2::text IS NULL OR status = $2)
               AND ($3::uuid IS NULL OR bot_id = $3)
             ORDER BY created_at DESC",
        )
        .bind(filter.tenant_id)
        .bind(&filter.status)
        .bind(filter.bot_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Update mutable fields. Recomputes `next_run_at` for active
    /// time-based schedules so a trigger change takes effect on the next
    /// tick.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        req: UpdateScheduleRequest,
    ) -> Result<Schedule, ScheduleStoreError> {
        let existing = Self::get(pool, id)
            .await?
            .ok_or(ScheduleStoreError::NotFound(id))?;

        if let Some(trigger) = &req.trigger {
            validate_trigger(trigger)?;
        }
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                return Err(ScheduleStoreError::Validation("name must not be empty".into()));
            }
        }

        let trigger = match &req.trigger {
            Some(t) => t.clone(),
            None => existing
                .trigger()
                .map_err(|e| ScheduleStoreError::Validation(e.to_string()))?,
        };

        let next_run_at = if existing.status() == ScheduleStatus::Active
            && trigger.trigger_type().is_time_based()
        {
            compute_next_run(&trigger, Utc::now())?
        } else {
            None
        };

        let row = sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                trigger_type = $4,
                trigger_json = $5,
                target_json = COALESCE($6, target_json),
                defaults_json = COALESCE($7, defaults_json),
                concurrency_json = COALESCE($8, concurrency_json),
                catchup_json = COALESCE($9, catchup_json),
                blackout_json = COALESCE($10, blackout_json),
                quota_json = COALESCE($11, quota_json),
                sla_json = COALESCE($12, sla_json),
                priority = COALESCE($13, priority),
                effective_from = COALESCE($14, effective_from),
                effective_until = COALESCE($15, effective_until),
                auto_disable_on_expiry = COALESCE($16, auto_disable_on_expiry),
                auto_pause_on_failure = COALESCE($17, auto_pause_on_failure),
                auto_pause_after_failures = COALESCE($18, auto_pause_after_failures),
                auto_resume_enabled = COALESCE($19, auto_resume_enabled),
                auto_resume_after_secs = COALESCE($20, auto_resume_after_secs),
                next_run_at = $21,
                updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING *",
        )
        .bind(id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.description)
        .bind(trigger.trigger_type().as_str())
        .bind(json(&trigger))
        .bind(req.target.as_ref().map(json))
        .bind(req.defaults.as_ref().map(json))
        .bind(req.concurrency.as_ref().map(json))
        .bind(req.catchup.as_ref().map(json))
        .bind(req.blackout_windows.as_ref().map(json))
        .bind(req.quota.as_ref().map(json))
        .bind(req.sla.as_ref().map(json))
        .bind(req.priority)
        .bind(req.effective_from)
        .bind(req.effective_until)
        .bind(req.auto_disable_on_expiry)
        .bind(req.auto_pause_on_failure)
        .bind(req.auto_pause_after_failures)
        .bind(req.auto_resume_enabled)
        .bind(req.auto_resume_after_secs)
        .bind(next_run_at)
        .fetch_optional(pool)
        .await?
        .ok_or(ScheduleStoreError::NotFound(id))?;

        Ok(row)
    }

    /// Soft delete. Execution history keeps referencing the row.
    pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<(), ScheduleStoreError> {
        let result = sqlx::query(
            "UPDATE schedules SET deleted_at = now(), next_run_at = NULL, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ScheduleStoreError::NotFound(id));
        }
        Ok(())
    }

    // ── Lifecycle transitions ────────────────────────────────────────

    /// draft|paused|disabled|error|quota_exceeded → active. Requires a
    /// resolvable bot version; recomputes `next_run_at`.
    pub async fn activate(
        pool: &PgPool,
        catalog: &dyn BotCatalog,
        id: Uuid,
    ) -> Result<Schedule, ScheduleStoreError> {
        let schedule = Self::get(pool, id)
            .await?
            .ok_or(ScheduleStoreError::NotFound(id))?;

        let status = schedule.status();
        if status == ScheduleStatus::Active {
            return Ok(schedule);
        }
        if status == ScheduleStatus::Expired {
            return Err(ScheduleStoreError::InvalidTransition {
                action: "activate",
                status: "expired",
            });
        }

        let resolved = catalog
            .resolve(
                schedule.bot_id,
                schedule.bot_version.as_deref(),
                schedule.use_latest_version,
            )
            .await
            .map_err(|e| ScheduleStoreError::BotNotResolvable(e.to_string()))?;
        if !schedule.use_latest_version && !resolved.published {
            return Err(ScheduleStoreError::BotNotResolvable(format!(
                "bot {} version {} is not published",
                schedule.bot_id, resolved.version
            )));
        }

        let trigger = schedule
            .trigger()
            .map_err(|e| ScheduleStoreError::Validation(e.to_string()))?;
        let next_run_at = compute_next_run(&trigger, Utc::now())?;

        Self::transition(pool, id, ScheduleStatus::Active, next_run_at).await
    }

    /// active → paused. Clears `next_run_at`.
    pub async fn pause(pool: &PgPool, id: Uuid) -> Result<Schedule, ScheduleStoreError> {
        let schedule = Self::get(pool, id)
            .await?
            .ok_or(ScheduleStoreError::NotFound(id))?;
        if schedule.status() != ScheduleStatus::Active {
            return Err(ScheduleStoreError::InvalidTransition {
                action: "pause",
                status: schedule.status().as_str(),
            });
        }
        Self::transition(pool, id, ScheduleStatus::Paused, None).await
    }

    /// paused → active. Recomputes `next_run_at` and clears auto-pause
    /// state; catchup replay and immediate firing are the caller's job
    /// (they need the trigger chokepoint).
    pub async fn resume(pool: &PgPool, id: Uuid) -> Result<Schedule, ScheduleStoreError> {
        let schedule = Self::get(pool, id)
            .await?
            .ok_or(ScheduleStoreError::NotFound(id))?;
        if schedule.status() != ScheduleStatus::Paused {
            return Err(ScheduleStoreError::InvalidTransition {
                action: "resume",
                status: schedule.status().as_str(),
            });
        }
        let trigger = schedule
            .trigger()
            .map_err(|e| ScheduleStoreError::Validation(e.to_string()))?;
        let next_run_at = compute_next_run(&trigger, Utc::now())?;

        let row = sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET
                status = 'active',
                next_run_at = $2,
                auto_paused_at = NULL,
                auto_resume_at = NULL,
                consecutive_failures = 0,
                updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING *",
        )
        .bind(id)
        .bind(next_run_at)
        .fetch_optional(pool)
        .await?
        .ok_or(ScheduleStoreError::NotFound(id))?;
        Ok(row)
    }

    /// active|paused → disabled.
    pub async fn disable(pool: &PgPool, id: Uuid) -> Result<Schedule, ScheduleStoreError> {
        let schedule = Self::get(pool, id)
            .await?
            .ok_or(ScheduleStoreError::NotFound(id))?;
        match schedule.status() {
            ScheduleStatus::Active | ScheduleStatus::Paused | ScheduleStatus::QuotaExceeded
            | ScheduleStatus::Error => {}
            s => {
                return Err(ScheduleStoreError::InvalidTransition {
                    action: "disable",
                    status: s.as_str(),
                })
            }
        }
        Self::transition(pool, id, ScheduleStatus::Disabled, None).await
    }

    /// Set status + `next_run_at` in one statement.
    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        status: ScheduleStatus,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Schedule, ScheduleStoreError> {
        let row = sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET status = $2, next_run_at = $3, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(next_run_at)
        .fetch_optional(pool)
        .await?
        .ok_or(ScheduleStoreError::NotFound(id))?;
        Ok(row)
    }

    // ── Tick loop queries ────────────────────────────────────────────

    /// Due schedules for one tick: active, time-based, `next_run_at` in
    /// the past, highest priority first, oldest due first.
    pub async fn fetch_due(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Schedule>, ScheduleStoreError> {
        let rows = sqlx::query_as::<_, Schedule>(
            "SELECT * FROM schedules
             WHERE deleted_at IS NULL
               AND status = 'active'
               AND next_run_at IS NOT NULL
               AND next_run_at <= $1
             ORDER BY priority DESC, next_run_at ASC
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Advance `next_run_at` and bump skip counters. Every skip path
    /// advances the clock so a skipping schedule cannot hot-loop.
    pub async fn record_skip(
        pool: &PgPool,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), ScheduleStoreError> {
        sqlx::query(
            "UPDATE schedules SET
                next_run_at = $2,
                total_skips = total_skips + 1,
                consecutive_skips = consecutive_skips + 1,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_run_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a successful firing: stamps `last_run_at`, advances
    /// `next_run_at`, bumps the rolling quota counters (resetting any
    /// whose window rolled over) and the lifetime total — one statement.
    pub async fn record_fired(
        pool: &PgPool,
        id: Uuid,
        fired_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), ScheduleStoreError> {
        let hour_ws = window_start(QuotaGranularity::Hour, fired_at);
        let day_ws = window_start(QuotaGranularity::Day, fired_at);
        let week_ws = window_start(QuotaGranularity::Week, fired_at);
        let month_ws = window_start(QuotaGranularity::Month, fired_at);

        sqlx::query(
            "UPDATE schedules SET
                runs_this_hour = CASE WHEN hour_window_start IS NULL OR hour_window_start < $3
                                      THEN 1 ELSE runs_this_hour + 1 END,
                hour_window_start = GREATEST(COALESCE(hour_window_start, $3), $3),
                runs_today = CASE WHEN day_window_start IS NULL OR day_window_start < $4
                                  THEN 1 ELSE runs_today + 1 END,
                day_window_start = GREATEST(COALESCE(day_window_start, $4), $4),
                runs_this_week = CASE WHEN week_window_start IS NULL OR week_window_start < $5
                                      THEN 1 ELSE runs_this_week + 1 END,
                week_window_start = GREATEST(COALESCE(week_window_start, $5), $5),
                runs_this_month = CASE WHEN month_window_start IS NULL OR month_window_start < $6
                                       THEN 1 ELSE runs_this_month + 1 END,
                month_window_start = GREATEST(COALESCE(month_window_start, $6), $6),
                total_runs = total_runs + 1,
                consecutive_skips = 0,
                last_run_at = $2,
                next_run_at = $7,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(fired_at)
        .bind(hour_ws)
        .bind(day_ws)
        .bind(week_ws)
        .bind(month_ws)
        .bind(next_run_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Reserve one concurrency slot. Compare-and-swap: fails (returns
    /// false) when the schedule is at `max_concurrent_runs`, unless
    /// `allow_overflow` (overlap policy `allow`).
    pub async fn reserve_run_slot(
        pool: &PgPool,
        id: Uuid,
        max_concurrent: i32,
        allow_overflow: bool,
    ) -> Result<bool, ScheduleStoreError> {
        let result = sqlx::query(
            "UPDATE schedules SET
                current_running_count = current_running_count + 1,
                updated_at = now()
             WHERE id = $1 AND (current_running_count < $2 OR $3)",
        )
        .bind(id)
        .bind(max_concurrent)
        .bind(allow_overflow)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Release a reserved slot without a run (dispatch failed).
    pub async fn release_run_slot(pool: &PgPool, id: Uuid) -> Result<(), ScheduleStoreError> {
        sqlx::query(
            "UPDATE schedules SET
                current_running_count = GREATEST(current_running_count - 1, 0),
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Attach the dispatched run id to the schedule's active set.
    pub async fn attach_run(
        pool: &PgPool,
        id: Uuid,
        run_id: Uuid,
    ) -> Result<(), ScheduleStoreError> {
        sqlx::query(
            "UPDATE schedules SET
                active_run_ids = array_append(active_run_ids, $2),
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(run_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drop all active runs (cancel_previous). The caller cancels the
    /// outstanding run ids on Dispatch from its fresh read of the row.
    pub async fn clear_active_runs(pool: &PgPool, id: Uuid) -> Result<(), ScheduleStoreError> {
        sqlx::query(
            "UPDATE schedules SET
                active_run_ids = '{}',
                current_running_count = 0,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a firing failure. Returns the updated row so the caller can
    /// evaluate the auto-pause threshold.
    pub async fn record_failure(
        pool: &PgPool,
        id: Uuid,
        error: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Schedule, ScheduleStoreError> {
        let row = sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET
                total_failures = total_failures + 1,
                consecutive_failures = consecutive_failures + 1,
                last_error = $2,
                last_error_at = now(),
                next_run_at = $3,
                updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(error)
        .bind(next_run_at)
        .fetch_optional(pool)
        .await?
        .ok_or(ScheduleStoreError::NotFound(id))?;
        Ok(row)
    }

    /// Auto-pause after the consecutive-failure threshold. Stamps
    /// `auto_paused_at` and, when auto-resume is enabled, `auto_resume_at`.
    pub async fn auto_pause(
        pool: &PgPool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Schedule, ScheduleStoreError> {
        let row = sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET
                status = 'paused',
                next_run_at = NULL,
                auto_paused_at = $2,
                auto_resume_at = CASE WHEN auto_resume_enabled
                                      THEN $2 + make_interval(secs => auto_resume_after_secs)
                                      ELSE NULL END,
                updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(pool)
        .await?
        .ok_or(ScheduleStoreError::NotFound(id))?;
        Ok(row)
    }

    /// Close one run: adjust success/failure totals, rolling average
    /// duration, consecutive-failure state, and release the concurrency
    /// slot — one guarded statement, safe against concurrent triggers.
    pub async fn record_run_completion(
        pool: &PgPool,
        id: Uuid,
        run_id: Uuid,
        success: bool,
        duration_ms: Option<i64>,
        error: Option<&str>,
    ) -> Result<Schedule, ScheduleStoreError> {
        let row = sqlx::query_as::<_, Schedule>(
            "UPDATE schedules SET
                total_successes = total_successes + CASE WHEN $3 THEN 1 ELSE 0 END,
                total_failures = total_failures + CASE WHEN $3 THEN 0 ELSE 1 END,
                consecutive_failures = CASE WHEN $3 THEN 0 ELSE consecutive_failures + 1 END,
                avg_duration_ms = CASE
                    WHEN NOT $3 OR $4::bigint IS NULL THEN avg_duration_ms
                    WHEN avg_duration_ms IS NULL THEN $4::bigint::float8
                    ELSE (avg_duration_ms * total_successes + $4::bigint) / (total_successes + 1)
                END,
                last_error = CASE WHEN $3 THEN last_error ELSE $5 END,
                last_error_at = CASE WHEN $3 THEN last_error_at ELSE now() END,
                current_running_count = GREATEST(current_running_count - 1, 0),
                active_run_ids = array_remove(active_run_ids, $2),
                updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(run_id)
        .bind(success)
        .bind(duration_ms)
        .bind(error)
        .fetch_optional(pool)
        .await?
        .ok_or(ScheduleStoreError::NotFound(id))?;
        Ok(row)
    }

    // ── Cadence job queries ──────────────────────────────────────────

    /// Schedules parked in `quota_exceeded`, for the hourly recheck.
    pub async fn list_quota_exceeded(pool: &PgPool) -> Result<Vec<Schedule>, ScheduleStoreError> {
        let rows = sqlx::query_as::<_, Schedule>(
            "SELECT * FROM schedules
             WHERE deleted_at IS NULL AND status = 'quota_exceeded'",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Auto-paused schedules whose `auto_resume_at` has passed.
    pub async fn list_auto_resume_due(
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, ScheduleStoreError> {
        let rows = sqlx::query_as::<_, Schedule>(
            "SELECT * FROM schedules
             WHERE deleted_at IS NULL
               AND status = 'paused'
               AND auto_resume_at IS NOT NULL
               AND auto_resume_at <= $1",
        )
        .bind(now)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    // ── Statistics ───────────────────────────────────────────────────

    /// Aggregate statistics for the stats endpoint.
    pub async fn stats(
        pool: &PgPool,
        tenant_id: Option<Uuid>,
    ) -> Result<ScheduleStats, ScheduleStoreError> {
        let status_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM schedules
             WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR tenant_id = $1)
             GROUP BY status",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        let totals: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(total_successes), 0)::bigint,
                    COALESCE(SUM(total_failures), 0)::bigint
             FROM schedules
             WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR tenant_id = $1)",
        )
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;

        let upcoming: Vec<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, name, next_run_at FROM schedules
             WHERE deleted_at IS NULL AND status = 'active' AND next_run_at IS NOT NULL
               AND ($1::uuid IS NULL OR tenant_id = $1)
             ORDER BY next_run_at ASC
             LIMIT 10",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        let recent_failures: Vec<(Uuid, Uuid, DateTime<Utc>, Option<String>)> = sqlx::query_as(
            "SELECT e.id, e.schedule_id, e.created_at, e.error_message
             FROM schedule_executions e
             WHERE e.status = 'failed' AND ($1::uuid IS NULL OR e.tenant_id = $1)
             ORDER BY e.created_at DESC
             LIMIT 10",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        let (successes, failures) = totals;
        let attempts = successes + failures;
        let success_rate = if attempts > 0 {
            successes as f64 / attempts as f64
        } else {
            0.0
        };

        Ok(ScheduleStats {
            status_counts: status_rows.into_iter().collect(),
            total_successes: successes,
            total_failures: failures,
            success_rate,
            upcoming_runs: upcoming
                .into_iter()
                .map(|(id, name, at)| UpcomingRun { schedule_id: id, name, next_run_at: at })
                .collect(),
            recent_failures: recent_failures
                .into_iter()
                .map(|(id, schedule_id, at, error)| RecentFailure {
                    execution_id: id,
                    schedule_id,
                    failed_at: at,
                    error_message: error,
                })
                .collect(),
        })
    }
}

/// Aggregate statistics response.
#[derive(Debug, serde::Serialize)]
pub struct ScheduleStats {
    pub status_counts: std::collections::HashMap<String, i64>,
    pub total_successes: i64,
    pub total_failures: i64,
    pub success_rate: f64,
    pub upcoming_runs: Vec<UpcomingRun>,
    pub recent_failures: Vec<RecentFailure>,
}

#[derive(Debug, serde::Serialize)]
pub struct UpcomingRun {
    pub schedule_id: Uuid,
    pub name: String,
    pub next_run_at: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize)]
pub struct RecentFailure {
    pub execution_id: Uuid,
    pub schedule_id: Uuid,
    pub failed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}
