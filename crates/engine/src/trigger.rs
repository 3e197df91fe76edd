//! The trigger chokepoint: every firing source (tick loop, manual
//! trigger, webhook call, event match, catchup replay) funnels through
//! [`TriggerProcessor::process`]. The chokepoint re-checks policy
//! against a fresh row, records exactly one execution per idempotency
//! key, reserves a concurrency slot, and dispatches the run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::execution_store::{ExecutionStore, InsertOutcome};
use crate::model::{
    ExecutionStatus, Schedule, ScheduleStatus, TriggerConfig, TriggerResult, TriggerSource,
};
use crate::next_run::next_run_for;
use crate::policy::{check_quota, in_blackout, overlap_decision, OverlapDecision};
use crate::schedule_store::ScheduleStore;

/// One firing attempt handed to the chokepoint.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub schedule_id: Uuid,
    /// The slot this firing is for; part of the idempotency key.
    pub scheduled_at: DateTime<Utc>,
    pub source: TriggerSource,
    /// Caller-supplied discriminator; part of the idempotency key. The
    /// tick loop uses a constant, webhooks/events a delivery id, manual
    /// triggers a fresh uuid.
    pub trigger_context: String,
    /// Extra inputs merged over the schedule defaults (webhook/event
    /// field mappings, manual overrides).
    pub extra_inputs: serde_json::Map<String, serde_json::Value>,
    /// Manual-trigger overrides.
    pub ignore_blackout: bool,
    pub ignore_quota: bool,
}

impl TriggerRequest {
    pub fn tick(schedule_id: Uuid, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            schedule_id,
            scheduled_at,
            source: TriggerSource::Tick,
            trigger_context: "tick".to_string(),
            extra_inputs: serde_json::Map::new(),
            ignore_blackout: false,
            ignore_quota: false,
        }
    }

    pub fn catchup(schedule_id: Uuid, slot: DateTime<Utc>) -> Self {
        Self {
            source: TriggerSource::Catchup,
            trigger_context: "catchup".to_string(),
            ..Self::tick(schedule_id, slot)
        }
    }
}

/// Serializes policy evaluation, execution recording, and dispatch for
/// one firing attempt.
pub struct TriggerProcessor {
    pool: PgPool,
    dispatcher: Arc<dyn Dispatcher>,
}

impl TriggerProcessor {
    pub fn new(pool: PgPool, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { pool, dispatcher }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Evaluate and (when policy allows) fire one trigger.
    ///
    /// Evaluation order: status, validity window, blackout, quota,
    /// overlap, then the idempotent execution insert and dispatch. Skips
    /// are recorded as executions, never silently dropped, and for
    /// tick-driven sources every outcome advances `next_run_at`.
    pub async fn process(&self, req: TriggerRequest) -> anyhow::Result<TriggerResult> {
        let schedule = ScheduleStore::get(&self.pool, req.schedule_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("schedule not found: {}", req.schedule_id))?;
        let now = Utc::now();

        // 1. Status. Only active schedules fire; everything else is a
        //    recorded skip so redelivered webhooks leave a trace.
        if let Some((status, reason)) = skip_for_status(&schedule) {
            return self.record_skip(&schedule, &req, status, reason, now).await;
        }

        // 2. Validity window.
        if schedule.is_before_validity(now) {
            return self
                .record_skip(
                    &schedule,
                    &req,
                    ExecutionStatus::SkippedDisabled,
                    "before effective_from".to_string(),
                    now,
                )
                .await;
        }
        if schedule.is_past_validity(now) {
            let target = if schedule.auto_disable_on_expiry {
                ScheduleStatus::Disabled
            } else {
                ScheduleStatus::Expired
            };
            ScheduleStore::transition(&self.pool, schedule.id, target, None).await?;
            tracing::info!(
                schedule_id = %schedule.id,
                status = target.as_str(),
                "schedule passed effective_until"
            );
            return self
                .insert_skip_execution(
                    &schedule,
                    &req,
                    ExecutionStatus::SkippedDisabled,
                    "validity window expired".to_string(),
                )
                .await;
        }

        // 3. Blackout.
        if !req.ignore_blackout {
            if let Some(window) = in_blackout(&schedule.blackouts(), now) {
                return self
                    .record_skip(
                        &schedule,
                        &req,
                        ExecutionStatus::SkippedBlackout,
                        format!("blackout window '{}'", window),
                        now,
                    )
                    .await;
            }
        }

        // 4. Quota. A breach parks the schedule in quota_exceeded; the
        //    hourly cadence job reactivates it once a window rolls over.
        if !req.ignore_quota {
            if let Some(granularity) = check_quota(&schedule.quota_limits(), &schedule.quota_counters(), now) {
                let next = self.advanced_next_run(&schedule, now)?;
                ScheduleStore::transition(&self.pool, schedule.id, ScheduleStatus::QuotaExceeded, next)
                    .await?;
                tracing::info!(
                    schedule_id = %schedule.id,
                    granularity = granularity.as_str(),
                    "quota exhausted"
                );
                return self
                    .insert_skip_execution(
                        &schedule,
                        &req,
                        ExecutionStatus::SkippedQuota,
                        format!("quota exceeded ({})", granularity.as_str()),
                    )
                    .await;
            }
        }

        // 5. Overlap.
        match overlap_decision(&schedule.concurrency(), schedule.current_running_count) {
            OverlapDecision::Fire => {}
            OverlapDecision::Skip | OverlapDecision::DropNew => {
                return self
                    .record_skip(
                        &schedule,
                        &req,
                        ExecutionStatus::SkippedOverlap,
                        format!("{} runs still outstanding", schedule.current_running_count),
                        now,
                    )
                    .await;
            }
            OverlapDecision::Enqueue => {
                return self.enqueue(&schedule, &req, now).await;
            }
            OverlapDecision::CancelRunningThenFire => {
                self.cancel_outstanding(&schedule).await?;
            }
        }

        // 6. Idempotent execution insert, then dispatch.
        let execution = match ExecutionStore::insert(
            &self.pool,
            schedule.tenant_id,
            schedule.id,
            ExecutionStatus::Pending,
            req.scheduled_at,
            req.source,
            &req.trigger_context,
            None,
        )
        .await?
        {
            InsertOutcome::Inserted(row) => row,
            InsertOutcome::Duplicate(existing) => {
                tracing::debug!(
                    schedule_id = %schedule.id,
                    execution_id = %existing.id,
                    context = %req.trigger_context,
                    "duplicate trigger delivery — returning existing execution"
                );
                return Ok(result_from_existing(&schedule, &existing));
            }
        };

        self.fire(&schedule, &req, execution, now).await
    }

    /// Dispatch a run for a freshly inserted execution row.
    async fn fire(
        &self,
        schedule: &Schedule,
        req: &TriggerRequest,
        execution: crate::model::ScheduleExecution,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TriggerResult> {
        let concurrency = schedule.concurrency();
        let allow_overflow = matches!(
            concurrency.overlap_policy,
            crate::model::OverlapPolicy::Allow
        );
        let reserved = ScheduleStore::reserve_run_slot(
            &self.pool,
            schedule.id,
            concurrency.max_concurrent_runs,
            allow_overflow,
        )
        .await?;
        if !reserved {
            // Lost the race to a concurrent trigger source.
            ExecutionStore::mark_failed(&self.pool, execution.id, "concurrency slot unavailable")
                .await?;
            return self
                .record_skip_result(
                    schedule,
                    req,
                    Some(execution.id),
                    ExecutionStatus::SkippedOverlap,
                    "concurrency slot unavailable".to_string(),
                    now,
                )
                .await;
        }

        let defaults = schedule.defaults().unwrap_or_default();
        let target = schedule.target().unwrap_or_default();
        let request = DispatchRequest::from_defaults(
            schedule.tenant_id,
            schedule.id,
            execution.id,
            schedule.bot_id,
            schedule.bot_version.clone(),
            schedule.priority,
            &defaults,
            target,
            req.extra_inputs.clone(),
        );

        match self.dispatcher.create_run(&request).await {
            Ok(run_id) => {
                let triggered_at = Utc::now();
                ExecutionStore::mark_triggered(&self.pool, execution.id, run_id, triggered_at)
                    .await?;
                ScheduleStore::attach_run(&self.pool, schedule.id, run_id).await?;
                let next = self.advanced_next_run(schedule, now)?;
                ScheduleStore::record_fired(&self.pool, schedule.id, triggered_at, next).await?;
                tracing::info!(
                    schedule_id = %schedule.id,
                    execution_id = %execution.id,
                    run_id = %run_id,
                    source = req.source.as_str(),
                    "schedule fired"
                );
                Ok(TriggerResult {
                    schedule_id: schedule.id,
                    execution_id: Some(execution.id),
                    run_id: Some(run_id),
                    triggered_at,
                    status: ExecutionStatus::Triggered,
                    skip_reason: None,
                    error_message: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                ScheduleStore::release_run_slot(&self.pool, schedule.id).await?;
                ExecutionStore::mark_failed(&self.pool, execution.id, &message).await?;
                let next = self.advanced_next_run(schedule, now)?;
                let updated =
                    ScheduleStore::record_failure(&self.pool, schedule.id, &message, next).await?;
                self.maybe_auto_pause(&updated, now).await?;
                tracing::warn!(
                    schedule_id = %schedule.id,
                    execution_id = %execution.id,
                    error = %message,
                    "dispatch failed"
                );
                Ok(TriggerResult {
                    schedule_id: schedule.id,
                    execution_id: Some(execution.id),
                    run_id: None,
                    triggered_at: now,
                    status: ExecutionStatus::Failed,
                    skip_reason: None,
                    error_message: Some(message),
                })
            }
        }
    }

    /// Overlap policy `queue`: record a pending execution that the run
    /// completion handler fires once capacity frees up.
    async fn enqueue(
        &self,
        schedule: &Schedule,
        req: &TriggerRequest,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TriggerResult> {
        let outcome = ExecutionStore::insert(
            &self.pool,
            schedule.tenant_id,
            schedule.id,
            ExecutionStatus::Pending,
            req.scheduled_at,
            req.source,
            &req.trigger_context,
            Some("queued behind running executions"),
        )
        .await?;
        let execution = match outcome {
            InsertOutcome::Inserted(row) => row,
            InsertOutcome::Duplicate(existing) => {
                return Ok(result_from_existing(schedule, &existing))
            }
        };
        if self.advances_clock(req) {
            let next = self.advanced_next_run(schedule, now)?;
            ScheduleStore::record_skip(&self.pool, schedule.id, next).await?;
        }
        tracing::debug!(
            schedule_id = %schedule.id,
            execution_id = %execution.id,
            "firing queued behind outstanding runs"
        );
        Ok(TriggerResult {
            schedule_id: schedule.id,
            execution_id: Some(execution.id),
            run_id: None,
            triggered_at: now,
            status: ExecutionStatus::Pending,
            skip_reason: Some("queued".to_string()),
            error_message: None,
        })
    }

    /// cancel_previous: cancel every outstanding run before firing.
    async fn cancel_outstanding(&self, schedule: &Schedule) -> anyhow::Result<()> {
        for run_id in &schedule.active_run_ids {
            if let Err(e) = self.dispatcher.cancel_run(*run_id).await {
                tracing::warn!(
                    schedule_id = %schedule.id,
                    run_id = %run_id,
                    error = %e,
                    "run cancellation failed"
                );
            }
        }
        ExecutionStore::cancel_by_runs(&self.pool, &schedule.active_run_ids).await?;
        ScheduleStore::clear_active_runs(&self.pool, schedule.id).await?;
        Ok(())
    }

    /// Record a skip execution and, for tick-driven sources, advance the
    /// schedule clock so the skip cannot repeat on the next tick.
    async fn record_skip(
        &self,
        schedule: &Schedule,
        req: &TriggerRequest,
        status: ExecutionStatus,
        reason: String,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TriggerResult> {
        let result = self
            .insert_skip_execution(schedule, req, status, reason)
            .await?;
        if self.advances_clock(req) {
            let next = self.advanced_next_run(schedule, now)?;
            ScheduleStore::record_skip(&self.pool, schedule.id, next).await?;
        }
        Ok(result)
    }

    async fn insert_skip_execution(
        &self,
        schedule: &Schedule,
        req: &TriggerRequest,
        status: ExecutionStatus,
        reason: String,
    ) -> anyhow::Result<TriggerResult> {
        let outcome = ExecutionStore::insert(
            &self.pool,
            schedule.tenant_id,
            schedule.id,
            status,
            req.scheduled_at,
            req.source,
            &req.trigger_context,
            Some(&reason),
        )
        .await?;
        let execution = match outcome {
            InsertOutcome::Inserted(row) | InsertOutcome::Duplicate(row) => row,
        };
        tracing::debug!(
            schedule_id = %schedule.id,
            status = status.as_str(),
            reason = %reason,
            "firing skipped"
        );
        Ok(TriggerResult {
            schedule_id: schedule.id,
            execution_id: Some(execution.id),
            run_id: None,
            triggered_at: Utc::now(),
            status,
            skip_reason: Some(reason),
            error_message: None,
        })
    }

    async fn record_skip_result(
        &self,
        schedule: &Schedule,
        req: &TriggerRequest,
        execution_id: Option<Uuid>,
        status: ExecutionStatus,
        reason: String,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TriggerResult> {
        if self.advances_clock(req) {
            let next = self.advanced_next_run(schedule, now)?;
            ScheduleStore::record_skip(&self.pool, schedule.id, next).await?;
        }
        Ok(TriggerResult {
            schedule_id: schedule.id,
            execution_id,
            run_id: None,
            triggered_at: now,
            status,
            skip_reason: Some(reason),
            error_message: None,
        })
    }

    /// Whether this source owns the schedule clock. Webhook, event, and
    /// manual firings never move `next_run_at`.
    fn advances_clock(&self, req: &TriggerRequest) -> bool {
        matches!(req.source, TriggerSource::Tick | TriggerSource::Catchup)
    }

    /// Next slot strictly after `now` for time-based triggers.
    fn advanced_next_run(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let trigger: TriggerConfig = schedule
            .trigger()
            .map_err(|e| anyhow::anyhow!("schedule {} has bad trigger config: {}", schedule.id, e))?;
        if !trigger.trigger_type().is_time_based() {
            return Ok(None);
        }
        Ok(next_run_for(&trigger, now)?)
    }

    /// Engage auto-pause once the consecutive-failure threshold is hit.
    pub async fn maybe_auto_pause(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        if !schedule.auto_pause_on_failure
            || schedule.status() != ScheduleStatus::Active
            || schedule.consecutive_failures < schedule.auto_pause_after_failures
        {
            return Ok(false);
        }
        let paused = ScheduleStore::auto_pause(&self.pool, schedule.id, now).await?;
        tracing::warn!(
            schedule_id = %schedule.id,
            consecutive_failures = schedule.consecutive_failures,
            auto_resume_at = ?paused.auto_resume_at,
            "auto-paused after consecutive failures"
        );
        Ok(true)
    }

    /// Completion callback from Dispatch. Closes the execution, adjusts
    /// schedule statistics, evaluates auto-pause, and fires the oldest
    /// queued execution when the freed slot allows one.
    pub async fn handle_run_completion(
        &self,
        run_id: Uuid,
        success: bool,
        error: Option<&str>,
    ) -> anyhow::Result<Option<TriggerResult>> {
        let completed_at = Utc::now();
        let Some(execution) =
            ExecutionStore::complete_by_run(&self.pool, run_id, success, completed_at, error)
                .await?
        else {
            tracing::debug!(run_id = %run_id, "completion for unknown or already-closed run");
            return Ok(None);
        };

        let schedule = ScheduleStore::record_run_completion(
            &self.pool,
            execution.schedule_id,
            run_id,
            success,
            execution.duration_ms,
            error,
        )
        .await?;

        if !success {
            self.maybe_auto_pause(&schedule, completed_at).await?;
        }

        // Overlap policy `queue`: a freed slot fires the oldest waiter.
        if schedule.is_active()
            && schedule.concurrency().overlap_policy == crate::model::OverlapPolicy::Queue
        {
            if let Some(queued) = ExecutionStore::next_queued(&self.pool, schedule.id).await? {
                tracing::debug!(
                    schedule_id = %schedule.id,
                    execution_id = %queued.id,
                    "firing queued execution after run completion"
                );
                let result = self
                    .fire(
                        &schedule,
                        &TriggerRequest {
                            schedule_id: schedule.id,
                            scheduled_at: queued.scheduled_at,
                            source: TriggerSource::Tick,
                            trigger_context: queued.trigger_context.clone(),
                            extra_inputs: serde_json::Map::new(),
                            ignore_blackout: false,
                            ignore_quota: false,
                        },
                        queued,
                        completed_at,
                    )
                    .await?;
                return Ok(Some(result));
            }
        }

        Ok(None)
    }
}

/// Non-active statuses map to recorded skip executions.
fn skip_for_status(schedule: &Schedule) -> Option<(ExecutionStatus, String)> {
    match schedule.status() {
        ScheduleStatus::Active => None,
        ScheduleStatus::Paused => Some((
            ExecutionStatus::SkippedPaused,
            "schedule is paused".to_string(),
        )),
        ScheduleStatus::QuotaExceeded => Some((
            ExecutionStatus::SkippedQuota,
            "schedule is quota_exceeded".to_string(),
        )),
        ScheduleStatus::Error => Some((
            ExecutionStatus::SkippedError,
            "schedule is in error state".to_string(),
        )),
        s => Some((
            ExecutionStatus::SkippedDisabled,
            format!("schedule is {}", s.as_str()),
        )),
    }
}

fn result_from_existing(
    schedule: &Schedule,
    existing: &crate::model::ScheduleExecution,
) -> TriggerResult {
    TriggerResult {
        schedule_id: schedule.id,
        execution_id: Some(existing.id),
        run_id: existing.run_id,
        triggered_at: existing.triggered_at.unwrap_or(existing.created_at),
        status: serde_json::from_value(serde_json::Value::String(existing.status.clone()))
            .unwrap_or(ExecutionStatus::Pending),
        skip_reason: existing.skip_reason.clone(),
        error_message: existing.error_message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_active_statuses_produce_recorded_skips() {
        let mut schedule = test_schedule(ScheduleStatus::Paused);
        assert_eq!(
            skip_for_status(&schedule).unwrap().0,
            ExecutionStatus::SkippedPaused
        );

        schedule.status = "disabled".to_string();
        assert_eq!(
            skip_for_status(&schedule).unwrap().0,
            ExecutionStatus::SkippedDisabled
        );

        schedule.status = "quota_exceeded".to_string();
        assert_eq!(
            skip_for_status(&schedule).unwrap().0,
            ExecutionStatus::SkippedQuota
        );

        schedule.status = "active".to_string();
        assert!(skip_for_status(&schedule).is_none());
    }

    #[test]
    fn execution_status_text_round_trips_for_duplicates() {
        let existing = crate::model::ScheduleExecution {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            status: "triggered".to_string(),
            scheduled_at: Utc::now(),
            triggered_at: Some(Utc::now()),
            completed_at: None,
            duration_ms: None,
            run_id: Some(Uuid::new_v4()),
            trigger_source: "webhook".to_string(),
            trigger_context: "delivery-1".to_string(),
            skip_reason: None,
            error_message: None,
            created_at: Utc::now(),
        };
        let schedule = test_schedule(ScheduleStatus::Active);
        let result = result_from_existing(&schedule, &existing);
        assert_eq!(result.status, ExecutionStatus::Triggered);
        assert_eq!(result.run_id, existing.run_id);
    }

    fn test_schedule(status: ScheduleStatus) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            bot_id: Uuid::new_v4(),
            bot_version: Some("1.0.0".to_string()),
            use_latest_version: false,
            name: "test".to_string(),
            description: None,
            status: status.as_str().to_string(),
            trigger_type: "cron".to_string(),
            trigger_json: serde_json::json!({
                "type": "cron", "expression": "*/5 * * * *", "timezone": "UTC"
            }),
            target_json: serde_json::json!({}),
            defaults_json: serde_json::json!({}),
            concurrency_json: serde_json::json!({}),
            catchup_json: serde_json::json!({}),
            blackout_json: serde_json::json!([]),
            quota_json: serde_json::json!({}),
            sla_json: None,
            priority: 0,
            current_running_count: 0,
            active_run_ids: Vec::new(),
            runs_this_hour: 0,
            hour_window_start: None,
            runs_today: 0,
            day_window_start: None,
            runs_this_week: 0,
            week_window_start: None,
            runs_this_month: 0,
            month_window_start: None,
            total_runs: 0,
            effective_from: None,
            effective_until: None,
            auto_disable_on_expiry: false,
            total_successes: 0,
            total_failures: 0,
            total_skips: 0,
            consecutive_failures: 0,
            consecutive_skips: 0,
            avg_duration_ms: None,
            last_error: None,
            last_error_at: None,
            auto_pause_on_failure: false,
            auto_pause_after_failures: 5,
            auto_paused_at: None,
            auto_resume_enabled: false,
            auto_resume_after_secs: 3600,
            auto_resume_at: None,
            next_run_at: None,
            last_run_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
