//! The tick loop and maintenance cadence jobs.
//!
//! Only the elected leader scans for due schedules. Each tick fetches a
//! bounded batch ordered by priority, evaluates every schedule through
//! the trigger chokepoint, and isolates per-schedule failures so one bad
//! row cannot stall the fleet. Maintenance runs on the same leader:
//! hourly quota reactivation + auto-resume, daily execution retention.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;

use botsched_core::config::SchedulerConfig;

use crate::execution_store::ExecutionStore;
use crate::leader::LeaderElector;
use crate::model::{Schedule, ScheduleStatus};
use crate::next_run::next_run_for;
use crate::policy::{catchup_plan, check_quota, missed_slots};
use crate::schedule_store::ScheduleStore;
use crate::trigger::{TriggerProcessor, TriggerRequest};

const MAINTENANCE_INTERVAL_SECS: u64 = 3600;
const RETENTION_EVERY_CYCLES: u64 = 24;

/// Drives time-based schedules while this instance holds leadership.
pub struct SchedulerService {
    pool: PgPool,
    config: SchedulerConfig,
    processor: Arc<TriggerProcessor>,
    elector: Arc<LeaderElector>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SchedulerService {
    pub fn new(
        pool: PgPool,
        config: SchedulerConfig,
        processor: Arc<TriggerProcessor>,
        elector: Arc<LeaderElector>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            pool,
            config,
            processor,
            elector,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Tick until shutdown. A tick in flight always drains before the
    /// loop exits, so stopping never abandons half-processed schedules.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.tick_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            instance_id = %self.config.instance_id,
            interval_secs = self.config.tick_interval_secs,
            "tick loop started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.elector.is_leader() {
                        self.tick_once().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(instance_id = %self.config.instance_id, "tick loop stopped");
    }

    /// One due-schedule scan. Public so the management API can force a
    /// tick and tests can drive the loop directly.
    pub async fn tick_once(&self) {
        let now = Utc::now();
        let due = match ScheduleStore::fetch_due(&self.pool, now, self.config.tick_batch_size).await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "due-schedule scan failed");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        tracing::debug!(count = due.len(), "processing due schedules");

        for schedule in due {
            // Leadership can lapse mid-tick; the rest of the batch is
            // left for whichever instance leads next.
            if !self.elector.is_leader() {
                tracing::warn!("leadership lost mid-tick — abandoning remaining batch");
                break;
            }
            let schedule_id = schedule.id;
            if let Err(e) = self.evaluate_due(schedule).await {
                tracing::error!(
                    schedule_id = %schedule_id,
                    error = %e,
                    "schedule evaluation failed — parking in error state"
                );
                if let Err(e) =
                    ScheduleStore::transition(&self.pool, schedule_id, ScheduleStatus::Error, None)
                        .await
                {
                    tracing::error!(schedule_id = %schedule_id, error = %e, "error transition failed");
                }
            }
        }
    }

    /// Fire one due schedule, replaying missed slots first when the
    /// catchup policy asks for it. Exactly one firing is current; the
    /// replayed slots carry the catchup source.
    async fn evaluate_due(&self, schedule: Schedule) -> anyhow::Result<()> {
        let now = Utc::now();
        let due_at = schedule.next_run_at.unwrap_or(now);
        let trigger = schedule
            .trigger()
            .map_err(|e| anyhow::anyhow!("bad trigger config: {}", e))?;

        let catchup = schedule.catchup();
        let slots = match schedule.last_run_at {
            Some(last) => {
                let missed = missed_slots(&trigger, last, now, catchup.window_secs)?;
                catchup_plan(&catchup, &missed)
            }
            None => Vec::new(),
        };

        match slots.split_last() {
            None => {
                self.processor
                    .process(TriggerRequest::tick(schedule.id, due_at))
                    .await?;
            }
            Some((current, replay)) => {
                for slot in replay {
                    let result = self
                        .processor
                        .process(TriggerRequest::catchup(schedule.id, *slot))
                        .await?;
                    tracing::debug!(
                        schedule_id = %schedule.id,
                        slot = %slot,
                        status = result.status.as_str(),
                        "catchup slot replayed"
                    );
                }
                self.processor
                    .process(TriggerRequest::tick(schedule.id, *current))
                    .await?;
            }
        }
        Ok(())
    }

    /// Hourly maintenance plus daily retention, leader-gated like the
    /// tick loop.
    pub async fn run_maintenance(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately; skip it so maintenance starts
        // one full cycle after boot.
        interval.tick().await;

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.elector.is_leader() {
                        continue;
                    }
                    cycles += 1;
                    self.reactivate_quota_exceeded().await;
                    self.auto_resume_due().await;
                    if cycles % RETENTION_EVERY_CYCLES == 0 {
                        self.prune_executions().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// quota_exceeded → active once a quota window has rolled over.
    async fn reactivate_quota_exceeded(&self) {
        let parked = match ScheduleStore::list_quota_exceeded(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "quota_exceeded scan failed");
                return;
            }
        };
        let now = Utc::now();
        for schedule in parked {
            if check_quota(&schedule.quota_limits(), &schedule.quota_counters(), now).is_some() {
                continue;
            }
            let next = schedule
                .trigger()
                .ok()
                .filter(|t| t.trigger_type().is_time_based())
                .and_then(|t| next_run_for(&t, now).ok().flatten());
            match ScheduleStore::transition(&self.pool, schedule.id, ScheduleStatus::Active, next)
                .await
            {
                Ok(_) => {
                    tracing::info!(schedule_id = %schedule.id, "quota window rolled over — reactivated");
                }
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, error = %e, "reactivation failed");
                }
            }
        }
    }

    /// Resume auto-paused schedules whose `auto_resume_at` has passed.
    async fn auto_resume_due(&self) {
        let due = match ScheduleStore::list_auto_resume_due(&self.pool, Utc::now()).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "auto-resume scan failed");
                return;
            }
        };
        for schedule in due {
            match ScheduleStore::resume(&self.pool, schedule.id).await {
                Ok(_) => {
                    tracing::info!(schedule_id = %schedule.id, "auto-resumed");
                }
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, error = %e, "auto-resume failed");
                }
            }
        }
    }

    /// Delete closed executions beyond the retention window.
    async fn prune_executions(&self) {
        match ExecutionStore::delete_older_than(&self.pool, self.config.execution_retention_days)
            .await
        {
            Ok(0) => {}
            Ok(n) => {
                tracing::info!(
                    deleted = n,
                    retention_days = self.config.execution_retention_days,
                    "execution history pruned"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "execution retention job failed");
            }
        }
    }

    /// Stop both loops after the in-flight tick drains.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
