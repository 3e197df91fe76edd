//! Append-only `schedule_executions` history table.
//!
//! One row per firing evaluation. Idempotency for the trigger chokepoint
//! rides on the unique index over `(schedule_id, scheduled_at,
//! trigger_context)`: a redelivered trigger inserts nothing and the
//! existing row is returned instead.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::{ExecutionStatus, ScheduleExecution, TriggerSource};

/// Query filters for execution history.
#[derive(Debug, Default, Deserialize)]
pub struct ExecutionFilter {
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Errors from execution store operations.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionStoreError {
    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ExecutionStoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Database(_) => 500,
        }
    }
}

/// Outcome of an idempotent insert attempt.
#[derive(Debug)]
pub enum InsertOutcome {
    /// A fresh row was created.
    Inserted(ScheduleExecution),
    /// A row with the same idempotency key already existed.
    Duplicate(ScheduleExecution),
}

/// Stateless store for `schedule_executions`.
pub struct ExecutionStore;

impl ExecutionStore {
    /// Insert one firing record idempotently. On conflict over
    /// `(schedule_id, scheduled_at, trigger_context)` nothing is written
    /// and the pre-existing row is returned as [`InsertOutcome::Duplicate`].
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        pool: &PgPool,
        tenant_id: Uuid,
        schedule_id: Uuid,
        status: ExecutionStatus,
        scheduled_at: DateTime<Utc>,
        source: TriggerSource,
        trigger_context: &str,
        skip_reason: Option<&str>,
    ) -> Result<InsertOutcome, ExecutionStoreError> {
        let inserted = sqlx::query_as::<_, ScheduleExecution>(
            "INSERT INTO schedule_executions
                (tenant_id, schedule_id, status, scheduled_at, trigger_source,
                 trigger_context, skip_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (schedule_id, scheduled_at, trigger_context) DO NOTHING
             RETURNING *",
        )
        .bind(tenant_id)
        .bind(schedule_id)
        .bind(status.as_str())
        .bind(scheduled_at)
        .bind(source.as_str())
        .bind(trigger_context)
        .bind(skip_reason)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(row));
        }

        let existing = sqlx::query_as::<_, ScheduleExecution>(
            "SELECT * FROM schedule_executions
             WHERE schedule_id = $1 AND scheduled_at = $2 AND trigger_context = $3",
        )
        .bind(schedule_id)
        .bind(scheduled_at)
        .bind(trigger_context)
        .fetch_one(pool)
        .await?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    pub async fn get(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<ScheduleExecution>, ExecutionStoreError> {
        let row = sqlx::query_as::<_, ScheduleExecution>(
            "SELECT * FROM schedule_executions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Execution history for one schedule, newest first.
    pub async fn list_for_schedule(
        pool: &PgPool,
        schedule_id: Uuid,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ScheduleExecution>, ExecutionStoreError> {
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);
        let rows = sqlx::query_as::<_, ScheduleExecution>(
            "SELECT * FROM schedule_executions
             WHERE schedule_id = $1
               AND ($2::text IS NULL OR status = $2)
               AND ($3::timestamptz IS NULL OR created_at >= $3)
               AND ($4::timestamptz IS NULL OR created_at <= $4)
             ORDER BY created_at DESC
             LIMIT $5",
        )
        .bind(schedule_id)
        .bind(&filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Mark an execution triggered and attach the dispatched run id.
    pub async fn mark_triggered(
        pool: &PgPool,
        id: Uuid,
        run_id: Uuid,
        triggered_at: DateTime<Utc>,
    ) -> Result<(), ExecutionStoreError> {
        sqlx::query(
            "UPDATE schedule_executions
             SET status = 'triggered', run_id = $2, triggered_at = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(run_id)
        .bind(triggered_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a firing failure on the execution row.
    pub async fn mark_failed(
        pool: &PgPool,
        id: Uuid,
        error: &str,
    ) -> Result<(), ExecutionStoreError> {
        sqlx::query(
            "UPDATE schedule_executions
             SET status = 'failed', error_message = $2, completed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Close the loop when Dispatch reports run completion.
    pub async fn complete_by_run(
        pool: &PgPool,
        run_id: Uuid,
        success: bool,
        completed_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<Option<ScheduleExecution>, ExecutionStoreError> {
        let row = sqlx::query_as::<_, ScheduleExecution>(
            "UPDATE schedule_executions
             SET status = CASE WHEN $2 THEN 'completed' ELSE 'failed' END,
                 completed_at = $3,
                 duration_ms = (EXTRACT(EPOCH FROM ($3 - COALESCE(triggered_at, created_at))) * 1000)::bigint,
                 error_message = $4
             WHERE run_id = $1 AND status IN ('triggered', 'running', 'pending')
             RETURNING *",
        )
        .bind(run_id)
        .bind(success)
        .bind(completed_at)
        .bind(error)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Cancel executions attached to the given runs (cancel_previous).
    pub async fn cancel_by_runs(
        pool: &PgPool,
        run_ids: &[Uuid],
    ) -> Result<u64, ExecutionStoreError> {
        let result = sqlx::query(
            "UPDATE schedule_executions
             SET status = 'cancelled', completed_at = now()
             WHERE run_id = ANY($1) AND status IN ('triggered', 'running', 'pending')",
        )
        .bind(run_ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Oldest queued firing for a schedule (overlap policy `queue`).
    pub async fn next_queued(
        pool: &PgPool,
        schedule_id: Uuid,
    ) -> Result<Option<ScheduleExecution>, ExecutionStoreError> {
        let row = sqlx::query_as::<_, ScheduleExecution>(
            "SELECT * FROM schedule_executions
             WHERE schedule_id = $1 AND status = 'pending'
             ORDER BY scheduled_at ASC
             LIMIT 1",
        )
        .bind(schedule_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Daily retention job: delete closed executions older than the
    /// retention window. Returns the number of rows removed.
    pub async fn delete_older_than(
        pool: &PgPool,
        retention_days: i64,
    ) -> Result<u64, ExecutionStoreError> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = sqlx::query(
            "DELETE FROM schedule_executions
             WHERE created_at < $1
               AND status NOT IN ('pending', 'running', 'triggered')",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
