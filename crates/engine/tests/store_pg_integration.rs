//! Postgres-backed store tests.
//!
//! These need a real database: they run only when `DATABASE_URL` points
//! at a test instance (migrations are applied on connect). Unconfigured
//! environments skip with a note instead of failing.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use botsched_engine::catalog::PermissiveBotCatalog;
use botsched_engine::execution_store::{ExecutionStore, InsertOutcome};
use botsched_engine::model::{
    ExecutionStatus, IntervalTrigger, Schedule, TriggerConfig, TriggerSource,
};
use botsched_engine::schedule_store::{CreateScheduleRequest, ScheduleStore};

async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(u) if !u.is_empty() => u,
        _ => {
            eprintln!("DATABASE_URL not configured, skipping test");
            return None;
        }
    };
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("apply migrations");
    Some(pool)
}

async fn seed_schedule(pool: &PgPool) -> Schedule {
    let req = CreateScheduleRequest {
        tenant_id: Uuid::new_v4(),
        bot_id: Uuid::new_v4(),
        bot_version: Some("1.0.0".to_string()),
        use_latest_version: false,
        name: format!("store-it-{}", Uuid::new_v4()),
        description: None,
        trigger: TriggerConfig::Interval(IntervalTrigger {
            every_minutes: 5,
            start_at: None,
        }),
        target: Default::default(),
        defaults: Default::default(),
        concurrency: Default::default(),
        catchup: Default::default(),
        blackout_windows: Vec::new(),
        quota: Default::default(),
        sla: None,
        priority: 0,
        effective_from: None,
        effective_until: None,
        auto_disable_on_expiry: false,
        auto_pause_on_failure: false,
        auto_pause_after_failures: 5,
        auto_resume_enabled: false,
        auto_resume_after_secs: 3600,
        activate: true,
    };
    ScheduleStore::create(pool, &PermissiveBotCatalog, req)
        .await
        .expect("seed schedule")
}

/// Two deliveries with the same (schedule, slot, context) key must
/// produce exactly one execution row; the second caller gets the first
/// caller's row back.
#[tokio::test]
async fn duplicate_trigger_key_yields_one_execution() {
    let Some(pool) = test_pool().await else { return };
    let schedule = seed_schedule(&pool).await;
    let slot = chrono::Utc::now();
    let context = "delivery-42";

    let first = ExecutionStore::insert(
        &pool,
        schedule.tenant_id,
        schedule.id,
        ExecutionStatus::Pending,
        slot,
        TriggerSource::Webhook,
        context,
        None,
    )
    .await
    .expect("first insert");
    let second = ExecutionStore::insert(
        &pool,
        schedule.tenant_id,
        schedule.id,
        ExecutionStatus::Pending,
        slot,
        TriggerSource::Webhook,
        context,
        None,
    )
    .await
    .expect("second insert");

    let (inserted, duplicate) = match (first, second) {
        (InsertOutcome::Inserted(a), InsertOutcome::Duplicate(b)) => (a, b),
        other => panic!("expected Inserted then Duplicate, got {:?}", other),
    };
    assert_eq!(inserted.id, duplicate.id);

    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM schedule_executions
         WHERE schedule_id = $1 AND scheduled_at = $2 AND trigger_context = $3",
    )
    .bind(schedule.id)
    .bind(slot)
    .bind(context)
    .fetch_one(&pool)
    .await
    .expect("count rows");
    assert_eq!(count, 1);
}

/// Failed runs count against failure totals but must not move the
/// rolling average duration, which tracks successful runs only.
#[tokio::test]
async fn failed_runs_do_not_move_avg_duration() {
    let Some(pool) = test_pool().await else { return };
    let schedule = seed_schedule(&pool).await;

    let after_success =
        ScheduleStore::record_run_completion(&pool, schedule.id, Uuid::new_v4(), true, Some(2000), None)
            .await
            .expect("first success");
    assert_eq!(after_success.total_successes, 1);
    assert_eq!(after_success.avg_duration_ms, Some(2000.0));

    // A slow failed run reports a duration; the average must not absorb it.
    let after_failure = ScheduleStore::record_run_completion(
        &pool,
        schedule.id,
        Uuid::new_v4(),
        false,
        Some(90_000),
        Some("runner timeout"),
    )
    .await
    .expect("failure");
    assert_eq!(after_failure.total_failures, 1);
    assert_eq!(after_failure.consecutive_failures, 1);
    assert_eq!(after_failure.avg_duration_ms, Some(2000.0));

    let after_second_success =
        ScheduleStore::record_run_completion(&pool, schedule.id, Uuid::new_v4(), true, Some(4000), None)
            .await
            .expect("second success");
    assert_eq!(after_second_success.total_successes, 2);
    assert_eq!(after_second_success.avg_duration_ms, Some(3000.0));
}
