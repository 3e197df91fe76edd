//! Leader election for the tick loop. Exactly one scheduler instance
//! drives time-based firings; the rest serve the API and stand by.
//!
//! The election primitive is injectable: production uses a PostgreSQL
//! advisory lock held on a dedicated connection, tests use an in-memory
//! lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Connection, PgPool};
use tokio::sync::{watch, Mutex};

use botsched_core::config::SchedulerConfig;

/// A mutual-exclusion lock shared by all scheduler instances.
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Try to take the lock without blocking. Returns whether we hold it.
    async fn try_acquire(&self) -> anyhow::Result<bool>;

    /// Probe that the lock is still held (e.g. the session backing it is
    /// alive). A `false` here means leadership was lost.
    async fn is_held(&self) -> anyhow::Result<bool>;

    async fn release(&self) -> anyhow::Result<()>;
}

/// Advisory-lock client. The lock is session-scoped, so the acquiring
/// connection is parked outside the pool for as long as we lead; losing
/// that session loses the lock.
pub struct PgLeaderLock {
    pool: PgPool,
    key: i64,
    conn: Mutex<Option<sqlx::pool::PoolConnection<sqlx::Postgres>>>,
}

impl PgLeaderLock {
    pub fn new(pool: PgPool, key: i64) -> Self {
        Self {
            pool,
            key,
            conn: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LeaderLock for PgLeaderLock {
    async fn try_acquire(&self) -> anyhow::Result<bool> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(true);
        }
        let mut conn = self.pool.acquire().await?;
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await?;
        if locked {
            *guard = Some(conn);
        }
        Ok(locked)
    }

    async fn is_held(&self) -> anyhow::Result<bool> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Ok(false);
        };
        match conn.ping().await {
            Ok(()) => Ok(true),
            Err(e) => {
                // Dead session: the server already dropped the lock.
                tracing::warn!(error = %e, "leader lock session lost");
                *guard = None;
                Ok(false)
            }
        }
    }

    async fn release(&self) -> anyhow::Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

/// Runs the acquire/probe loop and exposes the current leadership state.
pub struct LeaderElector {
    lock: Arc<dyn LeaderLock>,
    instance_id: String,
    retry_secs: u64,
    probe_secs: u64,
    leading: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LeaderElector {
    pub fn new(lock: Arc<dyn LeaderLock>, config: &SchedulerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            lock,
            instance_id: config.instance_id.clone(),
            retry_secs: config.leader_retry_secs,
            probe_secs: config.leader_probe_secs,
            leading: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    /// Acquire/probe until shutdown. Non-leaders retry acquisition every
    /// `leader_retry_secs`; the leader probes its session every
    /// `leader_probe_secs` and demotes itself the moment the probe fails.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let wait_secs = if self.is_leader() {
                self.probe_secs
            } else {
                self.retry_secs
            };

            if self.is_leader() {
                match self.lock.is_held().await {
                    Ok(true) => {}
                    Ok(false) => {
                        self.leading.store(false, Ordering::SeqCst);
                        tracing::warn!(instance_id = %self.instance_id, "leadership lost");
                    }
                    Err(e) => {
                        self.leading.store(false, Ordering::SeqCst);
                        tracing::warn!(
                            instance_id = %self.instance_id,
                            error = %e,
                            "leadership probe failed"
                        );
                    }
                }
            } else {
                match self.lock.try_acquire().await {
                    Ok(true) => {
                        self.leading.store(true, Ordering::SeqCst);
                        tracing::info!(instance_id = %self.instance_id, "became leader");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            instance_id = %self.instance_id,
                            error = %e,
                            "leader acquisition failed"
                        );
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(wait_secs)) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Stop the loop and release the lock so a standby can take over
    /// immediately instead of waiting for the session to die.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.leading.store(false, Ordering::SeqCst);
        if let Err(e) = self.lock.release().await {
            tracing::warn!(instance_id = %self.instance_id, error = %e, "lock release failed");
        }
        tracing::info!(instance_id = %self.instance_id, "leader elector stopped");
    }
}

/// In-memory lock for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryLock {
    state: Arc<Mutex<Option<u64>>>,
    id: u64,
}

impl InMemoryLock {
    /// Two handles over the same `state` compete for one lock.
    pub fn new(state: Arc<Mutex<Option<u64>>>, id: u64) -> Self {
        Self { state, id }
    }
}

#[async_trait]
impl LeaderLock for InMemoryLock {
    async fn try_acquire(&self) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        match *state {
            Some(holder) => Ok(holder == self.id),
            None => {
                *state = Some(self.id);
                Ok(true)
            }
        }
    }

    async fn is_held(&self) -> anyhow::Result<bool> {
        Ok(*self.state.lock().await == Some(self.id))
    }

    async fn release(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if *state == Some(self.id) {
            *state = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(instance: &str) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_secs: 10,
            tick_batch_size: 100,
            leader_lock_key: 0x5eed,
            leader_retry_secs: 1,
            leader_probe_secs: 1,
            execution_retention_days: 90,
            instance_id: instance.to_string(),
        }
    }

    #[tokio::test]
    async fn only_one_instance_acquires_the_lock() {
        let state = Arc::new(Mutex::new(None));
        let a = InMemoryLock::new(Arc::clone(&state), 1);
        let b = InMemoryLock::new(Arc::clone(&state), 2);

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        assert!(a.is_held().await.unwrap());
        assert!(!b.is_held().await.unwrap());

        a.release().await.unwrap();
        assert!(b.try_acquire().await.unwrap());
        assert!(b.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn reacquire_is_idempotent_for_the_holder() {
        let state = Arc::new(Mutex::new(None));
        let a = InMemoryLock::new(state, 7);
        assert!(a.try_acquire().await.unwrap());
        assert!(a.try_acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn standby_takes_over_after_release() {
        let state = Arc::new(Mutex::new(None));
        let lock_a: Arc<dyn LeaderLock> = Arc::new(InMemoryLock::new(Arc::clone(&state), 1));
        let lock_b: Arc<dyn LeaderLock> = Arc::new(InMemoryLock::new(Arc::clone(&state), 2));

        let elector_a = Arc::new(LeaderElector::new(lock_a, &test_config("a")));
        let elector_b = Arc::new(LeaderElector::new(lock_b, &test_config("b")));

        let run_a = {
            let e = Arc::clone(&elector_a);
            tokio::spawn(async move { e.run().await })
        };
        let run_b = {
            let e = Arc::clone(&elector_b);
            tokio::spawn(async move { e.run().await })
        };

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(elector_a.is_leader() ^ elector_b.is_leader());

        let (leader, standby) = if elector_a.is_leader() {
            (&elector_a, &elector_b)
        } else {
            (&elector_b, &elector_a)
        };
        leader.stop().await;

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(standby.is_leader());
        assert!(!leader.is_leader());

        standby.stop().await;
        let _ = tokio::join!(run_a, run_b);
    }
}
