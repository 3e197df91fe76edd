use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BOTSCHED_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("BOTSCHED_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:     host={}, port={}", self.server.host, self.server.port);
        tracing::info!("  postgres:   host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  scheduler:  tick={}s, batch={}, instance={}",
            self.scheduler.tick_interval_secs,
            self.scheduler.tick_batch_size,
            self.scheduler.instance_id
        );
        tracing::info!(
            "  dispatch:   url={}",
            self.dispatch.base_url.as_deref().unwrap_or("(none — runs simulated)")
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "SERVER_HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "SERVER_PORT", 8090),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "botsched"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-schedule scans on the leader.
    pub tick_interval_secs: u64,
    /// Maximum schedules fetched per tick.
    pub tick_batch_size: i64,
    /// Advisory lock key for leader election (same across the fleet).
    pub leader_lock_key: i64,
    /// Seconds between lock acquisition attempts on standby instances.
    pub leader_retry_secs: u64,
    /// Seconds between leadership verification probes on the leader.
    pub leader_probe_secs: u64,
    /// Days of execution history kept by the retention job.
    pub execution_retention_days: i64,
    /// Human-readable instance identifier for logs (defaults to hostname-pid).
    pub instance_id: String,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let default_instance = format!("botsched-{}", std::process::id());
        Self {
            tick_interval_secs: profiled_env_u64(p, "SCHED_TICK_INTERVAL_SECS", 10),
            tick_batch_size: profiled_env_u64(p, "SCHED_TICK_BATCH_SIZE", 100) as i64,
            leader_lock_key: profiled_env_u64(p, "SCHED_LEADER_LOCK_KEY", 0x42_07_5C_4E_D0)
                as i64,
            leader_retry_secs: profiled_env_u64(p, "SCHED_LEADER_RETRY_SECS", 15),
            leader_probe_secs: profiled_env_u64(p, "SCHED_LEADER_PROBE_SECS", 30),
            execution_retention_days: profiled_env_u64(p, "SCHED_RETENTION_DAYS", 90) as i64,
            instance_id: profiled_env_or(p, "SCHED_INSTANCE_ID", &default_instance),
        }
    }
}

// ── Dispatch ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Base URL of the Dispatch run-execution service. None = simulate runs.
    pub base_url: Option<String>,
    /// Bearer token for Dispatch API calls.
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether run creation failures should be retried once.
    pub retry_once: bool,
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            base_url: profiled_env_opt(p, "DISPATCH_URL"),
            auth_token: profiled_env_opt(p, "DISPATCH_TOKEN"),
            timeout_secs: profiled_env_u64(p, "DISPATCH_TIMEOUT_SECS", 30),
            retry_once: profiled_env_bool(p, "DISPATCH_RETRY_ONCE", true),
        }
    }
}
