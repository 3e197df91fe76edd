//! Dispatch collaborator: hands a "create run" request to the runner
//! fleet and returns the run id. The scheduler never executes bot logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use botsched_core::config::DispatchConfig;
use botsched_core::SchedError;

use crate::model::{ExecutionDefaults, TargetSelection};

/// Everything Dispatch needs to create one run.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRequest {
    pub tenant_id: Uuid,
    pub schedule_id: Uuid,
    pub execution_id: Uuid,
    pub bot_id: Uuid,
    pub bot_version: Option<String>,
    /// Resolved inputs (schedule defaults merged with trigger payload).
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub environment: serde_json::Map<String, serde_json::Value>,
    pub credential_refs: Vec<String>,
    pub timeout_secs: Option<i64>,
    pub max_retries: Option<i32>,
    pub priority: i32,
    pub target: TargetSelection,
}

impl DispatchRequest {
    /// Build a request from schedule defaults plus trigger-supplied inputs
    /// (trigger inputs win on key collisions).
    pub fn from_defaults(
        tenant_id: Uuid,
        schedule_id: Uuid,
        execution_id: Uuid,
        bot_id: Uuid,
        bot_version: Option<String>,
        priority: i32,
        defaults: &ExecutionDefaults,
        target: TargetSelection,
        extra_inputs: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut inputs = defaults.inputs.clone();
        for (k, v) in extra_inputs {
            inputs.insert(k, v);
        }
        Self {
            tenant_id,
            schedule_id,
            execution_id,
            bot_id,
            bot_version,
            inputs,
            environment: defaults.environment.clone(),
            credential_refs: defaults.credential_refs.clone(),
            timeout_secs: defaults.timeout_secs,
            max_retries: defaults.max_retries,
            priority,
            target,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DispatchResponse {
    run_id: Uuid,
}

/// Creates runs on the runner fleet.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn create_run(&self, request: &DispatchRequest) -> Result<Uuid, SchedError>;

    /// Best-effort cancellation of an outstanding run (cancel_previous).
    async fn cancel_run(&self, run_id: Uuid) -> Result<(), SchedError>;
}

/// HTTP client for the Dispatch service.
pub struct HttpDispatcher {
    base_url: String,
    auth_token: Option<String>,
    retry_once: bool,
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(config: &DispatchConfig, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            retry_once: config.retry_once,
            client,
        }
    }

    async fn post_run(&self, request: &DispatchRequest) -> Result<Uuid, SchedError> {
        let url = format!("{}/api/runs", self.base_url);
        let mut req = self.client.post(&url).json(request);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SchedError::Dispatch(format!("run creation request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(SchedError::Dispatch(format!(
                "dispatch returned {} for schedule {}",
                resp.status(),
                request.schedule_id
            )));
        }
        let body: DispatchResponse = resp
            .json()
            .await
            .map_err(|e| SchedError::Dispatch(format!("bad dispatch response: {}", e)))?;
        Ok(body.run_id)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn create_run(&self, request: &DispatchRequest) -> Result<Uuid, SchedError> {
        match self.post_run(request).await {
            Ok(run_id) => Ok(run_id),
            Err(first) if self.retry_once => {
                tracing::warn!(
                    schedule_id = %request.schedule_id,
                    error = %first,
                    "dispatch failed — retrying once"
                );
                self.post_run(request).await
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel_run(&self, run_id: Uuid) -> Result<(), SchedError> {
        let url = format!("{}/api/runs/{}/cancel", self.base_url, run_id);
        let mut req = self.client.post(&url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| SchedError::Dispatch(format!("run cancel request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(SchedError::Dispatch(format!(
                "dispatch returned {} cancelling run {}",
                resp.status(),
                run_id
            )));
        }
        Ok(())
    }
}

/// Dispatcher that fabricates run ids without calling anything. Used when
/// no Dispatch URL is configured, and in tests.
#[derive(Default)]
pub struct NoopDispatcher;

#[async_trait]
impl Dispatcher for NoopDispatcher {
    async fn create_run(&self, request: &DispatchRequest) -> Result<Uuid, SchedError> {
        let run_id = Uuid::new_v4();
        tracing::debug!(
            schedule_id = %request.schedule_id,
            run_id = %run_id,
            "no dispatch configured — simulating run"
        );
        Ok(run_id)
    }

    async fn cancel_run(&self, _run_id: Uuid) -> Result<(), SchedError> {
        Ok(())
    }
}
