//! Bot-catalog collaborator: resolves bot/version existence and publish
//! status at schedule creation and activation time.

use async_trait::async_trait;
use uuid::Uuid;

use botsched_core::SchedError;

/// A concrete bot version a schedule can be activated against.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ResolvedBot {
    pub bot_id: Uuid,
    pub version: String,
    pub published: bool,
}

/// Resolves bots against the platform's bot catalog.
#[async_trait]
pub trait BotCatalog: Send + Sync {
    /// Resolve a bot version. `version = None` with `use_latest` resolves
    /// the latest version; otherwise the pinned version is looked up.
    async fn resolve(
        &self,
        bot_id: Uuid,
        version: Option<&str>,
        use_latest: bool,
    ) -> Result<ResolvedBot, SchedError>;
}

/// HTTP-backed catalog client.
pub struct HttpBotCatalog {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBotCatalog {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BotCatalog for HttpBotCatalog {
    async fn resolve(
        &self,
        bot_id: Uuid,
        version: Option<&str>,
        use_latest: bool,
    ) -> Result<ResolvedBot, SchedError> {
        let url = match (version, use_latest) {
            (_, true) | (None, _) => format!("{}/api/bots/{}/versions/latest", self.base_url, bot_id),
            (Some(v), false) => format!("{}/api/bots/{}/versions/{}", self.base_url, bot_id, v),
        };
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedError::BotNotResolvable(format!("catalog request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(SchedError::BotNotResolvable(format!(
                "bot {} version {} not found (catalog returned {})",
                bot_id,
                version.unwrap_or("latest"),
                resp.status()
            )));
        }
        resp.json::<ResolvedBot>()
            .await
            .map_err(|e| SchedError::BotNotResolvable(format!("bad catalog response: {}", e)))
    }
}

/// Catalog that accepts every bot. Used when no catalog URL is configured
/// (standalone deployments) and in tests.
pub struct PermissiveBotCatalog;

#[async_trait]
impl BotCatalog for PermissiveBotCatalog {
    async fn resolve(
        &self,
        bot_id: Uuid,
        version: Option<&str>,
        _use_latest: bool,
    ) -> Result<ResolvedBot, SchedError> {
        Ok(ResolvedBot {
            bot_id,
            version: version.unwrap_or("latest").to_string(),
            published: true,
        })
    }
}
