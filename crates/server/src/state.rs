use std::sync::Arc;

use sqlx::PgPool;

use botsched_core::Config;
use botsched_engine::{BotCatalog, LeaderElector, TriggerProcessor};

pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub catalog: Arc<dyn BotCatalog>,
    pub processor: Arc<TriggerProcessor>,
    pub elector: Arc<LeaderElector>,
}
