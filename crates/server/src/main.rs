mod api;
mod db;
mod router;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use botsched_core::Config;
use botsched_engine::{
    BotCatalog, Dispatcher, HttpBotCatalog, HttpDispatcher, LeaderElector, NoopDispatcher,
    PermissiveBotCatalog, PgLeaderLock, SchedulerService, TriggerProcessor,
};

use crate::state::AppState;

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    botsched_core::config::load_dotenv();
    let config = Config::from_env();
    config.log_summary();

    let pool = db::init_pg_pool(&config.postgres).await?;

    // The platform service behind DISPATCH_URL hosts both the run API
    // and the bot catalog. Without it, runs are simulated and every bot
    // resolves.
    let (dispatcher, catalog): (Arc<dyn Dispatcher>, Arc<dyn BotCatalog>) =
        match &config.dispatch.base_url {
            Some(url) => (
                Arc::new(HttpDispatcher::new(&config.dispatch, url.clone())),
                Arc::new(HttpBotCatalog::new(url.clone())),
            ),
            None => (Arc::new(NoopDispatcher), Arc::new(PermissiveBotCatalog)),
        };

    let processor = Arc::new(TriggerProcessor::new(pool.clone(), dispatcher));
    let lock = Arc::new(PgLeaderLock::new(
        pool.clone(),
        config.scheduler.leader_lock_key,
    ));
    let elector = Arc::new(LeaderElector::new(lock, &config.scheduler));
    let scheduler = Arc::new(SchedulerService::new(
        pool.clone(),
        config.scheduler.clone(),
        Arc::clone(&processor),
        Arc::clone(&elector),
    ));

    {
        let elector = Arc::clone(&elector);
        tokio::spawn(async move { elector.run().await });
    }
    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await });
    }
    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_maintenance().await });
    }

    let state = Arc::new(AppState {
        pool,
        config: config.clone(),
        catalog,
        processor,
        elector: Arc::clone(&elector),
    });
    let app = router::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Drain the in-flight tick, then hand the lock to a standby.
    scheduler.stop();
    elector.stop().await;
    info!("shutdown complete");

    Ok(())
}
