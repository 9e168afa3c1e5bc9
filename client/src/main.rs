//! tabsyncd - background sync daemon for a POS device.
//!
//! Opens the device's local database, connects to a tabsync server and
//! keeps one tenant session syncing until interrupted.

use std::sync::Arc;
use tabsync_client::{
    db, Config, HttpConnectivity, HttpRemote, SqliteQueue, SqliteStore, SyncRuntime, SyncServices,
    TenantContext, WsChangeFeed,
};
use tabsync_engine::AdapterRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabsync_client=debug,tabsyncd=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let tenant_id = config
        .tenant_id
        .clone()
        .ok_or("TABSYNC_TENANT_ID environment variable is required")?;

    tracing::info!("Starting tabsyncd against {}", config.remote_url);

    // Open the local database
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Running local migrations...");
    db::run_migrations(&pool).await?;

    let remote = Arc::new(HttpRemote::new(
        &config.remote_url,
        config.api_token.clone(),
        config.request_timeout,
    )?);
    let services = SyncServices {
        store: Arc::new(SqliteStore::new(pool.clone())),
        queue: Arc::new(SqliteQueue::new(pool)),
        remote,
        feed: Arc::new(WsChangeFeed::from_http_base(
            &config.remote_url,
            config.api_token.clone(),
        )),
        connectivity: Arc::new(HttpConnectivity::new(
            &config.remote_url,
            config.request_timeout,
        )?),
        registry: Arc::new(AdapterRegistry::standard()),
    };

    let runtime = SyncRuntime::new(services, &config.sync);
    runtime.start_session(TenantContext::new(tenant_id)).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    runtime.end_session().await;

    Ok(())
}
