//! device-monitor daemon: loads config, picks a store and runs the service
//! until Ctrl-C.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use device_monitor::config::Config;
use device_monitor::db::{CredentialRegistry, MemoryStore, MySqlDb, StatusStore};
use device_monitor::service::MonitorService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "device_monitor=info".into()),
        )
        .init();

    tracing::info!("Starting device-monitor...");

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        "Configuration loaded ({} watched devices)",
        config.devices.len()
    );

    // Persistence: MySQL when configured, in-memory otherwise
    let registry: Arc<dyn CredentialRegistry>;
    let status_store: Arc<dyn StatusStore>;
    if config.database.mysql_url.is_some() {
        let db = Arc::new(MySqlDb::connect(&config).await?);
        db.ensure_tables().await?;
        tracing::info!("MySQL tables ready");
        registry = db.clone();
        status_store = db;
    } else {
        tracing::warn!("No MySQL URL configured, using in-memory store");
        let store = Arc::new(MemoryStore::new());
        registry = store.clone();
        status_store = store;
    }

    let service = MonitorService::new(&config, registry, status_store).await?;
    service.start().await;

    let watched = service.subscribe_watch_list(&config.devices).await;
    tracing::info!("Watching {} devices", watched);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    service.stop().await;
    Ok(())
}
