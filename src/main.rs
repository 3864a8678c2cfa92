use axum::serve;
use log::info;
use oak::config::{AppConfig, StorageBackend};
use oak::{tally_router, EntityStore, MemoryEntityStore, PostgresEntityStore, Tally};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// How often inactive tallies are dropped from the in-memory store.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::{Builder, Env};
    use log::LevelFilter;

    Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    // Load configuration
    let config = AppConfig::load()?;
    info!(
        "Configuration loaded: server={}:{} storage={:?}",
        config.server.host, config.server.port, config.storage.backend
    );

    let tally_config = config.tally.clone();
    let new_tally = move || Tally::new(&tally_config);

    let entity_store: Arc<dyn EntityStore<Tally>> = match config.storage.backend {
        StorageBackend::Memory => {
            let store = Arc::new(MemoryEntityStore::new(new_tally));
            spawn_purge(store.clone());
            store as Arc<dyn EntityStore<Tally>>
        }
        StorageBackend::Postgres => {
            info!("Connecting to PostgreSQL...");
            let database_url = config.database_url()?;
            let max_connections = config.storage.max_connections.unwrap_or(20);
            let store =
                PostgresEntityStore::new(&database_url, max_connections, new_tally).await?;
            store.migrate().await?;
            Arc::new(store)
        }
    };

    let app = tally_router(&config, entity_store)?;
    run_server(app, &config).await?;

    Ok(())
}

fn spawn_purge(store: Arc<MemoryEntityStore<Tally>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = store.purge_inactive();
            if purged > 0 {
                info!("Purged {} inactive tallies", purged);
            }
        }
    });
}

async fn run_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("oak server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
