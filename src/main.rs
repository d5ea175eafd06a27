use settlement_engine::config::Config;
use settlement_engine::services::{HttpPriceFeed, SettlementService, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "settlement_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!(
        "Starting settlement engine (db: {}, prices: {})",
        config.database_path, config.price_feed_url
    );

    if let Some(parent) = Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    let feed = Arc::new(HttpPriceFeed::new(
        config.price_feed_url.clone(),
        config.price_feed_timeout(),
    )?);

    let service = SettlementService::new(store, feed, &config);
    service.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.stop().await;
    Ok(())
}
