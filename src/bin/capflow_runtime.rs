//! Capflow Runtime - feed polling + snapshot ingestion
//!
//! This binary orchestrates the snapshot pipeline:
//! - Opens the SQLite snapshot store and ensures the schema
//! - Spawns the ingestion task (time-bucket admission + writes)
//! - Spawns the feed poller that sends one batch per poll
//!
//! Usage:
//!   cargo run --release --bin capflow_runtime
//!
//! Environment variables:
//!   CAPFLOW_DB_PATH - SQLite database path (default: /var/lib/capflow/capflow.db)
//!   ENABLE_PIPELINE - Master switch (default: false)
//!   FEED_POLL_INTERVAL_MS - Poll interval (default: 300000)
//!   SNAPSHOT_CHANNEL_BUFFER - Channel size (default: 1000)

use capflow::pipeline::{
    config::PipelineConfig,
    db::{SnapshotStore, SqliteSnapshotStore},
    feed::{start_feed_polling, CoinGeckoFeed, SnapshotFeed},
    ingestion::{start_snapshot_ingestion, SnapshotIngestor},
    types::MarketSnapshot,
};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::mpsc;

const STATS_INTERVAL_MS: u64 = 60_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Capflow Runtime");

    let config = PipelineConfig::from_env();

    if !config.enabled {
        info!("⚠️  Pipeline is DISABLED (set ENABLE_PIPELINE=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    let policy = config.policy();

    info!("✅ Pipeline ENABLED");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Quote: {}", config.quote_symbol);
    info!("   ├─ Feed: {} (top {})", config.feed_base_url, config.feed_page_size);
    info!("   ├─ Tag categories: {:?}", config.feed_tag_categories);
    info!("   ├─ Poll interval: {}ms", config.feed_poll_interval_ms);
    info!(
        "   └─ Admission window: -{}m / +{}m around the hour",
        policy.earlier_tolerance_minutes, policy.later_tolerance_minutes
    );

    info!("🔧 Initializing database...");
    let store = Arc::new(SqliteSnapshotStore::open(&config.db_path)?);
    store.init_schema().await?;
    info!("✅ Database initialized");

    let ingestor = Arc::new(SnapshotIngestor::new(store, policy));

    let feed: Arc<dyn SnapshotFeed> = Arc::new(CoinGeckoFeed::new(
        &config.feed_base_url,
        &config.quote_symbol,
        config.feed_page_size,
        config.feed_tag_categories.clone(),
    )?);

    let (tx, rx) = mpsc::channel::<Vec<MarketSnapshot>>(config.channel_buffer);
    info!("✅ Snapshot channel created (buffer: {})", config.channel_buffer);

    info!("🚀 Spawning background tasks...");

    let ingestion = tokio::spawn(start_snapshot_ingestion(rx, ingestor, STATS_INTERVAL_MS));
    info!("   ├─ ✅ Ingestion task spawned");

    let poll_interval = config.feed_poll_interval_ms;
    let poller = tokio::spawn(start_feed_polling(feed, tx, poll_interval));
    info!("   └─ ✅ Feed poller spawned");

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    // Stopping the poller drops the only sender, which closes the channel
    poller.abort();
    let _ = poller.await;

    match ingestion.await {
        Ok(totals) => info!(
            "✅ Capflow runtime stopped ({} snapshots stored this run)",
            totals.inserted
        ),
        Err(e) => error!("❌ Ingestion task failed: {}", e),
    }

    Ok(())
}
