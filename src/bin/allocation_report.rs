//! Allocation Report - ranked market-cap allocations as JSON
//!
//! Reads the snapshot store, smooths each active asset's market cap and
//! prints the ranked targets (absolute and normalized).
//!
//! Usage:
//!   cargo run --release --bin allocation_report
//!
//! Environment variables:
//!   CAPFLOW_DB_PATH, QUOTE_SYMBOL, EARLIER/LATER_TOLERANCE_MINUTES
//!   ALLOCATION_SMOOTHING, ALLOCATION_TAGS_TO_IGNORE, ALLOCATION_WEIGHTS,
//!   ALLOCATION_NTH_ROOT, ALLOCATION_TOP_COUNT

use capflow::pipeline::{
    allocation::balanced_absolute_allocations,
    config::{AllocationConfig, PipelineConfig},
    db::{SnapshotStore, SqliteSnapshotStore},
    history::SnapshotHistory,
    types::{normalize_targets, AllocationTarget},
};
use dotenv::dotenv;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct AllocationReport<'a> {
    quote_symbol: &'a str,
    generated_at: chrono::DateTime<chrono::Utc>,
    config: &'a AllocationConfig,
    absolute: Vec<AllocationTarget>,
    normalized: Vec<AllocationTarget>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let pipeline_config = PipelineConfig::from_env();
    let allocation_config = AllocationConfig::from_env();

    let store = Arc::new(SqliteSnapshotStore::open(&pipeline_config.db_path)?);
    store.init_schema().await?;

    let history = SnapshotHistory::new(store, pipeline_config.policy());
    let absolute = balanced_absolute_allocations(
        &history,
        &pipeline_config.quote_symbol,
        &allocation_config,
    )
    .await?;

    if absolute.is_empty() {
        log::warn!(
            "⚠️  No active assets for {} in {}",
            pipeline_config.quote_symbol,
            pipeline_config.db_path
        );
    }

    let report = AllocationReport {
        quote_symbol: &pipeline_config.quote_symbol,
        generated_at: chrono::Utc::now(),
        config: &allocation_config,
        normalized: normalize_targets(&absolute),
        absolute,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
