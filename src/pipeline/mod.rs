//! # Market-cap snapshot pipeline
//!
//! Ingests periodic market-cap snapshots, keeps at most one per market per
//! hour bucket, and ranks the smoothed history into allocation targets.
//!
//! ## Data Flow
//!
//! ```text
//! SnapshotFeed ──(mpsc batches)──> SnapshotIngestor ──> SnapshotStore (SQLite)
//!                                                            │
//!                      rank_allocations <── EMA <── SnapshotHistory
//! ```
//!
//! 1. `feed` polls the market-cap API and sends one batch per poll
//! 2. `ingestion` applies the `time_bucket` policy and writes admitted rows
//! 3. `history` reads back active assets over a window
//! 4. `ema` smooths each asset's market cap
//! 5. `allocation` weights, filters and ranks the smoothed assets

pub mod allocation;
pub mod config;
pub mod db;
pub mod ema;
pub mod error;
pub mod feed;
pub mod history;
pub mod ingestion;
pub mod time_bucket;
pub mod types;

pub use allocation::{balanced_absolute_allocations, rank_allocations};
pub use config::{AllocationConfig, PipelineConfig};
pub use db::{SnapshotStore, SqliteSnapshotStore};
pub use error::{AllocationError, FeedError, HistoryError, SmoothingError, SnapshotError, StoreError};
pub use feed::{start_feed_polling, CoinGeckoFeed, SnapshotFeed};
pub use history::SnapshotHistory;
pub use ingestion::{start_snapshot_ingestion, IngestReport, SnapshotIngestor};
pub use time_bucket::{Admission, TimeBucketPolicy};
pub use types::{normalize_targets, AllocationTarget, Market, MarketSnapshot, SmoothedAsset};
