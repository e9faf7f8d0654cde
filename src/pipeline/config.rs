//! Pipeline and allocation configuration from environment variables

use super::time_bucket::{
    TimeBucketPolicy, DEFAULT_EARLIER_TOLERANCE_MINUTES, DEFAULT_LATER_TOLERANCE_MINUTES,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Configuration for the feed + ingestion runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Channel buffer size for snapshot batches
    pub channel_buffer: usize,

    /// Feed poll interval in milliseconds
    pub feed_poll_interval_ms: u64,

    /// Minutes before the hour a snapshot is still on schedule
    pub earlier_tolerance_minutes: u32,

    /// Minutes after the hour a snapshot is still on schedule
    pub later_tolerance_minutes: u32,

    /// Quote currency tracked by the feed
    pub quote_symbol: String,

    /// Base URL of the market-cap API
    pub feed_base_url: String,

    /// Number of assets requested per poll
    pub feed_page_size: u32,

    /// Feed categories turned into snapshot tags
    pub feed_tag_categories: Vec<String>,

    /// Master enable flag for the runtime
    pub enabled: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CAPFLOW_DB_PATH` (default: /var/lib/capflow/capflow.db)
    /// - `SNAPSHOT_CHANNEL_BUFFER` (default: 1000)
    /// - `FEED_POLL_INTERVAL_MS` (default: 300000)
    /// - `EARLIER_TOLERANCE_MINUTES` (default: 5)
    /// - `LATER_TOLERANCE_MINUTES` (default: 10)
    /// - `QUOTE_SYMBOL` (default: USD)
    /// - `FEED_BASE_URL` (default: https://api.coingecko.com/api/v3)
    /// - `FEED_PAGE_SIZE` (default: 100)
    /// - `FEED_TAG_CATEGORIES` (comma-separated, default: none)
    /// - `ENABLE_PIPELINE` (default: false)
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("CAPFLOW_DB_PATH")
                .unwrap_or_else(|_| "/var/lib/capflow/capflow.db".to_string()),

            channel_buffer: parse_var("SNAPSHOT_CHANNEL_BUFFER", 1_000),

            feed_poll_interval_ms: parse_var("FEED_POLL_INTERVAL_MS", 300_000),

            earlier_tolerance_minutes: parse_var(
                "EARLIER_TOLERANCE_MINUTES",
                DEFAULT_EARLIER_TOLERANCE_MINUTES,
            ),

            later_tolerance_minutes: parse_var(
                "LATER_TOLERANCE_MINUTES",
                DEFAULT_LATER_TOLERANCE_MINUTES,
            ),

            quote_symbol: env::var("QUOTE_SYMBOL")
                .map(|s| s.trim().to_uppercase())
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "USD".to_string()),

            feed_base_url: env::var("FEED_BASE_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),

            feed_page_size: parse_var("FEED_PAGE_SIZE", 100),

            feed_tag_categories: env::var("FEED_TAG_CATEGORIES")
                .map(|s| split_list(&s))
                .unwrap_or_default(),

            enabled: parse_var("ENABLE_PIPELINE", false),
        }
    }

    pub fn policy(&self) -> TimeBucketPolicy {
        TimeBucketPolicy::new(self.earlier_tolerance_minutes, self.later_tolerance_minutes)
    }
}

/// Allocation ranking parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// EMA periods (hours) applied to market caps
    pub smoothing: u32,

    /// Tags whose assets are excluded unless they carry a weight override
    pub tags_to_ignore: Vec<String>,

    /// Per-base-symbol weight overrides
    pub alt_weighting_factors: HashMap<String, f64>,

    /// Root applied to weighted market caps (1 = no dampening)
    pub nth_root: f64,

    /// Maximum number of ranked assets returned
    pub top_ranking_count: usize,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            smoothing: 24,
            tags_to_ignore: Vec::new(),
            alt_weighting_factors: HashMap::new(),
            nth_root: 2.0,
            top_ranking_count: 10,
        }
    }
}

impl AllocationConfig {
    /// Load allocation parameters from environment variables
    ///
    /// Environment variables:
    /// - `ALLOCATION_SMOOTHING` (default: 24)
    /// - `ALLOCATION_TAGS_TO_IGNORE` (comma-separated, default: none)
    /// - `ALLOCATION_WEIGHTS` (`SYMBOL=weight,...`, default: none)
    /// - `ALLOCATION_NTH_ROOT` (default: 2.0)
    /// - `ALLOCATION_TOP_COUNT` (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            smoothing: parse_var("ALLOCATION_SMOOTHING", defaults.smoothing),

            tags_to_ignore: env::var("ALLOCATION_TAGS_TO_IGNORE")
                .map(|s| split_list(&s))
                .unwrap_or_default(),

            alt_weighting_factors: env::var("ALLOCATION_WEIGHTS")
                .map(|s| parse_weights(&s))
                .unwrap_or_default(),

            nth_root: parse_var("ALLOCATION_NTH_ROOT", defaults.nth_root),

            top_ranking_count: parse_var("ALLOCATION_TOP_COUNT", defaults.top_ranking_count),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `BTC=2,ETH=0.5` into an upper-cased symbol -> weight map
///
/// Malformed entries are skipped with a warning.
pub fn parse_weights(raw: &str) -> HashMap<String, f64> {
    let mut weights = HashMap::new();

    for entry in split_list(raw) {
        let parsed = entry
            .split_once('=')
            .map(|(symbol, weight)| (symbol.trim().to_uppercase(), weight.trim().parse::<f64>()));

        match parsed {
            Some((symbol, Ok(weight))) if !symbol.is_empty() && weight.is_finite() => {
                weights.insert(symbol, weight);
            }
            _ => {
                log::warn!("⚠️  Ignoring malformed weight override: {}", entry);
            }
        }
    }

    weights
}
