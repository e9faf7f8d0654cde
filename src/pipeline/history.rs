//! Historical retrieval over the snapshot store
//!
//! `list_historical_many` is a two-phase query:
//! 1. Discover base assets with at least one snapshot in the recency window
//!    (`min(2, hours)` hours, padded by the early tolerance)
//! 2. Pull the full requested window for each of those assets
//!
//! Assets that stopped reporting drop out of results even when older history
//! is still inside the requested window.
//!
//! `list_latest` feeds each asset's series through the EMA and returns one
//! `SmoothedAsset` per active asset.

use super::db::SnapshotStore;
use super::ema::ema;
use super::error::{HistoryError, SmoothingError, StoreError};
use super::time_bucket::TimeBucketPolicy;
use super::types::{normalize_symbol, Market, MarketSnapshot, SmoothedAsset};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Recency window used to decide which assets are still tracked
pub const RECENCY_WINDOW_HOURS: u32 = 2;

/// Per-base-asset series, each ordered newest-first
pub type SeriesByBase = BTreeMap<String, Vec<MarketSnapshot>>;

/// Read-side access to stored snapshots
#[derive(Clone)]
pub struct SnapshotHistory {
    store: Arc<dyn SnapshotStore>,
    policy: TimeBucketPolicy,
}

impl SnapshotHistory {
    pub fn new(store: Arc<dyn SnapshotStore>, policy: TimeBucketPolicy) -> Self {
        Self { store, policy }
    }

    /// Snapshots of one market from the last `hours` hours, newest-first
    pub async fn list_historical(
        &self,
        market: &Market,
        hours: u32,
    ) -> Result<Vec<MarketSnapshot>, StoreError> {
        self.list_historical_at(market, hours, Utc::now()).await
    }

    pub async fn list_historical_at(
        &self,
        market: &Market,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>, StoreError> {
        let since = self.policy.window_start(now, hours);
        self.store
            .query_range(&market.quote_symbol, Some(&market.base_symbol), since)
            .await
    }

    /// Series per active base asset for a quote symbol over the last `hours`
    pub async fn list_historical_many(
        &self,
        quote_symbol: &str,
        hours: u32,
    ) -> Result<SeriesByBase, StoreError> {
        self.list_historical_many_at(quote_symbol, hours, Utc::now()).await
    }

    pub async fn list_historical_many_at(
        &self,
        quote_symbol: &str,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<SeriesByBase, StoreError> {
        let quote_symbol = normalize_symbol(quote_symbol);

        // Phase 1: which assets reported recently
        let recent_since = self
            .policy
            .window_start(now, hours.min(RECENCY_WINDOW_HOURS));
        let recent = self
            .store
            .query_range(&quote_symbol, None, recent_since)
            .await?;

        let active: BTreeSet<String> = recent
            .into_iter()
            .map(|s| s.market.base_symbol)
            .collect();

        if active.is_empty() {
            log::debug!("No active assets for {} in the recency window", quote_symbol);
            return Ok(SeriesByBase::new());
        }

        // Phase 2: full window, one query per active asset
        let since = self.policy.window_start(now, hours);
        let mut grouped = SeriesByBase::new();

        for base_symbol in active {
            let series = self
                .store
                .query_range(&quote_symbol, Some(&base_symbol), since)
                .await?;
            if !series.is_empty() {
                grouped.insert(base_symbol, series);
            }
        }

        log::debug!(
            "Loaded {} active series for {} over {}h",
            grouped.len(),
            quote_symbol,
            hours
        );

        Ok(grouped)
    }

    /// Latest EMA-smoothed record per active asset, ordered by base symbol
    ///
    /// Fetches `smoothing + 1` hours so the EMA over `smoothing` periods has
    /// enough points to seed from.
    pub async fn list_latest(
        &self,
        quote_symbol: &str,
        smoothing: u32,
    ) -> Result<Vec<SmoothedAsset>, HistoryError> {
        self.list_latest_at(quote_symbol, smoothing, Utc::now()).await
    }

    pub async fn list_latest_at(
        &self,
        quote_symbol: &str,
        smoothing: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<SmoothedAsset>, HistoryError> {
        let series_by_base = self
            .list_historical_many_at(quote_symbol, smoothing.saturating_add(1), now)
            .await?;

        let mut latest = Vec::with_capacity(series_by_base.len());

        for (base_symbol, series) in series_by_base {
            // Series are newest-first; the EMA folds oldest-first
            let values: Vec<f64> = series.iter().rev().map(|s| s.market_cap).collect();

            let smoothed = ema(&values, smoothing).map_err(|source| HistoryError::Smoothing {
                base_symbol: base_symbol.clone(),
                source,
            })?;

            let newest = series.first().ok_or(HistoryError::Smoothing {
                base_symbol: base_symbol.clone(),
                source: SmoothingError::EmptySeries,
            })?;

            latest.push(SmoothedAsset::from_latest(newest, smoothed, series.len()));
        }

        Ok(latest)
    }
}
