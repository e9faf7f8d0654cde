//! Core data structures for the snapshot pipeline
//!
//! - `Market` - (quote, base) trading pair, upper-cased on construction
//! - `MarketSnapshot` - one raw market-cap observation as stored
//! - `SmoothedAsset` - derived record carrying the EMA market cap
//! - `AllocationTarget` - ranked, un-normalized allocation output

use super::error::SnapshotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Trading pair identifying one snapshot series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Market {
    pub quote_symbol: String,
    pub base_symbol: String,
}

impl Market {
    /// Build a market, trimming and upper-casing both symbols
    ///
    /// Returns `SnapshotError::EmptySymbol` if either side is blank.
    pub fn new(quote_symbol: &str, base_symbol: &str) -> Result<Self, SnapshotError> {
        let quote_symbol = normalize_symbol(quote_symbol);
        let base_symbol = normalize_symbol(base_symbol);

        if quote_symbol.is_empty() {
            return Err(SnapshotError::EmptySymbol("quote"));
        }
        if base_symbol.is_empty() {
            return Err(SnapshotError::EmptySymbol("base"));
        }

        Ok(Self {
            quote_symbol,
            base_symbol,
        })
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base_symbol, self.quote_symbol)
    }
}

/// Upper-case and trim a symbol the way every stored key is normalized
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// One timestamped market-cap observation for a trading pair
///
/// Raw snapshots are immutable once built. Smoothing produces a
/// `SmoothedAsset` instead of rewriting `market_cap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market: Market,
    pub price: f64,
    pub market_cap: f64,
    pub tags: BTreeSet<String>,
    pub updated: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Build a validated snapshot
    ///
    /// Symbols are normalized, `price` and `market_cap` must be finite and
    /// non-negative. Empty tags are dropped.
    pub fn new<I, S>(
        quote_symbol: &str,
        base_symbol: &str,
        price: f64,
        market_cap: f64,
        tags: I,
        updated: DateTime<Utc>,
    ) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let market = Market::new(quote_symbol, base_symbol)?;
        check_amount("price", price)?;
        check_amount("market_cap", market_cap)?;

        let tags = tags
            .into_iter()
            .map(|tag| {
                let tag: String = tag.into();
                tag.trim().to_string()
            })
            .filter(|tag| !tag.is_empty())
            .collect();

        Ok(Self {
            market,
            price,
            market_cap,
            tags,
            updated,
        })
    }

    /// Re-check invariants on a snapshot that may have been built field by field
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.market.quote_symbol.is_empty()
            || self.market.quote_symbol != normalize_symbol(&self.market.quote_symbol)
        {
            return Err(SnapshotError::EmptySymbol("quote"));
        }
        if self.market.base_symbol.is_empty()
            || self.market.base_symbol != normalize_symbol(&self.market.base_symbol)
        {
            return Err(SnapshotError::EmptySymbol("base"));
        }
        check_amount("price", self.price)?;
        check_amount("market_cap", self.market_cap)
    }
}

fn check_amount(field: &'static str, value: f64) -> Result<(), SnapshotError> {
    if !value.is_finite() {
        return Err(SnapshotError::NonFinite { field });
    }
    if value < 0.0 {
        return Err(SnapshotError::Negative { field, value });
    }
    Ok(())
}

/// Latest state of one asset with its market cap replaced by the EMA value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmoothedAsset {
    pub market: Market,
    pub price: f64,
    /// EMA of the raw market caps in the lookback window
    pub market_cap: f64,
    pub tags: BTreeSet<String>,
    /// Timestamp of the newest raw snapshot folded into the EMA
    pub updated: DateTime<Utc>,
    /// Number of raw snapshots folded
    pub samples: usize,
}

impl SmoothedAsset {
    /// Derive from the newest raw snapshot and the computed EMA
    pub fn from_latest(latest: &MarketSnapshot, smoothed_market_cap: f64, samples: usize) -> Self {
        Self {
            market: latest.market.clone(),
            price: latest.price,
            market_cap: smoothed_market_cap,
            tags: latest.tags.clone(),
            updated: latest.updated,
            samples,
        }
    }

    pub fn base_symbol(&self) -> &str {
        &self.market.base_symbol
    }
}

/// Ranked allocation output (not normalized to sum to 1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub base_symbol: String,
    pub fraction: f64,
}

/// Rescale targets so their fractions sum to 1
///
/// Returns the input unchanged (cloned) when the total is zero.
pub fn normalize_targets(targets: &[AllocationTarget]) -> Vec<AllocationTarget> {
    let total: f64 = targets.iter().map(|t| t.fraction).sum();
    if total <= 0.0 {
        return targets.to_vec();
    }

    targets
        .iter()
        .map(|t| AllocationTarget {
            base_symbol: t.base_symbol.clone(),
            fraction: t.fraction / total,
        })
        .collect()
}
