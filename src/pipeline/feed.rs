//! Market-cap feed - CoinGecko `coins/markets` polling
//!
//! Each poll produces one batch of `MarketSnapshot`s stamped with the poll
//! instant. The time-bucket policy downstream decides which polls land in
//! the store, so polling more often than hourly is expected.
//!
//! ## API Reference
//!
//! Endpoint: {base}/coins/markets?vs_currency={quote}&order=market_cap_desc&per_page={n}&page=1
//! Returns: Array of coins with `symbol`, `current_price`, `market_cap`
//!
//! Tagging: one extra request per configured category (`&category={cat}`);
//! every symbol it returns is tagged with that category.

use super::error::FeedError;
use super::types::MarketSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

/// Source of snapshot batches
#[async_trait]
pub trait SnapshotFeed: Send + Sync {
    async fn fetch_snapshots(&self) -> Result<Vec<MarketSnapshot>, FeedError>;
}

/// One entry of the `coins/markets` response
#[derive(Debug, Clone, Deserialize)]
pub struct CoinMarket {
    pub id: String,
    pub symbol: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
}

/// CoinGecko-compatible market-cap feed
pub struct CoinGeckoFeed {
    client: reqwest::Client,
    base_url: String,
    quote_symbol: String,
    page_size: u32,
    tag_categories: Vec<String>,
}

impl CoinGeckoFeed {
    pub fn new(
        base_url: &str,
        quote_symbol: &str,
        page_size: u32,
        tag_categories: Vec<String>,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            quote_symbol: quote_symbol.trim().to_uppercase(),
            page_size,
            tag_categories,
        })
    }

    fn markets_request(&self, category: Option<&str>) -> reqwest::RequestBuilder {
        let vs_currency = self.quote_symbol.to_lowercase();
        let per_page = self.page_size.to_string();

        let request = self
            .client
            .get(format!("{}/coins/markets", self.base_url))
            .query(&[
                ("vs_currency", vs_currency.as_str()),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
            ]);

        match category {
            Some(category) => request.query(&[("category", category)]),
            None => request,
        }
    }

    async fn fetch_markets(&self, category: Option<&str>) -> Result<Vec<CoinMarket>, FeedError> {
        let response = self.markets_request(category).send().await?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        Ok(response.json().await?)
    }

    /// Symbol (upper-cased) -> categories it belongs to
    async fn fetch_tags(&self) -> HashMap<String, BTreeSet<String>> {
        let mut tags: HashMap<String, BTreeSet<String>> = HashMap::new();

        for category in &self.tag_categories {
            match self.fetch_markets(Some(category)).await {
                Ok(markets) => {
                    for coin in markets {
                        tags.entry(coin.symbol.trim().to_uppercase())
                            .or_default()
                            .insert(category.clone());
                    }
                }
                Err(e) => {
                    log::warn!("⚠️  Failed to fetch category '{}': {}", category, e);
                }
            }
        }

        tags
    }
}

#[async_trait]
impl SnapshotFeed for CoinGeckoFeed {
    async fn fetch_snapshots(&self) -> Result<Vec<MarketSnapshot>, FeedError> {
        let polled_at = Utc::now().trunc_subsecs(0);
        let markets = self.fetch_markets(None).await?;
        let tags = self.fetch_tags().await;

        Ok(snapshots_from_markets(&self.quote_symbol, markets, &tags, polled_at))
    }
}

/// Convert a `coins/markets` page into snapshots stamped `polled_at`
///
/// Entries without price or market cap are skipped, as are repeated symbols
/// (the first one, i.e. the larger market cap, wins).
pub fn snapshots_from_markets(
    quote_symbol: &str,
    markets: Vec<CoinMarket>,
    tags: &HashMap<String, BTreeSet<String>>,
    polled_at: DateTime<Utc>,
) -> Vec<MarketSnapshot> {
    let mut seen = HashSet::new();
    let mut snapshots = Vec::with_capacity(markets.len());

    for coin in markets {
        let (Some(price), Some(market_cap)) = (coin.current_price, coin.market_cap) else {
            log::debug!("Skipping {}: missing price or market cap", coin.id);
            continue;
        };

        let symbol = coin.symbol.trim().to_uppercase();
        if !seen.insert(symbol.clone()) {
            log::debug!("Skipping {}: duplicate symbol {}", coin.id, symbol);
            continue;
        }

        let coin_tags = tags.get(&symbol).cloned().unwrap_or_default();

        match MarketSnapshot::new(quote_symbol, &symbol, price, market_cap, coin_tags, polled_at) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => log::warn!("⚠️  Skipping {}: {}", coin.id, e),
        }
    }

    snapshots
}

/// Feed polling task - fetch a batch every `poll_interval_ms` and send it to
/// ingestion
///
/// Fetch errors are logged and the next tick retries. Stops when the
/// ingestion channel closes.
pub async fn start_feed_polling(
    feed: Arc<dyn SnapshotFeed>,
    tx: mpsc::Sender<Vec<MarketSnapshot>>,
    poll_interval_ms: u64,
) {
    log::info!("⏰ Starting feed polling (interval: {}ms)", poll_interval_ms);

    let mut timer = interval(Duration::from_millis(poll_interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = tx.closed() => break,
        }

        let batch = match feed.fetch_snapshots().await {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("❌ Feed fetch failed: {}", e);
                continue;
            }
        };

        if batch.is_empty() {
            log::debug!("Feed returned no snapshots");
            continue;
        }

        log::debug!("📡 Fetched {} snapshots", batch.len());

        if tx.send(batch).await.is_err() {
            break;
        }
    }

    log::warn!("⚠️  Ingestion channel closed, stopping feed polling");
}
