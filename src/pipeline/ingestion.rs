//! Snapshot ingestion - batch admission + async channel processor
//!
//! Per record:
//! 1. Validate the snapshot
//! 2. Lock the record's market (serializes query-latest-then-insert)
//! 3. Fetch the newest stored snapshot for the market
//! 4. Apply the time-bucket policy
//! 5. Insert if admitted
//!
//! Batches are not transactional. Rejections and per-record write failures
//! are logged and counted; the rest of the batch still runs.

use super::db::SnapshotStore;
use super::error::StoreError;
use super::time_bucket::{Admission, TimeBucketPolicy};
use super::types::{Market, MarketSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration};

/// Outcome counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub submitted: usize,
    /// Rows actually inserted
    pub inserted: usize,
    /// Invalid, off-schedule or too close to the last stored snapshot
    pub rejected: usize,
    /// Store errors or inserts that affected 0 rows
    pub failed: usize,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.submitted += other.submitted;
        self.inserted += other.inserted;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

enum RecordOutcome {
    Inserted,
    Rejected,
    Failed,
}

/// Lock per market, created on first use and dropped once idle
#[derive(Default)]
struct MarketLocks {
    locks: Mutex<HashMap<Market, Arc<Mutex<()>>>>,
}

impl MarketLocks {
    async fn for_market(&self, market: &Market) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(market.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the market's lock if no task holds or waits on it
    ///
    /// Clones and removals both happen under the map lock, so a count of 1
    /// means only the map still references it.
    async fn release(&self, market: &Market) {
        let mut locks = self.locks.lock().await;
        if locks.get(market).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(market);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Applies the time-bucket policy and writes admitted snapshots
pub struct SnapshotIngestor {
    store: Arc<dyn SnapshotStore>,
    policy: TimeBucketPolicy,
    market_locks: MarketLocks,
}

impl SnapshotIngestor {
    pub fn new(store: Arc<dyn SnapshotStore>, policy: TimeBucketPolicy) -> Self {
        Self {
            store,
            policy,
            market_locks: MarketLocks::default(),
        }
    }

    /// Admit and store a batch of candidates
    ///
    /// Candidates are processed in (market, updated) order, so within one
    /// batch the earliest snapshot of an hour bucket wins. Never fails as a
    /// whole; see `IngestReport`.
    pub async fn ingest_batch(&self, mut batch: Vec<MarketSnapshot>) -> IngestReport {
        batch.sort_by(|a, b| a.market.cmp(&b.market).then(a.updated.cmp(&b.updated)));

        let mut report = IngestReport {
            submitted: batch.len(),
            ..IngestReport::default()
        };

        for snapshot in &batch {
            match self.ingest_one(snapshot).await {
                RecordOutcome::Inserted => report.inserted += 1,
                RecordOutcome::Rejected => report.rejected += 1,
                RecordOutcome::Failed => report.failed += 1,
            }
        }

        log::debug!(
            "Batch ingested: {} submitted, {} inserted, {} rejected, {} failed",
            report.submitted,
            report.inserted,
            report.rejected,
            report.failed
        );

        report
    }

    async fn ingest_one(&self, snapshot: &MarketSnapshot) -> RecordOutcome {
        if let Err(e) = snapshot.validate() {
            log::warn!("⚠️  Rejected invalid snapshot {}: {}", snapshot.market, e);
            return RecordOutcome::Rejected;
        }

        let lock = self.market_locks.for_market(&snapshot.market).await;
        let outcome = {
            let _guard = lock.lock().await;

            match self.admit_and_insert(snapshot).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("❌ Failed to store snapshot {} @ {}: {}", snapshot.market, snapshot.updated, e);
                    RecordOutcome::Failed
                }
            }
        };

        drop(lock);
        self.market_locks.release(&snapshot.market).await;

        outcome
    }

    async fn admit_and_insert(&self, snapshot: &MarketSnapshot) -> Result<RecordOutcome, StoreError> {
        let last = self.store.query_latest(&snapshot.market).await?;

        match self.policy.should_admit(snapshot, last.as_ref()) {
            Admission::Admit => {}
            Admission::NotAligned => {
                log::warn!(
                    "⚠️  Rejected {} @ {}: not aligned to an hour boundary",
                    snapshot.market,
                    snapshot.updated
                );
                return Ok(RecordOutcome::Rejected);
            }
            Admission::TooClose { offset_minutes } => {
                log::warn!(
                    "⚠️  Rejected {} @ {}: only {:.1} min after last stored snapshot",
                    snapshot.market,
                    snapshot.updated,
                    offset_minutes
                );
                return Ok(RecordOutcome::Rejected);
            }
        }

        let rows = self.store.insert(snapshot).await?;
        if rows == 0 {
            log::error!(
                "❌ Insert affected 0 rows for {} @ {}",
                snapshot.market,
                snapshot.updated
            );
            return Ok(RecordOutcome::Failed);
        }

        log::debug!("✅ Stored {} @ {}", snapshot.market, snapshot.updated);
        Ok(RecordOutcome::Inserted)
    }
}

/// Start snapshot ingestion from a batch channel
///
/// Main loop:
/// 1. Receives snapshot batches from the feed via mpsc channel
/// 2. Runs each batch through `SnapshotIngestor::ingest_batch`
/// 3. Logs totals every `stats_interval_ms`
///
/// Runs until the channel is closed (feed shutdown) and returns the totals.
pub async fn start_snapshot_ingestion(
    mut rx: mpsc::Receiver<Vec<MarketSnapshot>>,
    ingestor: Arc<SnapshotIngestor>,
    stats_interval_ms: u64,
) -> IngestReport {
    log::info!("🚀 Starting snapshot ingestion");
    log::info!("   ├─ Tolerance: -{}m / +{}m", ingestor.policy.earlier_tolerance_minutes, ingestor.policy.later_tolerance_minutes);
    log::info!("   └─ Waiting for snapshot batches...");

    let mut stats_timer = interval(Duration::from_millis(stats_interval_ms.max(1)));
    let mut totals = IngestReport::default();
    let mut since_last_log = IngestReport::default();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(batch) = received else {
                    log::warn!("⚠️  Snapshot channel closed, stopping ingestion");
                    break;
                };

                let report = ingestor.ingest_batch(batch).await;

                if report.inserted < report.submitted {
                    log::info!(
                        "📥 Batch: {}/{} inserted ({} rejected, {} failed)",
                        report.inserted, report.submitted, report.rejected, report.failed
                    );
                } else {
                    log::info!("📥 Batch: {}/{} inserted", report.inserted, report.submitted);
                }

                totals.merge(report);
                since_last_log.merge(report);
            }

            _ = stats_timer.tick() => {
                if since_last_log.submitted > 0 {
                    log::info!(
                        "📊 Ingestion: {} submitted, {} inserted since last report (total inserted: {})",
                        since_last_log.submitted,
                        since_last_log.inserted,
                        totals.inserted
                    );
                    since_last_log = IngestReport::default();
                }
            }
        }
    }

    log::info!(
        "✅ Snapshot ingestion stopped ({} inserted of {} submitted)",
        totals.inserted,
        totals.submitted
    );

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::SqliteSnapshotStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashSet;
    use tempfile::NamedTempFile;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn make_snapshot(base: &str, updated: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot::new("USD", base, 10.0, 1_000.0, ["test"], updated).unwrap()
    }

    /// Helper to create a file-backed store with schema
    async fn create_test_store() -> (NamedTempFile, Arc<SqliteSnapshotStore>) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(SqliteSnapshotStore::open(temp_file.path()).unwrap());
        store.init_schema().await.unwrap();
        (temp_file, store)
    }

    /// Store wrapper whose inserts for selected bases affect 0 rows or error
    struct FlakyStore {
        inner: Arc<SqliteSnapshotStore>,
        silent_failures: HashSet<String>,
        hard_failures: HashSet<String>,
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn init_schema(&self) -> Result<(), StoreError> {
            self.inner.init_schema().await
        }

        async fn insert(&self, snapshot: &MarketSnapshot) -> Result<usize, StoreError> {
            if self.silent_failures.contains(&snapshot.market.base_symbol) {
                return Ok(0);
            }
            if self.hard_failures.contains(&snapshot.market.base_symbol) {
                return Err(StoreError::LockPoisoned);
            }
            self.inner.insert(snapshot).await
        }

        async fn query_latest(&self, market: &Market) -> Result<Option<MarketSnapshot>, StoreError> {
            self.inner.query_latest(market).await
        }

        async fn query_range(
            &self,
            quote_symbol: &str,
            base_symbol: Option<&str>,
            updated_since: DateTime<Utc>,
        ) -> Result<Vec<MarketSnapshot>, StoreError> {
            self.inner.query_range(quote_symbol, base_symbol, updated_since).await
        }
    }

    #[tokio::test]
    async fn test_batch_admits_aligned_and_rejects_off_schedule() {
        let (_temp, store) = create_test_store().await;
        let ingestor = SnapshotIngestor::new(store.clone(), TimeBucketPolicy::new(5, 10));

        let report = ingestor
            .ingest_batch(vec![
                make_snapshot("BTC", at(10, 2)),
                make_snapshot("ETH", at(10, 30)),
                make_snapshot("SOL", at(9, 58)),
            ])
            .await;

        assert_eq!(
            report,
            IngestReport { submitted: 3, inserted: 2, rejected: 1, failed: 0 }
        );
        let eth = Market::new("USD", "ETH").unwrap();
        assert!(store.query_latest(&eth).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_bucket_within_batch_keeps_earliest() {
        let (_temp, store) = create_test_store().await;
        let ingestor = SnapshotIngestor::new(store.clone(), TimeBucketPolicy::new(5, 10));

        // Unordered input: 10:05 arrives before 9:58
        let report = ingestor
            .ingest_batch(vec![make_snapshot("BTC", at(10, 5)), make_snapshot("BTC", at(9, 58))])
            .await;

        assert_eq!(report.inserted, 1);
        assert_eq!(report.rejected, 1);

        let btc = Market::new("USD", "BTC").unwrap();
        let latest = store.query_latest(&btc).await.unwrap().unwrap();
        assert_eq!(latest.updated, at(9, 58));
    }

    #[tokio::test]
    async fn test_successive_hours_admitted_across_batches() {
        let (_temp, store) = create_test_store().await;
        let ingestor = SnapshotIngestor::new(store.clone(), TimeBucketPolicy::new(5, 10));

        assert_eq!(ingestor.ingest_batch(vec![make_snapshot("BTC", at(10, 0))]).await.inserted, 1);
        assert_eq!(ingestor.ingest_batch(vec![make_snapshot("BTC", at(10, 8))]).await.rejected, 1);
        assert_eq!(ingestor.ingest_batch(vec![make_snapshot("BTC", at(11, 1))]).await.inserted, 1);

        let rows = store.query_range("USD", Some("BTC"), at(0, 0)).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_snapshot_rejected() {
        let (_temp, store) = create_test_store().await;
        let ingestor = SnapshotIngestor::new(store, TimeBucketPolicy::default());

        let mut bad = make_snapshot("BTC", at(10, 0));
        bad.market_cap = -5.0;

        let report = ingestor.ingest_batch(vec![bad]).await;
        assert_eq!(report.rejected, 1);
        assert_eq!(report.inserted, 0);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_batch() {
        let (_temp, inner) = create_test_store().await;
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            silent_failures: ["ETH".to_string()].into_iter().collect(),
            hard_failures: ["XRP".to_string()].into_iter().collect(),
        });
        let ingestor = SnapshotIngestor::new(store, TimeBucketPolicy::default());

        let report = ingestor
            .ingest_batch(vec![
                make_snapshot("BTC", at(10, 0)),
                make_snapshot("ETH", at(10, 0)),
                make_snapshot("SOL", at(10, 0)),
                make_snapshot("XRP", at(10, 0)),
            ])
            .await;

        assert_eq!(
            report,
            IngestReport { submitted: 4, inserted: 2, rejected: 0, failed: 2 }
        );
        let rows = inner.query_range("USD", None, at(0, 0)).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_batches_same_market_insert_once() {
        let (_temp, store) = create_test_store().await;
        let ingestor = Arc::new(SnapshotIngestor::new(store.clone(), TimeBucketPolicy::new(5, 10)));

        let mut handles = Vec::new();
        for minute in 0..8 {
            let ingestor = ingestor.clone();
            handles.push(tokio::spawn(async move {
                ingestor.ingest_batch(vec![make_snapshot("BTC", at(10, minute))]).await
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            inserted += handle.await.unwrap().inserted;
        }

        assert_eq!(inserted, 1);
        let rows = store.query_range("USD", Some("BTC"), at(0, 0)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(ingestor.market_locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_market_locks_released_after_batch() {
        let (_temp, store) = create_test_store().await;
        let ingestor = SnapshotIngestor::new(store, TimeBucketPolicy::new(5, 10));

        let batch = ["BTC", "ETH", "SOL", "XRP"]
            .iter()
            .map(|base| make_snapshot(base, at(10, 0)))
            .collect();
        let report = ingestor.ingest_batch(batch).await;

        assert_eq!(report.inserted, 4);
        assert_eq!(ingestor.market_locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_channel_ingestion_runs_until_closed() {
        let (_temp, store) = create_test_store().await;
        let ingestor = Arc::new(SnapshotIngestor::new(store.clone(), TimeBucketPolicy::new(5, 10)));
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(start_snapshot_ingestion(rx, ingestor, 1_000));

        tx.send(vec![make_snapshot("BTC", at(10, 0)), make_snapshot("ETH", at(10, 1))])
            .await
            .unwrap();
        tx.send(vec![make_snapshot("BTC", at(10, 3))]).await.unwrap();
        tx.send(vec![make_snapshot("BTC", at(11, 0))]).await.unwrap();
        drop(tx);

        let totals = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            totals,
            IngestReport { submitted: 4, inserted: 3, rejected: 1, failed: 0 }
        );
    }
}
