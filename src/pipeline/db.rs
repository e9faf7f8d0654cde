//! Snapshot store: keyed time-series access pattern + SQLite implementation
//!
//! The pipeline only needs four operations from storage, captured by
//! `SnapshotStore`. Components receive the store as
//! `Arc<dyn SnapshotStore>`, so tests can swap in wrappers or fakes.
//!
//! Table written: `market_snapshots`
//! - one row per admitted snapshot
//! - `UNIQUE(quote_symbol, base_symbol, updated)`: a duplicate insert affects 0 rows
//! - `tags` stored as a JSON array
//! - `updated` stored as unix seconds

use super::error::StoreError;
use super::types::{Market, MarketSnapshot};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS market_snapshots (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    quote_symbol    TEXT NOT NULL,
    base_symbol     TEXT NOT NULL,
    price           REAL NOT NULL,
    market_cap      REAL NOT NULL,
    tags            TEXT NOT NULL DEFAULT '[]',
    updated         INTEGER NOT NULL,
    UNIQUE (quote_symbol, base_symbol, updated)
);
CREATE INDEX IF NOT EXISTS idx_snapshots_market_updated
    ON market_snapshots (quote_symbol, base_symbol, updated DESC);
CREATE INDEX IF NOT EXISTS idx_snapshots_quote_updated
    ON market_snapshots (quote_symbol, updated DESC);
"#;

/// Generic "store records, query by key + time range" contract
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Create the snapshot table and indexes if absent (idempotent)
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Insert one snapshot
    ///
    /// Returns rows affected: 1 on success, 0 when the row was silently
    /// dropped (e.g. same market + timestamp already stored).
    async fn insert(&self, snapshot: &MarketSnapshot) -> Result<usize, StoreError>;

    /// Newest stored snapshot for a market
    async fn query_latest(&self, market: &Market) -> Result<Option<MarketSnapshot>, StoreError>;

    /// Snapshots for a quote symbol (optionally one base symbol) with
    /// `updated >= updated_since`, newest-first
    async fn query_range(
        &self,
        quote_symbol: &str,
        base_symbol: Option<&str>,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>, StoreError>;
}

/// Raw column values before conversion
type SnapshotRow = (String, String, f64, f64, String, i64);

/// SQLite-backed `SnapshotStore`
///
/// A single connection behind a mutex. The lock is never held across an
/// await point: every trait method runs its SQL synchronously.
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database file and apply connection tuning
    ///
    /// Does NOT create the schema; call `init_schema` once at startup.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        log::info!("✅ Snapshot store opened: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, mostly for tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)?;
        log::info!("✅ Snapshot schema ready");
        Ok(())
    }

    async fn insert(&self, snapshot: &MarketSnapshot) -> Result<usize, StoreError> {
        let tags_json = serde_json::to_string(&snapshot.tags)?;
        let conn = self.lock()?;

        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO market_snapshots (
                quote_symbol, base_symbol, price, market_cap, tags, updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                snapshot.market.quote_symbol,
                snapshot.market.base_symbol,
                snapshot.price,
                snapshot.market_cap,
                tags_json,
                snapshot.updated.timestamp(),
            ],
        )?;

        Ok(rows)
    }

    async fn query_latest(&self, market: &Market) -> Result<Option<MarketSnapshot>, StoreError> {
        let row: Option<SnapshotRow> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT quote_symbol, base_symbol, price, market_cap, tags, updated
                 FROM market_snapshots
                 WHERE quote_symbol = ?1 AND base_symbol = ?2
                 ORDER BY updated DESC
                 LIMIT 1",
            )?;

            let row = stmt
                .query_row(params![market.quote_symbol, market.base_symbol], read_row)
                .optional()?;
            row
        };

        row.map(snapshot_from_row).transpose()
    }

    async fn query_range(
        &self,
        quote_symbol: &str,
        base_symbol: Option<&str>,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>, StoreError> {
        let since = updated_since.timestamp();

        let rows: Vec<SnapshotRow> = {
            let conn = self.lock()?;

            match base_symbol {
                Some(base) => {
                    let mut stmt = conn.prepare(
                        "SELECT quote_symbol, base_symbol, price, market_cap, tags, updated
                         FROM market_snapshots
                         WHERE quote_symbol = ?1 AND base_symbol = ?2 AND updated >= ?3
                         ORDER BY updated DESC",
                    )?;
                    let rows = stmt
                        .query_map(params![quote_symbol, base, since], read_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT quote_symbol, base_symbol, price, market_cap, tags, updated
                         FROM market_snapshots
                         WHERE quote_symbol = ?1 AND updated >= ?2
                         ORDER BY updated DESC, base_symbol ASC",
                    )?;
                    let rows = stmt
                        .query_map(params![quote_symbol, since], read_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            }
        };

        rows.into_iter().map(snapshot_from_row).collect()
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn snapshot_from_row(row: SnapshotRow) -> Result<MarketSnapshot, StoreError> {
    let (quote_symbol, base_symbol, price, market_cap, tags_json, updated) = row;

    let tags: BTreeSet<String> = serde_json::from_str(&tags_json)?;
    let updated = DateTime::from_timestamp(updated, 0)
        .ok_or_else(|| StoreError::InvalidRow(format!("timestamp out of range: {}", updated)))?;

    Ok(MarketSnapshot {
        market: Market {
            quote_symbol,
            base_symbol,
        },
        price,
        market_cap,
        tags,
        updated,
    })
}
