//! Error types for the snapshot pipeline
//!
//! One enum per concern. Library code never panics on these paths; callers
//! decide whether an error is fatal (retrieval, allocation) or only logged
//! (per-record ingestion failures).

use thiserror::Error;

/// Snapshot construction/validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("{0} symbol is empty")]
    EmptySymbol(&'static str),

    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be finite")]
    NonFinite { field: &'static str },
}

/// Snapshot store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store connection lock poisoned")]
    LockPoisoned,

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
}

/// EMA smoothing failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmoothingError {
    #[error("Cannot smooth an empty series")]
    EmptySeries,

    #[error("EMA needs at least one period")]
    InvalidPeriods,
}

/// Historical retrieval + smoothing failures
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Smoothing failed for {base_symbol}: {source}")]
    Smoothing {
        base_symbol: String,
        #[source]
        source: SmoothingError,
    },
}

/// Allocation ranking failures
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("nth_root must be finite and > 0, got {0}")]
    InvalidNthRoot(f64),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Snapshot feed failures
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed API error: status {0}")]
    Status(u16),

    #[error("Invalid snapshot from feed: {0}")]
    Snapshot(#[from] SnapshotError),
}
