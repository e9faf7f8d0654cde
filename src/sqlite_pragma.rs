//! Shared SQLite connection tuning
//!
//! Applied to every connection the snapshot store opens.

use rusqlite::Connection;

/// Pages written to the WAL before SQLite checkpoints automatically
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1_000;

/// Apply WAL journaling and the read/write tuning used by the store
///
/// - `journal_mode = WAL`
/// - `synchronous = NORMAL`
/// - `temp_store = MEMORY`
/// - `mmap_size = 256 MiB`
/// - `cache_size = -64000` (64 MB)
/// - `wal_autocheckpoint = 1000`
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        // In-memory databases report "memory" and cannot switch
        log::debug!("SQLite journal_mode stayed at {}", mode);
    }

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456_i64)?;
    conn.pragma_update(None, "cache_size", -64_000_i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wal_checkpoint_configured() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("pragma.db");
        let conn = Connection::open(&db_path).unwrap();

        apply_optimized_pragmas(&conn).unwrap();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        let checkpoint: i64 = conn
            .query_row("PRAGMA wal_autocheckpoint", [], |row| row.get(0))
            .unwrap();
        assert_eq!(checkpoint, WAL_AUTOCHECKPOINT_PAGES);
    }

    #[test]
    fn test_in_memory_connection_accepted() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(apply_optimized_pragmas(&conn).is_ok());
    }
}
