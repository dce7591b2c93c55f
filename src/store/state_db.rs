//! Per-folder state database: WAL-mode SQLite holding seen and processed records.
//!
//! Each hotfolder owns `<folder>/.db/hotfolder_state.db`. Records are keyed by
//! item id (the `/`-separated path relative to the folder) and survive restarts.
//! Prefix removals compare a literal prefix with `substr`, so `_` and `%` in
//! file names never widen the match and `job` never covers `job2`.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;

use crate::core::errors::{HfwError, Result};
use crate::core::paths::ID_SEPARATOR;

/// Directory (inside each hotfolder) holding the state database.
pub const STATE_DIR: &str = ".db";
/// State database file name.
pub const STATE_DB_FILE: &str = "hotfolder_state.db";

/// First observation (or last change) of an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeenRecord {
    pub item_id: String,
    pub seen_time: f64,
    pub mtime: f64,
}

/// A job that has been transferred under `mtime`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedRecord {
    pub item_id: String,
    pub processed_time: f64,
    pub mtime: f64,
    pub ready_for_deletion: bool,
}

/// Durable seen/processed bookkeeping for one hotfolder.
///
/// The connection is guarded by a mutex; every operation holds it for the
/// duration of one statement or transaction.
pub struct StateStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl StateStore {
    /// Database location for a hotfolder.
    #[must_use]
    pub fn path_for(folder: &Path) -> PathBuf {
        folder.join(STATE_DIR).join(STATE_DB_FILE)
    }

    /// Open (or create) the store belonging to `folder`.
    pub fn open_for_folder(folder: &Path) -> Result<Self> {
        Self::open(&Self::path_for(folder))
    }

    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| HfwError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── seen_files ────────────────────

    /// Insert or replace the seen record for `item_id`.
    pub fn upsert_seen(&self, item_id: &str, seen_time: f64, mtime: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO seen_files (file_path, seen_time, mtime) VALUES (?1, ?2, ?3)
             ON CONFLICT(file_path) DO UPDATE SET seen_time = excluded.seen_time,
                                                  mtime = excluded.mtime",
        )?
        .execute(params![item_id, seen_time, mtime])?;
        Ok(())
    }

    pub fn seen(&self, item_id: &str) -> Result<Option<SeenRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .prepare_cached("SELECT file_path, seen_time, mtime FROM seen_files WHERE file_path = ?1")?
            .query_row(params![item_id], seen_from_row)
            .optional()?;
        Ok(record)
    }

    /// All seen records, ordered by item id.
    pub fn all_seen(&self) -> Result<Vec<SeenRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT file_path, seen_time, mtime FROM seen_files ORDER BY file_path")?;
        let rows = stmt
            .query_map([], seen_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn remove_seen(&self, item_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn
            .prepare_cached("DELETE FROM seen_files WHERE file_path = ?1")?
            .execute(params![item_id])?;
        Ok(n)
    }

    /// Remove the seen record of `prefix` and of everything nested under it.
    pub fn remove_seen_prefix(&self, prefix: &str) -> Result<usize> {
        let conn = self.conn.lock();
        delete_prefix(&conn, "seen_files", prefix)
    }

    // ──────────────────── processed_files ────────────────────

    /// Record a transfer. Clears any pending deletion flag.
    pub fn upsert_processed(&self, item_id: &str, processed_time: f64, mtime: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO processed_files (file_path, processed_time, mtime, ready_for_deletion)
             VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(file_path) DO UPDATE SET processed_time = excluded.processed_time,
                                                  mtime = excluded.mtime,
                                                  ready_for_deletion = 0",
        )?
        .execute(params![item_id, processed_time, mtime])?;
        Ok(())
    }

    pub fn processed(&self, item_id: &str) -> Result<Option<ProcessedRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .prepare_cached(
                "SELECT file_path, processed_time, mtime, ready_for_deletion
                 FROM processed_files WHERE file_path = ?1",
            )?
            .query_row(params![item_id], processed_from_row)
            .optional()?;
        Ok(record)
    }

    pub fn all_processed(&self) -> Result<Vec<ProcessedRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT file_path, processed_time, mtime, ready_for_deletion
             FROM processed_files ORDER BY file_path",
        )?;
        let rows = stmt
            .query_map([], processed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn remove_processed(&self, item_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn
            .prepare_cached("DELETE FROM processed_files WHERE file_path = ?1")?
            .execute(params![item_id])?;
        Ok(n)
    }

    pub fn remove_processed_prefix(&self, prefix: &str) -> Result<usize> {
        let conn = self.conn.lock();
        delete_prefix(&conn, "processed_files", prefix)
    }

    /// Flag a processed job whose directory was emptied by dissolution.
    ///
    /// Returns `false` when no processed record exists for `item_id`.
    pub fn mark_ready_for_deletion(&self, item_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .prepare_cached("UPDATE processed_files SET ready_for_deletion = 1 WHERE file_path = ?1")?
            .execute(params![item_id])?;
        Ok(n > 0)
    }

    /// Ids of processed jobs flagged for deferred container removal.
    pub fn ready_for_deletion_jobs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT file_path FROM processed_files WHERE ready_for_deletion = 1 ORDER BY file_path",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ──────────────────── maintenance ────────────────────

    /// Remove every record (both tables) at or under `prefix`, atomically.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let seen = delete_prefix(&tx, "seen_files", prefix)?;
        let processed = delete_prefix(&tx, "processed_files", prefix)?;
        tx.commit()?;
        Ok(seen + processed)
    }

    /// Reclaim space after large purges.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .lock()
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("path", &self.path).finish()
    }
}

// ──────────────────── helpers ────────────────────

fn seen_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SeenRecord> {
    Ok(SeenRecord {
        item_id: row.get(0)?,
        seen_time: row.get(1)?,
        mtime: row.get(2)?,
    })
}

fn processed_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedRecord> {
    Ok(ProcessedRecord {
        item_id: row.get(0)?,
        processed_time: row.get(1)?,
        mtime: row.get(2)?,
        ready_for_deletion: row.get::<_, i64>(3)? != 0,
    })
}

fn delete_prefix(conn: &Connection, table: &'static str, prefix: &str) -> Result<usize> {
    let nested = format!("{prefix}{ID_SEPARATOR}");
    let sql = format!(
        "DELETE FROM {table} WHERE file_path = ?1 OR substr(file_path, 1, length(?2)) = ?2"
    );
    let n = conn.prepare_cached(&sql)?.execute(params![prefix, nested])?;
    Ok(n)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[HFW-STATE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS seen_files (
            file_path TEXT PRIMARY KEY,
            seen_time REAL NOT NULL,
            mtime REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_files (
            file_path TEXT PRIMARY KEY,
            processed_time REAL NOT NULL,
            mtime REAL NOT NULL,
            ready_for_deletion INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_processed_ready
            ON processed_files(ready_for_deletion);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
