//! SQLite maintenance on the application database.
//!
//! Both operations open their own short-lived connection; the application
//! server keeps the database in WAL mode and tolerates concurrent readers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::error::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Row returned by `PRAGMA wal_checkpoint`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointResult {
    /// The checkpoint could not complete because of a concurrent writer
    pub busy: bool,
    /// Frames in the WAL, -1 when the database is not in WAL mode
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}

/// Checkpoint the WAL of `db_path` into the main database file.
///
/// Returns `Ok(None)` without touching anything when the database does not
/// exist yet.
pub fn checkpoint(db_path: &Path) -> Result<Option<CheckpointResult>> {
    if !db_path.exists() {
        tracing::debug!("Skipping checkpoint, {} does not exist", db_path.display());
        return Ok(None);
    }

    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    let (busy, log_frames, checkpointed_frames) =
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| {
            Ok((row.get::<_, i64>(0)?, row.get(1)?, row.get(2)?))
        })?;

    let result = CheckpointResult {
        busy: busy != 0,
        log_frames,
        checkpointed_frames,
    };
    tracing::debug!(?result, "Checkpointed {}", db_path.display());
    Ok(Some(result))
}

/// [`checkpoint`] on the blocking thread pool
pub async fn checkpoint_async(db_path: PathBuf) -> Result<Option<CheckpointResult>> {
    tokio::task::spawn_blocking(move || checkpoint(&db_path))
        .await
        .map_err(|e| Error::Internal(format!("checkpoint task failed: {}", e)))?
}

/// Run `PRAGMA integrity_check`; anything but a single `ok` row fails.
///
/// Opened read-write (never create) so WAL databases can map their
/// shared-memory index.
pub fn integrity_check(db_path: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    let mut stmt = conn.prepare("PRAGMA integrity_check")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.len() == 1 && rows[0] == "ok" {
        Ok(())
    } else {
        Err(Error::Integrity(rows.join("; ")))
    }
}

/// [`integrity_check`] on the blocking thread pool
pub async fn integrity_check_async(db_path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || integrity_check(&db_path))
        .await
        .map_err(|e| Error::Internal(format!("integrity check task failed: {}", e)))?
}
