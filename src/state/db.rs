//! Ledger trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;

use super::error::StateError;
use super::schema;
use super::types::{LedgerSummary, MigrationRecord};

/// Trait for ledger operations.
///
/// Object-safe so the pipeline can hold an `Arc<dyn StateDb>` and tests can
/// substitute an in-memory implementation. All writes go through the single
/// writer task in the upload engine, so implementations only need to be safe
/// for one writer at a time alongside concurrent reads.
#[async_trait]
pub trait StateDb: Send + Sync {
    /// Append one attempt record. Never updates existing rows.
    async fn record(&self, record: &MigrationRecord) -> Result<(), StateError>;

    /// The first photo id not yet attempted: `MAX(fspot_id) + 1`, or `1`
    /// when the ledger is empty. Failed attempts count; they are skipped on
    /// resume, not retried.
    async fn resume_position(&self) -> Result<i64, StateError>;

    /// Aggregate counts over all recorded attempts.
    async fn summary(&self) -> Result<LedgerSummary, StateError>;

    /// Records that were attempted but failed, for inspection.
    async fn failed_records(&self) -> Result<Vec<MigrationRecord>, StateError>;
}

/// SQLite implementation of the migration ledger.
pub struct SqliteStateDb {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    /// Path to the ledger file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStateDb {
    /// Open or create a ledger at the given path.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let conn = Connection::open(path).map_err(|e| StateError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        // WAL keeps the resume-position read cheap while the writer appends.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StateError::Migration)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StateError::Migration)?;

        schema::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory ledger (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }
}

#[async_trait]
impl StateDb for SqliteStateDb {
    async fn record(&self, record: &MigrationRecord) -> Result<(), StateError> {
        let recorded_at = Utc::now().timestamp();

        let conn = self
            .conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))?;

        conn.execute(
            "INSERT INTO migrations (fspot_id, permanode, error, recorded_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.fspot_id,
                record.permanode,
                record.error,
                recorded_at
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn resume_position(&self) -> Result<i64, StateError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))?;

        let max_id: Option<i64> = conn
            .query_row("SELECT MAX(fspot_id) FROM migrations", [], |row| row.get(0))
            .map_err(StateError::query)?;

        Ok(max_id.map_or(1, |id| id + 1))
    }

    async fn summary(&self) -> Result<LedgerSummary, StateError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))?;

        let (total, succeeded, max_fspot_id): (i64, i64, Option<i64>) = conn
            .query_row(
                "SELECT COUNT(*), \
                        COUNT(*) FILTER (WHERE error IS NULL), \
                        MAX(fspot_id) \
                 FROM migrations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(StateError::query)?;

        Ok(LedgerSummary {
            total: total as u64,
            succeeded: succeeded as u64,
            failed: (total - succeeded) as u64,
            max_fspot_id,
        })
    }

    async fn failed_records(&self) -> Result<Vec<MigrationRecord>, StateError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT fspot_id, permanode, error FROM migrations \
                 WHERE error IS NOT NULL ORDER BY fspot_id",
            )
            .map_err(StateError::query)?;

        let records = stmt
            .query_map([], |row| {
                Ok(MigrationRecord {
                    fspot_id: row.get(0)?,
                    permanode: row.get(1)?,
                    error: row.get(2)?,
                })
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resume_position_empty_ledger() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        assert_eq!(db.resume_position().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resume_position_is_max_plus_one() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        for id in [3, 7, 5] {
            db.record(&MigrationRecord::success(id, format!("sha224-{}", id)))
                .await
                .unwrap();
        }
        assert_eq!(db.resume_position().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_failed_attempts_advance_resume_position() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        db.record(&MigrationRecord::success(1, "sha224-a".into()))
            .await
            .unwrap();
        db.record(&MigrationRecord::failure(2, "file missing"))
            .await
            .unwrap();
        assert_eq!(db.resume_position().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_record_is_append_only() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        db.record(&MigrationRecord::failure(4, "first attempt"))
            .await
            .unwrap();
        db.record(&MigrationRecord::success(4, "sha224-retry".into()))
            .await
            .unwrap();

        let summary = db.summary().await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_summary_counts_and_max_id() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        db.record(&MigrationRecord::success(10, "sha224-x".into()))
            .await
            .unwrap();
        db.record(&MigrationRecord::failure(11, "boom"))
            .await
            .unwrap();
        db.record(&MigrationRecord::success(12, "sha224-y".into()))
            .await
            .unwrap();

        let summary = db.summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.max_fspot_id, Some(12));
    }

    #[tokio::test]
    async fn test_summary_empty() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let summary = db.summary().await.unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.max_fspot_id, None);
    }

    #[tokio::test]
    async fn test_failed_records_lists_errors() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        db.record(&MigrationRecord::success(1, "sha224-a".into()))
            .await
            .unwrap();
        db.record(&MigrationRecord::failure(2, "no such file"))
            .await
            .unwrap();

        let failed = db.failed_records().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].fspot_id, 2);
        assert_eq!(failed[0].error.as_deref(), Some("no such file"));
        assert_eq!(failed[0].permanode, "");
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = std::env::temp_dir().join("fspot_migrate_state_tests");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ledger.db");

        let db = SqliteStateDb::open(&path).unwrap();
        db.record(&MigrationRecord::success(1, "sha224-a".into()))
            .await
            .unwrap();
        assert!(path.exists());

        // Reopen and confirm the record survived.
        drop(db);
        let db = SqliteStateDb::open(&path).unwrap();
        assert_eq!(db.resume_position().await.unwrap(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
