//! Error types for the migration ledger.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during ledger operations. All of them are fatal for
/// the run: without a reliable ledger, resuming risks silent data loss.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the ledger file.
    #[error("Failed to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a ledger schema migration.
    #[error("Ledger migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("Ledger query failed: {0}")]
    Query(String),

    /// The ledger schema version is newer than supported.
    #[error("Ledger schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StateError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
