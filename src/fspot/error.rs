//! Error types for the F-Spot source reader.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading the F-Spot database.
#[derive(Error, Debug)]
pub enum FspotError {
    /// Failed to open the database file.
    #[error("Failed to open F-Spot database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// A query against the source database failed.
    #[error("F-Spot query failed: {0}")]
    Query(String),

    /// A photo references a version row that does not exist.
    #[error("Photo {photo_id} references missing version {version_id}")]
    VersionNotFound { photo_id: i64, version_id: i64 },

    /// The stored file URI could not be decoded to a filesystem path.
    #[error("Cannot decode stored URI {uri:?}: {reason}")]
    Decode { uri: String, reason: String },

    /// The tag category graph contains a cycle.
    #[error("Tag category cycle detected at tag {tag_id}")]
    TagCycle { tag_id: i64 },
}

impl FspotError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    /// Whether this error fails only the photo it occurred on, rather than
    /// the whole run. Only URI decoding is per-photo; everything else means
    /// the source itself is unreadable or inconsistent.
    pub fn is_per_photo(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
