//! Types for photos read from the F-Spot database.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::error::FspotError;

/// One migratable photo, fully resolved: effective file location, tag names
/// and absolute tag paths. Independent of the reader that produced it.
#[derive(Debug, Clone)]
pub struct Photo {
    /// F-Spot photo id; monotonically assigned, used as the resume cursor.
    pub id: i64,
    /// Free-text description; often empty.
    pub description: String,
    /// Filename of the effective version.
    pub filename: String,
    /// Absolute filesystem path of the effective version.
    pub path: PathBuf,
    /// When the photo was taken.
    pub taken: DateTime<Utc>,
    /// Flat tag names, sorted.
    pub tags: Vec<String>,
    /// Absolute tag paths (slash-joined ancestor names), sorted.
    /// Same cardinality as `tags`.
    pub tag_paths: Vec<String>,
}

/// A row the reader could enumerate but not fully resolve. Flows through the
/// pipeline so the ledger still records the attempt and the resume cursor
/// advances past it.
#[derive(Debug)]
pub struct SkippedRow {
    pub id: i64,
    pub error: FspotError,
}

/// What the source reader feeds into the work queue.
pub type SourceItem = Result<Photo, SkippedRow>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_item_skipped_carries_id() {
        let item: SourceItem = Err(SkippedRow {
            id: 42,
            error: FspotError::Decode {
                uri: "file:///bad%zz".into(),
                reason: "invalid percent-encoding".into(),
            },
        });
        match item {
            Err(skipped) => {
                assert_eq!(skipped.id, 42);
                assert!(skipped.error.is_per_photo());
            }
            Ok(_) => panic!("expected skipped row"),
        }
    }
}
