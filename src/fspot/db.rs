//! F-Spot database reader: tag path resolution and photo streaming.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use percent_encoding::percent_decode_str;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tokio::sync::mpsc;

use super::error::FspotError;
use super::types::{Photo, SkippedRow, SourceItem};

/// Mapping from tag id to its absolute path (slash-joined ancestor names,
/// root to self). Built once per run, then shared read-only.
pub type TagPathIndex = HashMap<i64, String>;

/// How many base photo rows are fetched per query while streaming.
const PHOTO_CHUNK: usize = 256;

/// Read-only handle to an F-Spot photo database.
pub struct FspotDb {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    /// Guards are scoped so they are never held across an await point.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for FspotDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FspotDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Base columns of one photos row, fetched before tag and path resolution.
struct PhotoRow {
    id: i64,
    description: String,
    base_uri: String,
    filename: String,
    time: i64,
    default_version_id: i64,
}

impl FspotDb {
    /// Open an F-Spot database read-only.
    pub fn open(path: &Path) -> Result<Self, FspotError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| FspotError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, FspotError> {
        let conn = Connection::open_in_memory().map_err(|e| FspotError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Run arbitrary SQL against the underlying connection (for building
    /// test fixtures).
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) {
        self.conn.lock().unwrap().execute_batch(sql).unwrap();
    }

    /// Build the tag path index by loading all tags once and walking each
    /// tag's category chain to the root.
    ///
    /// A tag with `category_id = 0` is a root and maps to its own name.
    /// The category graph is assumed acyclic; a cycle in the source data is
    /// reported as `TagCycle` rather than looping forever.
    pub fn build_tag_path_index(&self) -> Result<TagPathIndex, FspotError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FspotError::Query(e.to_string()))?;

        let mut stmt = conn
            .prepare("SELECT id, name, category_id FROM tags")
            .map_err(FspotError::query)?;
        let tags: Vec<(i64, String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(FspotError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(FspotError::query)?;

        let by_id: HashMap<i64, (&str, i64)> = tags
            .iter()
            .map(|(id, name, parent)| (*id, (name.as_str(), *parent)))
            .collect();

        let mut index = TagPathIndex::with_capacity(tags.len());
        for (id, name, mut parent) in tags.iter().map(|(i, n, p)| (*i, n.clone(), *p)) {
            let mut path = name;
            let mut depth = 0usize;
            while parent != 0 {
                depth += 1;
                if depth > by_id.len() {
                    return Err(FspotError::TagCycle { tag_id: id });
                }
                match by_id.get(&parent) {
                    Some((parent_name, grandparent)) => {
                        path = format!("{}/{}", parent_name, path);
                        parent = *grandparent;
                    }
                    None => {
                        // Dangling category reference; treat as root.
                        tracing::warn!(tag_id = id, category_id = parent, "Missing parent tag");
                        break;
                    }
                }
            }
            index.insert(id, path);
        }

        tracing::debug!(tags = index.len(), "Built tag path index");
        Ok(index)
    }

    /// Stream photos with `id >= min_id` in ascending id order into `tx`.
    ///
    /// Rows are fetched in chunks of [`PHOTO_CHUNK`] by re-querying from the
    /// last streamed id, so channel backpressure bounds memory even for large
    /// libraries. Rows whose stored URI cannot be decoded are sent as
    /// `SkippedRow` so the ledger still records the attempt; query failures
    /// and missing version rows abort the stream. Returns once all matching
    /// rows have been sent or the receiver is gone.
    pub async fn stream_photos(
        &self,
        min_id: i64,
        index: &TagPathIndex,
        tx: &mpsc::Sender<SourceItem>,
    ) -> Result<(), FspotError> {
        tracing::info!(min_id, "Streaming photos");

        let mut cursor = min_id;
        loop {
            let rows = self.photo_rows(cursor, PHOTO_CHUNK)?;
            let Some(last_id) = rows.last().map(|row| row.id) else {
                return Ok(());
            };
            cursor = last_id + 1;

            for row in rows {
                let item = self.resolve_row(row, index)?;
                if tx.send(item).await.is_err() {
                    // Receiver dropped; the pipeline has already shut down.
                    return Ok(());
                }
            }
        }
    }

    /// Fetch the base columns of up to `limit` photos with `id >= min_id`,
    /// ascending.
    fn photo_rows(&self, min_id: i64, limit: usize) -> Result<Vec<PhotoRow>, FspotError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FspotError::Query(e.to_string()))?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT id, description, base_uri, filename, time, default_version_id \
                 FROM photos WHERE id >= ?1 ORDER BY id LIMIT ?2",
            )
            .map_err(FspotError::query)?;

        let rows = stmt
            .query_map([min_id, limit as i64], |row| {
                Ok(PhotoRow {
                    id: row.get(0)?,
                    description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    base_uri: row.get(2)?,
                    filename: row.get(3)?,
                    time: row.get(4)?,
                    default_version_id: row.get(5)?,
                })
            })
            .map_err(FspotError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(FspotError::query)?;

        Ok(rows)
    }

    /// Resolve one base row into a full Photo: tags, tag paths and the
    /// effective file location.
    ///
    /// Per-photo failures (an undecodable URI) become a `SkippedRow` item so
    /// the ledger records the attempt; anything else means the source data
    /// is inconsistent or unreadable and propagates as fatal.
    fn resolve_row(
        &self,
        row: PhotoRow,
        index: &TagPathIndex,
    ) -> Result<SourceItem, FspotError> {
        let id = row.id;
        match self.resolve_row_inner(row, index) {
            Ok(photo) => Ok(Ok(photo)),
            Err(error) if error.is_per_photo() => Ok(Err(SkippedRow { id, error })),
            Err(error) => Err(error),
        }
    }

    fn resolve_row_inner(
        &self,
        row: PhotoRow,
        index: &TagPathIndex,
    ) -> Result<Photo, FspotError> {
        let (base_uri, filename) = self.effective_location(&row)?;
        let path = uri_to_path(&base_uri, &filename)?;

        let mut tags = Vec::new();
        let mut tag_paths = Vec::new();
        for (tag_id, name) in self.tags_for_photo(row.id)? {
            tag_paths.push(index.get(&tag_id).cloned().unwrap_or_else(|| name.clone()));
            tags.push(name);
        }
        tags.sort_unstable();
        tag_paths.sort_unstable();

        let taken = chrono::DateTime::from_timestamp(row.time, 0)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH);

        Ok(Photo {
            id: row.id,
            description: row.description,
            filename,
            path,
            taken,
            tags,
            tag_paths,
        })
    }

    /// Determine the effective (base_uri, filename) pair. Version 1 is the
    /// import original stored on the photo row itself; any other default
    /// version lives in photo_versions.
    fn effective_location(&self, row: &PhotoRow) -> Result<(String, String), FspotError> {
        if row.default_version_id == 1 {
            return Ok((row.base_uri.clone(), row.filename.clone()));
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| FspotError::Query(e.to_string()))?;

        conn.query_row(
            "SELECT base_uri, filename FROM photo_versions \
             WHERE photo_id = ?1 AND version_id = ?2",
            [row.id, row.default_version_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(FspotError::query)?
        .ok_or(FspotError::VersionNotFound {
            photo_id: row.id,
            version_id: row.default_version_id,
        })
    }

    /// Tag (id, name) pairs attached to a photo.
    fn tags_for_photo(&self, photo_id: i64) -> Result<Vec<(i64, String)>, FspotError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FspotError::Query(e.to_string()))?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT t.id, t.name FROM tags t \
                 JOIN photo_tags pt ON pt.tag_id = t.id \
                 WHERE pt.photo_id = ?1",
            )
            .map_err(FspotError::query)?;

        let tags = stmt
            .query_map([photo_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(FspotError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(FspotError::query)?;

        Ok(tags)
    }
}

/// Convert a stored `base_uri`/`filename` pair into a filesystem path.
///
/// F-Spot stores `file://` URIs with percent-encoded segments. Decoding can
/// fail when the encoded bytes are not valid UTF-8; that is a per-photo
/// `Decode` error, not a run failure.
fn uri_to_path(base_uri: &str, filename: &str) -> Result<PathBuf, FspotError> {
    let joined = format!("{}/{}", base_uri.trim_end_matches('/'), filename);
    let stripped = joined.strip_prefix("file://").unwrap_or(&joined);
    let decoded = percent_decode_str(stripped)
        .decode_utf8()
        .map_err(|e| FspotError::Decode {
            uri: joined.clone(),
            reason: e.to_string(),
        })?;
    Ok(PathBuf::from(decoded.as_ref()))
}

/// Minimal slice of the F-Spot schema used by the reader (for building test
/// fixtures here and in the pipeline tests).
#[cfg(test)]
pub(crate) const FIXTURE_SCHEMA: &str = r#"
        CREATE TABLE tags (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category_id INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE photos (
            id INTEGER PRIMARY KEY,
            time INTEGER NOT NULL,
            base_uri TEXT NOT NULL,
            filename TEXT NOT NULL,
            description TEXT,
            default_version_id INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE photo_tags (
            photo_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL
        );
        CREATE TABLE photo_versions (
            photo_id INTEGER NOT NULL,
            version_id INTEGER NOT NULL,
            base_uri TEXT NOT NULL,
            filename TEXT NOT NULL
        );
    "#;
