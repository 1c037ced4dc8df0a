//! Upload engine — bounded-concurrency worker pool that drains the photo
//! queue, uploads content and claims to the sink, and funnels every outcome
//! through a single writer task into the ledger.
//!
//! Per-photo failures are recorded and skipped; nothing inside a run retries
//! them. Ledger failures are fatal.

pub mod error;
pub mod sink;

use std::sync::Arc;

use anyhow::Result;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::fspot::{Photo, SourceItem};
use crate::state::{MigrationRecord, StateDb};
pub use error::UploadError;
pub use sink::{BlobRef, Claim, ClaimOp, HttpSink, Sink, SinkError};

/// Default number of concurrent upload workers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Counts for one migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    /// Photos the pipeline attempted (one ledger record each).
    pub attempted: u64,
    /// Attempts that produced a permanode.
    pub succeeded: u64,
    /// Attempts recorded with an error.
    pub failed: u64,
}

/// Run the migration pipeline until the photo channel closes.
///
/// Workers process up to `concurrency` photos at once; completion order is
/// unordered relative to source order. Every item that arrives on `photos`
/// yields exactly one ledger record. Returns the run's statistics, or an
/// error when the ledger itself fails (fatal — the run cannot continue
/// without durable state).
pub async fn migrate_photos(
    sink: Arc<dyn Sink>,
    state: Arc<dyn StateDb>,
    photos: mpsc::Receiver<SourceItem>,
    concurrency: usize,
) -> Result<MigrationStats> {
    let concurrency = concurrency.max(1);
    let (results_tx, mut results_rx) = mpsc::channel::<MigrationRecord>(concurrency * 2);

    // Single-writer funnel: results are produced concurrently but persisted
    // one at a time, so the ledger never sees interleaved writes.
    let writer = tokio::spawn(async move {
        let mut stats = MigrationStats::default();
        while let Some(record) = results_rx.recv().await {
            state.record(&record).await?;
            stats.attempted += 1;
            if record.is_success() {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }
        Ok::<_, crate::state::StateError>(stats)
    });

    let mut results = ReceiverStream::new(photos)
        .map(|item| {
            let sink = Arc::clone(&sink);
            async move { process_item(sink.as_ref(), item).await }
        })
        .buffer_unordered(concurrency);

    while let Some(record) = results.next().await {
        match &record.error {
            Some(err) => {
                tracing::error!(id = record.fspot_id, error = %err, "Could not store photo")
            }
            None => {
                tracing::info!(id = record.fspot_id, permanode = %record.permanode, "Stored photo")
            }
        }
        if results_tx.send(record).await.is_err() {
            // Writer is gone; its error surfaces below.
            break;
        }
    }
    drop(results);
    drop(results_tx);

    let stats = writer.await??;
    Ok(stats)
}

/// Worker boundary: convert any per-photo failure into a failed record.
async fn process_item(sink: &dyn Sink, item: SourceItem) -> MigrationRecord {
    match item {
        Ok(photo) => match process_photo(sink, &photo).await {
            Ok(permanode) => MigrationRecord::success(photo.id, permanode.0),
            Err(e) => MigrationRecord::failure(photo.id, e),
        },
        // The reader could not resolve this row; record the attempt so the
        // resume cursor advances past it.
        Err(skipped) => MigrationRecord::failure(skipped.id, skipped.error),
    }
}

/// Migrate one photo: store content, create a permanode, attach claims.
pub async fn process_photo(sink: &dyn Sink, photo: &Photo) -> Result<BlobRef, UploadError> {
    let file =
        tokio::fs::File::open(&photo.path)
            .await
            .map_err(|source| UploadError::FileUnavailable {
                path: photo.path.clone(),
                source,
            })?;

    let content = sink.store_file(&photo.filename, file).await?;
    let permanode = sink.create_permanode().await?;

    let claims = build_claims(photo, &content, &permanode);
    upload_claims(sink, &claims).await?;

    Ok(permanode)
}

/// The claim set describing one photo on its permanode.
///
/// Attribute names match what the store's photo browser expects: `content`
/// links the bytes, `fspot_id`/`fspot_time` preserve provenance, `tag` and
/// `fspot_tag_path` are multi-valued. An empty description is omitted
/// entirely rather than set to "".
fn build_claims(photo: &Photo, content: &BlobRef, permanode: &BlobRef) -> Vec<Claim> {
    let mut claims = vec![
        Claim::set(permanode, "content", content.0.clone()),
        Claim::set(permanode, "fspot_id", photo.id.to_string()),
        Claim::set(permanode, "fspot_time", photo.taken.to_rfc3339()),
    ];
    if !photo.description.is_empty() {
        claims.push(Claim::set(permanode, "description", photo.description.clone()));
    }
    for tag in &photo.tags {
        claims.push(Claim::add(permanode, "tag", tag.clone()));
    }
    for path in &photo.tag_paths {
        claims.push(Claim::add(permanode, "fspot_tag_path", path.clone()));
    }
    claims
}

/// Scatter-gather claim upload: all claims are issued concurrently and all
/// are driven to completion, but the photo's reported error is the first one
/// to arrive. Arrival order is nondeterministic; this is best-effort fan-out,
/// not a transaction.
async fn upload_claims(sink: &dyn Sink, claims: &[Claim]) -> Result<(), SinkError> {
    let mut uploads: FuturesUnordered<_> =
        claims.iter().map(|claim| sink.upload_claim(claim)).collect();

    let mut first_error = None;
    while let Some(result) = uploads.next().await {
        if let Err(e) = result {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::fspot::db::FIXTURE_SCHEMA;
    use crate::fspot::{FspotDb, FspotError, SkippedRow};
    use crate::state::{SqliteStateDb, StateError};
    use super::sink::ClaimOp;

    /// In-memory sink recording every operation.
    #[derive(Default)]
    struct MockSink {
        claims: Mutex<Vec<Claim>>,
        stored_files: Mutex<Vec<String>>,
        permanode_counter: AtomicU64,
        fail_store: bool,
        /// Fail any claim upload whose attr matches.
        fail_claim_attr: Option<String>,
    }

    #[async_trait]
    impl Sink for MockSink {
        async fn store_file(
            &self,
            filename: &str,
            _file: tokio::fs::File,
        ) -> Result<BlobRef, SinkError> {
            if self.fail_store {
                return Err(SinkError::Status {
                    status: 500,
                    url: "mock://files".into(),
                });
            }
            self.stored_files.lock().unwrap().push(filename.to_string());
            Ok(BlobRef(format!("sha224-content-{}", filename)))
        }

        async fn create_permanode(&self) -> Result<BlobRef, SinkError> {
            let n = self.permanode_counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(BlobRef(format!("sha224-perma-{}", n)))
        }

        async fn upload_claim(&self, claim: &Claim) -> Result<(), SinkError> {
            self.claims.lock().unwrap().push(claim.clone());
            if self.fail_claim_attr.as_deref() == Some(claim.attr.as_str()) {
                return Err(SinkError::Status {
                    status: 500,
                    url: "mock://claims".into(),
                });
            }
            Ok(())
        }

        async fn ping(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    /// Ledger that refuses every write, for fatal-path tests.
    struct FailingStateDb;

    #[async_trait]
    impl StateDb for FailingStateDb {
        async fn record(&self, _record: &MigrationRecord) -> Result<(), StateError> {
            Err(StateError::Query("disk full".into()))
        }
        async fn resume_position(&self) -> Result<i64, StateError> {
            Ok(1)
        }
        async fn summary(&self) -> Result<crate::state::LedgerSummary, StateError> {
            Err(StateError::Query("disk full".into()))
        }
        async fn failed_records(&self) -> Result<Vec<MigrationRecord>, StateError> {
            Ok(Vec::new())
        }
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fspot_migrate_tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_photo(id: i64, path: PathBuf) -> Photo {
        Photo {
            id,
            description: String::new(),
            filename: path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("photo.jpg")
                .to_string(),
            path,
            taken: chrono::Utc.with_ymd_and_hms(2009, 8, 11, 12, 0, 0).unwrap(),
            tags: vec!["Summer".into()],
            tag_paths: vec!["Family/Summer".into()],
        }
    }

    fn photo_on_disk(dir: &std::path::Path, id: i64) -> Photo {
        let path = dir.join(format!("img_{}.jpg", id));
        std::fs::write(&path, b"jpeg bytes").unwrap();
        make_photo(id, path)
    }

    #[tokio::test]
    async fn test_process_photo_uploads_expected_claims() {
        let dir = test_dir("claims");
        let photo = photo_on_disk(&dir, 5);
        let sink = MockSink::default();

        let permanode = process_photo(&sink, &photo).await.unwrap();
        assert_eq!(permanode.0, "sha224-perma-1");

        let claims = sink.claims.lock().unwrap();
        let find = |attr: &str| -> Vec<&Claim> {
            claims.iter().filter(|c| c.attr == attr).collect()
        };

        assert_eq!(find("content")[0].value, "sha224-content-img_5.jpg");
        assert_eq!(find("fspot_id")[0].value, "5");
        assert!(find("fspot_time")[0].value.starts_with("2009-08-11T12:00:00"));
        assert_eq!(find("tag")[0].value, "Summer");
        assert_eq!(find("fspot_tag_path")[0].value, "Family/Summer");
        // Empty description: no claim at all.
        assert!(find("description").is_empty());
        assert!(claims.iter().all(|c| c.node == permanode));
    }

    #[tokio::test]
    async fn test_process_photo_includes_nonempty_description() {
        let dir = test_dir("description");
        let mut photo = photo_on_disk(&dir, 1);
        photo.description = "at the beach".into();
        let sink = MockSink::default();

        process_photo(&sink, &photo).await.unwrap();

        let claims = sink.claims.lock().unwrap();
        let desc: Vec<_> = claims.iter().filter(|c| c.attr == "description").collect();
        assert_eq!(desc.len(), 1);
        assert_eq!(desc[0].value, "at the beach");
        assert_eq!(desc[0].op, ClaimOp::Set);
    }

    #[tokio::test]
    async fn test_missing_file_is_file_unavailable() {
        let photo = make_photo(9, PathBuf::from("/nonexistent/img.jpg"));
        let sink = MockSink::default();

        let err = process_photo(&sink, &photo).await.unwrap_err();
        assert!(matches!(err, UploadError::FileUnavailable { .. }));
        // Nothing was uploaded.
        assert!(sink.stored_files.lock().unwrap().is_empty());
        assert!(sink.claims.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_failure_fails_photo_but_issues_all_claims() {
        let dir = test_dir("claim_failure");
        let photo = photo_on_disk(&dir, 2);
        let sink = MockSink {
            fail_claim_attr: Some("fspot_id".into()),
            ..MockSink::default()
        };

        let err = process_photo(&sink, &photo).await.unwrap_err();
        assert!(matches!(err, UploadError::Sink(SinkError::Status { status: 500, .. })));
        // Scatter-gather: every claim was still attempted.
        assert_eq!(sink.claims.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_process_item_converts_skipped_row() {
        let sink = MockSink::default();
        let item: SourceItem = Err(SkippedRow {
            id: 13,
            error: FspotError::Decode {
                uri: "file:///bad".into(),
                reason: "invalid utf-8".into(),
            },
        });

        let record = process_item(&sink, item).await;
        assert_eq!(record.fspot_id, 13);
        assert!(!record.is_success());
        assert_eq!(record.permanode, "");
    }

    async fn run_pipeline(
        sink: Arc<dyn Sink>,
        state: Arc<dyn StateDb>,
        items: Vec<SourceItem>,
        concurrency: usize,
    ) -> Result<MigrationStats> {
        let (tx, rx) = mpsc::channel(8);
        let feeder = tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        let result = migrate_photos(sink, state, rx, concurrency).await;
        feeder.await.unwrap();
        result
    }

    #[tokio::test]
    async fn test_pipeline_records_every_item() {
        let dir = test_dir("pipeline");
        let state = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        let sink = Arc::new(MockSink::default());

        let items: Vec<SourceItem> = vec![
            Ok(photo_on_disk(&dir, 1)),
            Ok(make_photo(2, PathBuf::from("/nonexistent/img.jpg"))),
            Err(SkippedRow {
                id: 3,
                error: FspotError::Decode {
                    uri: "file:///bad".into(),
                    reason: "invalid utf-8".into(),
                },
            }),
        ];

        let stats = run_pipeline(sink, state.clone(), items, 2).await.unwrap();
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 2);

        // Ledger agrees, and the resume cursor skips all three.
        let summary = state.summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(state.resume_position().await.unwrap(), 4);

        let failed = state.failed_records().await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed[0].error.as_deref().unwrap().contains("/nonexistent"));
    }

    #[tokio::test]
    async fn test_pipeline_concurrent_results_all_recorded() {
        let dir = test_dir("pipeline_concurrent");
        let state = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        let sink = Arc::new(MockSink::default());

        let items: Vec<SourceItem> =
            (1..=20).map(|id| Ok(photo_on_disk(&dir, id))).collect();

        let stats = run_pipeline(sink, state.clone(), items, 8).await.unwrap();
        assert_eq!(stats.attempted, 20);
        assert_eq!(stats.succeeded, 20);

        let summary = state.summary().await.unwrap();
        assert_eq!(summary.total, 20);
        assert_eq!(summary.max_fspot_id, Some(20));
        assert_eq!(state.resume_position().await.unwrap(), 21);
    }

    #[tokio::test]
    async fn test_pipeline_continues_after_per_photo_failure() {
        let dir = test_dir("pipeline_continue");
        let state = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        let sink = Arc::new(MockSink::default());

        let items: Vec<SourceItem> = vec![
            Ok(make_photo(1, PathBuf::from("/nonexistent/a.jpg"))),
            Ok(photo_on_disk(&dir, 2)),
        ];

        let stats = run_pipeline(sink, state, items, 1).await.unwrap();
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_pipeline_ledger_failure_is_fatal() {
        let dir = test_dir("pipeline_fatal");
        let state = Arc::new(FailingStateDb);
        let sink = Arc::new(MockSink::default());

        let items: Vec<SourceItem> = vec![Ok(photo_on_disk(&dir, 1))];
        let result = run_pipeline(sink, state, items, 2).await;
        assert!(result.is_err());
    }

    async fn run_from_source(
        source: &FspotDb,
        start_id: i64,
        sink: Arc<dyn Sink>,
        state: Arc<dyn StateDb>,
    ) -> MigrationStats {
        let index = source.build_tag_path_index().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let producer = async {
            source.stream_photos(start_id, &index, &tx).await.unwrap();
            drop(tx);
        };
        let (_, stats) = tokio::join!(producer, migrate_photos(sink, state, rx, 2));
        stats.unwrap()
    }

    #[tokio::test]
    async fn test_second_run_resumes_past_recorded_ids() {
        let dir = test_dir("resume");
        let source = FspotDb::open_in_memory().unwrap();
        source.execute_batch(FIXTURE_SCHEMA);

        let add_photo = |id: i64| {
            std::fs::write(dir.join(format!("img_{}.jpg", id)), b"jpeg bytes").unwrap();
            source.execute_batch(&format!(
                "INSERT INTO photos VALUES ({}, 100, 'file://{}', 'img_{}.jpg', NULL, 1)",
                id,
                dir.display(),
                id
            ));
        };

        let state = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        for id in 1..=3 {
            add_photo(id);
        }

        let first_sink = Arc::new(MockSink::default());
        let start = state.resume_position().await.unwrap();
        assert_eq!(start, 1);
        let stats = run_from_source(&source, start, first_sink.clone(), state.clone()).await;
        assert_eq!(stats.attempted, 3);
        assert_eq!(first_sink.stored_files.lock().unwrap().len(), 3);

        // More photos arrive between runs; a second pass must re-upload
        // nothing below the resume position.
        add_photo(4);
        add_photo(5);

        let second_sink = Arc::new(MockSink::default());
        let start = state.resume_position().await.unwrap();
        assert_eq!(start, 4);
        let stats = run_from_source(&source, start, second_sink.clone(), state.clone()).await;
        assert_eq!(stats.attempted, 2);

        let mut uploaded = second_sink.stored_files.lock().unwrap().clone();
        uploaded.sort_unstable();
        assert_eq!(uploaded, vec!["img_4.jpg".to_string(), "img_5.jpg".to_string()]);

        let summary = state.summary().await.unwrap();
        assert_eq!(summary.total, 5);
        assert_eq!(state.resume_position().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_pipeline_empty_input() {
        let state = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        let sink = Arc::new(MockSink::default());

        let stats = run_pipeline(sink, state, Vec::new(), 4).await.unwrap();
        assert_eq!(stats, MigrationStats::default());
    }

    #[test]
    fn test_build_claims_cardinality() {
        let photo = Photo {
            id: 1,
            description: String::new(),
            filename: "a.jpg".into(),
            path: PathBuf::from("/p/a.jpg"),
            taken: chrono::Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
            tags: vec!["Beach".into(), "Zoo".into()],
            tag_paths: vec!["Places/Beach".into(), "Places/Zoo".into()],
        };
        let content = BlobRef("sha224-c".into());
        let node = BlobRef("sha224-p".into());
        let claims = build_claims(&photo, &content, &node);
        // 3 base claims + 2 tags + 2 tag paths, no description.
        assert_eq!(claims.len(), 7);
    }
}
