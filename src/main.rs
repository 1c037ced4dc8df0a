//! fspot-migrate — migrate an F-Spot photo library into a content-addressed
//! store.
//!
//! Reads photos, tags, and hierarchical tag paths from the F-Spot SQLite
//! database, uploads each photo's bytes and metadata claims to the store
//! over HTTP with a bounded pool of workers, and records every attempt in an
//! append-only SQLite ledger so interrupted runs resume where they left off.

#![warn(clippy::all)]

mod cli;
mod config;
mod fspot;
mod state;
mod upload;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::Config;
use fspot::{FspotDb, SourceItem};
use state::{SqliteStateDb, StateDb};
use upload::{HttpSink, Sink};

/// Print ledger statistics for `--status`.
async fn run_status(config: &Config) -> anyhow::Result<()> {
    let ledger_path = config.ledger_path();
    if !ledger_path.exists() {
        println!("No migration ledger found at {}", ledger_path.display());
        println!("Run a migration first to create it.");
        return Ok(());
    }

    let db = SqliteStateDb::open(&ledger_path)?;
    let summary = db.summary().await?;

    println!("Migration ledger: {}", ledger_path.display());
    println!();
    println!("Attempts:");
    println!("  Total:     {}", summary.total);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    if let Some(max_id) = summary.max_fspot_id {
        println!();
        println!("Highest photo id attempted: {}", max_id);
        println!("Next run resumes from:      {}", max_id + 1);
    }

    if summary.failed > 0 {
        println!();
        println!("Failed photos:");
        for record in db.failed_records().await? {
            println!(
                "  {} - {}",
                record.fspot_id,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Private copy of the photo database, removed when dropped so error paths
/// do not leave it behind.
struct WorkingCopy {
    path: std::path::PathBuf,
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Copy the photo database into the state directory. F-Spot may be running
/// and writing to the original; reading a private copy keeps the scan
/// consistent.
fn make_working_copy(config: &Config) -> anyhow::Result<WorkingCopy> {
    if !config.db_path.exists() {
        anyhow::bail!("Photo database not found at {}", config.db_path.display());
    }
    let copy = config.working_copy_path();
    std::fs::copy(&config.db_path, &copy)?;
    Ok(WorkingCopy { path: copy })
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = Config::from_cli(cli);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .init();

    let sink = HttpSink::new(&config.server);

    if config.ping {
        sink.ping().await?;
        println!("Server {} is reachable", config.server);
        return Ok(());
    }

    if config.status {
        return run_status(&config).await;
    }

    std::fs::create_dir_all(&config.state_directory)?;
    let state: Arc<dyn StateDb> = Arc::new(SqliteStateDb::open(&config.ledger_path())?);

    // --min-id overrides the ledger; otherwise continue past the highest id
    // already attempted.
    let start_id = match config.min_id {
        Some(id) => id,
        None => state.resume_position().await?,
    };
    tracing::info!(
        start_id,
        concurrency = config.concurrency,
        "Starting migration from {}",
        config.db_path.display()
    );

    let working_copy = make_working_copy(&config)?;
    let source = FspotDb::open(&working_copy.path)?;
    let tag_paths = source.build_tag_path_index()?;

    let (tx, rx) = mpsc::channel::<SourceItem>(config.concurrency * 2);
    let reader = tokio::spawn(async move {
        source.stream_photos(start_id, &tag_paths, &tx).await
    });

    let started = Instant::now();
    let stats = upload::migrate_photos(
        Arc::new(sink),
        Arc::clone(&state),
        rx,
        config.concurrency,
    )
    .await?;

    // A source error ends the stream early; surface it after the records
    // already in flight have been persisted.
    reader.await??;

    let elapsed = started.elapsed();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        stats.attempted as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    tracing::info!(
        attempted = stats.attempted,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Migration pass complete in {} ({:.1} photos/sec)",
        format_duration(elapsed),
        rate
    );
    if stats.failed > 0 {
        tracing::warn!(
            "{} photos failed; run with --status to list them. \
             Re-run with --min-id to retry a range.",
            stats.failed
        );
    }

    Ok(())
}
