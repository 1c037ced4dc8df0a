//! Durable migration ledger.
//!
//! Every upload attempt (success or failure) is appended as one row, and the
//! maximum recorded photo id determines where the next run resumes. A failed
//! photo is therefore never retried automatically; it is skipped on resume
//! and only re-attempted by re-running with an explicit `--min-id`.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStateDb, StateDb};
pub use error::StateError;
pub use types::{LedgerSummary, MigrationRecord};
