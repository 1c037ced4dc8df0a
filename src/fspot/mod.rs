//! Read-only access to the F-Spot photo database.
//!
//! F-Spot stores its library in a single SQLite file. This module resolves
//! hierarchical tag paths and streams photo rows (with tags and effective
//! file locations) into the migration pipeline.

pub mod db;
pub mod error;
pub mod types;

pub use db::{FspotDb, TagPathIndex};
pub use error::FspotError;
pub use types::{Photo, SkippedRow, SourceItem};
