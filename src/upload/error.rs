//! Error types for the upload engine.

use std::path::PathBuf;

use thiserror::Error;

use super::sink::SinkError;

/// Per-photo upload failures. These are caught at the worker boundary,
/// recorded in the ledger as the photo's error text, and never abort the
/// run.
#[derive(Error, Debug)]
pub enum UploadError {
    /// The photo's file is missing or unreadable.
    #[error("Cannot open {path}: {source}")]
    FileUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Content upload, permanode creation, or a claim upload failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_unavailable_message_names_path() {
        let err = UploadError::FileUnavailable {
            path: PathBuf::from("/photos/img.jpg"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("/photos/img.jpg"));
    }

    #[test]
    fn test_sink_error_is_transparent() {
        let err = UploadError::Sink(SinkError::Status {
            status: 503,
            url: "http://localhost:3179/claims".into(),
        });
        assert!(err.to_string().contains("503"));
    }
}
