//! Types for the migration ledger.

/// Outcome of one upload attempt, as persisted in the ledger.
///
/// `permanode` is empty when the upload failed before a permanode was
/// created. `error` carries the failure text for later inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// F-Spot photo id this attempt was for.
    pub fspot_id: i64,
    /// Sink-assigned permanent identifier, or empty on failure.
    pub permanode: String,
    /// Error text if the attempt failed.
    pub error: Option<String>,
}

impl MigrationRecord {
    /// Record a successful upload.
    pub fn success(fspot_id: i64, permanode: String) -> Self {
        Self {
            fspot_id,
            permanode,
            error: None,
        }
    }

    /// Record a failed attempt.
    pub fn failure(fspot_id: i64, error: impl std::fmt::Display) -> Self {
        Self {
            fspot_id,
            permanode: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate view of the ledger, used by `--status`.
#[derive(Debug, Clone)]
pub struct LedgerSummary {
    /// Total attempts recorded.
    pub total: u64,
    /// Attempts that produced a permanode.
    pub succeeded: u64,
    /// Attempts recorded with an error.
    pub failed: u64,
    /// Highest photo id attempted so far, if any.
    pub max_fspot_id: Option<i64>,
}
