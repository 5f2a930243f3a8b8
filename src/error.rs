// ⚠️ Error taxonomy for the sync layer
// Transport failures abort, validation failures abort before any write,
// per-row write failures are counted in the push report (never raised here).

use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Which step of a pull was running when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStage {
    FetchingPages,
    UploadingSheet,
}

impl PullStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullStage::FetchingPages => "fetching pages",
            PullStage::UploadingSheet => "uploading sheet",
        }
    }
}

impl std::fmt::Display for PullStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    // ========================================================================
    // TRANSPORT
    // ========================================================================
    /// Backing store rejected or failed a request.
    #[error("store error: {0}")]
    Store(String),

    /// Spreadsheet host replied with an error.
    #[error("spreadsheet host error: {0}")]
    Host(String),

    /// Spreadsheet host never answered.
    #[error("spreadsheet host did not respond within {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("bridge channel closed")]
    ChannelClosed,

    // ========================================================================
    // VALIDATION (raised before any write)
    // ========================================================================
    #[error("sheet has no data rows (found {rows} non-blank rows, need a header and at least one record)")]
    EmptySheet { rows: usize },

    #[error("sheet has no column named exactly \"id\"")]
    MissingIdColumn,

    #[error("no snapshot for table \"{table}\": pull the table before pushing")]
    MissingSnapshot { table: String },

    #[error("snapshot for table \"{table}\" was replaced by a newer pull (session {session_version}, current {current_version})")]
    StaleSnapshot {
        table: String,
        session_version: String,
        current_version: String,
    },

    // ========================================================================
    // STORE / IMPORT
    // ========================================================================
    #[error("record \"{id}\" not found in table \"{table}\"")]
    RecordNotFound { table: String, id: String },

    #[error("pull of \"{table}\" failed while {stage} after {fetched} records: {source}")]
    PullFailed {
        table: String,
        stage: PullStage,
        fetched: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("import error: {0}")]
    Import(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // ========================================================================
    // CONVERSIONS
    // ========================================================================
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Validation failures are user-fixable and happen before any write.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::EmptySheet { .. }
                | SyncError::MissingIdColumn
                | SyncError::MissingSnapshot { .. }
                | SyncError::StaleSnapshot { .. }
        )
    }
}
