// Mualaf Sync - Core Library
// Spreadsheet ⇄ record store reconciliation, exposed for the CLI, API server, and tests

pub mod error;
pub mod config;
pub mod record;
pub mod fingerprint;    // Normalization + fingerprints
pub mod snapshot;       // Diff baselines + sync sessions
pub mod store;          // RecordStore: SQLite + in-memory
pub mod sheet;          // SheetHost: CSV file + in-memory
pub mod bridge;         // Typed request/response bridge to a sheet host
pub mod sync;           // Pull / push engine
pub mod import;         // CSV import cleaning
pub mod dedup;          // Duplicate detection by fuzzy key
pub mod attendance;     // Attendance-day validation

// Re-export commonly used types
pub use error::{PullStage, SyncError, SyncResult};
pub use config::{HeaderOrder, SyncConfig, WriteStrategy};
pub use record::{Record, BOOKKEEPING_FIELDS, ID_FIELD};
pub use fingerprint::{fingerprint, normalize_value};
pub use snapshot::{SheetStamp, Snapshot, SnapshotStore, SyncSession};
pub use store::{
    MemoryStore, PageQuery, RecordFilter, RecordStore,
    SqliteStore, ImportStats, Event,
};
pub use sheet::{CsvSheet, MemorySheet, Row, SheetHost};
pub use bridge::{
    BridgeClient, HostEndpoint, HostFunction, HostMessage, HostOutcome,
    RemoteSheet, serve_host, spawn_host,
};
pub use sync::{
    SyncEngine, PullRequest, PullOutcome, PushOutcome, PushReport, PushState,
    RowFailure, ChangeSet, ProgressSink, SyncProgress, NoProgress,
};
pub use import::{clean_csv, load_csv, ImportBatch};
pub use dedup::{DeduplicationEngine, DuplicateMatch, MatchStrategy};
pub use attendance::{
    AttendanceValidator, AttendanceReport, AttendanceIssue, Severity, parse_class_days,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
