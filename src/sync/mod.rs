// 🔄 Sync Engine - spreadsheet ⇄ record store reconciliation
//
//   pull:  store pages → sheet (clear, header, batches) → snapshot
//   push:  sheet → clean + validate → diff against snapshot → write ChangeSet
//
// Only rows whose fingerprint moved since the pull are written back, so a
// sheet that was exported and not touched produces zero writes.

pub mod pull;
pub mod push;

use crate::config::SyncConfig;
use crate::sheet::SheetHost;
use crate::snapshot::SnapshotStore;
use crate::store::RecordStore;
use std::sync::Arc;

pub use pull::{PullOutcome, PullRequest};
pub use push::{detect_changes, validate_sheet, ChangeSet, ChangedRow, PushOutcome, PushReport, PushState, RowFailure};

// ============================================================================
// PROGRESS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub stage: &'static str,
    /// 0..=100
    pub percent: u8,
    pub message: String,
}

impl SyncProgress {
    pub fn new(stage: &'static str, percent: u8, message: impl Into<String>) -> Self {
        SyncProgress {
            stage,
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// Receives progress updates from pull and push.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &SyncProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&SyncProgress) + Send + Sync,
{
    fn report(&self, progress: &SyncProgress) {
        self(progress)
    }
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: &SyncProgress) {}
}

/// `done` of `total` as a percentage; an empty total counts as complete.
pub(crate) fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    sheet: Arc<dyn SheetHost>,
    snapshots: SnapshotStore,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RecordStore>, sheet: Arc<dyn SheetHost>, config: SyncConfig) -> Self {
        SyncEngine {
            store,
            sheet,
            snapshots: SnapshotStore::new(),
            config,
        }
    }

    /// Share an existing snapshot store (e.g. one loaded from a session directory).
    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::record::Record;
    use crate::sheet::MemorySheet;
    use crate::store::MemoryStore;

    pub const TABLE: &str = "mualaf";

    pub fn person(id: &str, name: &str, created_at: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("name", name)
            .with("phone", "0123456789")
            .with("status", "active")
            .with("category", "Saudara Baru")
            .with("createdAt", created_at)
            .with("createdBy", "admin")
    }

    pub fn people() -> Vec<Record> {
        vec![
            person("1", "Aminah", "2024-01-03T00:00:00.000Z"),
            person("2", "Yusuf", "2024-01-02T00:00:00.000Z"),
            person("3", "Hana", "2024-01-01T00:00:00.000Z"),
        ]
    }

    pub fn engine_with(
        records: Vec<Record>,
        config: SyncConfig,
    ) -> (SyncEngine, Arc<MemoryStore>, Arc<MemorySheet>) {
        let store = Arc::new(MemoryStore::with_records(TABLE, records));
        let sheet = Arc::new(MemorySheet::new());
        let engine = SyncEngine::new(store.clone(), sheet.clone(), config);
        (engine, store, sheet)
    }

    pub fn engine() -> (SyncEngine, Arc<MemoryStore>, Arc<MemorySheet>) {
        engine_with(people(), SyncConfig::default())
    }
}
