// ⬆️ Push / sync: sheet → ChangeSet → store
//
// State machine:
//
//   Idle → ReadingSheet → Validating → Diffing → NoChanges
//                                              ↘ WritingChanges → Done
//
// Validation failures return to Idle with an error and nothing is written.
// Per-row write failures are collected in the report; they never abort the
// rest of the ChangeSet.

use super::{percent_of, ProgressSink, SyncEngine, SyncProgress};
use crate::config::WriteStrategy;
use crate::error::{SyncError, SyncResult};
use crate::fingerprint::fingerprint;
use crate::record::{Record, ID_FIELD};
use crate::sheet::{clean_rows, header_names, row_to_record, Row};
use crate::snapshot::{Snapshot, SyncSession};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const STAGE: &str = "push";

// ============================================================================
// STATES & RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Idle,
    ReadingSheet,
    Validating,
    Diffing,
    NoChanges,
    WritingChanges,
    Done,
}

/// A row whose update failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushReport {
    pub table: String,
    pub changed: usize,
    pub succeeded: usize,
    pub failures: Vec<RowFailure>,
    /// Data rows with no id (never written)
    pub skipped_without_id: usize,
}

impl PushReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }

    pub fn summary(&self) -> String {
        format!("{} succeeded, {} failed", self.succeeded, self.failed())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Every row matched its snapshot entry; nothing was written.
    NoChanges,
    Applied(PushReport),
}

impl PushOutcome {
    pub fn report(&self) -> Option<&PushReport> {
        match self {
            PushOutcome::NoChanges => None,
            PushOutcome::Applied(report) => Some(report),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            PushOutcome::NoChanges => "No changes to sync".to_string(),
            PushOutcome::Applied(report) => report.summary(),
        }
    }
}

// ============================================================================
// VALIDATION & DIFF (pure)
// ============================================================================

/// Drop blank rows, then require a header, one data row and an `id` column.
/// Returns (header names, data rows).
pub fn validate_sheet(rows: Vec<Row>) -> SyncResult<(Vec<String>, Vec<Row>)> {
    let mut rows = clean_rows(rows);
    if rows.len() < 2 {
        return Err(SyncError::EmptySheet { rows: rows.len() });
    }

    let header = header_names(&rows.remove(0));
    if !header.iter().any(|name| name == ID_FIELD) {
        return Err(SyncError::MissingIdColumn);
    }

    Ok((header, rows))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangedRow {
    pub id: String,
    pub record: Record,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub rows: Vec<ChangedRow>,
    pub unchanged: usize,
    pub skipped_without_id: usize,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Rows whose fingerprint differs from the snapshot entry for their id.
/// Ids the snapshot has never seen count as changed.
pub fn detect_changes(snapshot: &Snapshot, header: &[String], rows: &[Row]) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for row in rows {
        let record = row_to_record(header, row);
        let Some(id) = record.id() else {
            changes.skipped_without_id += 1;
            continue;
        };

        if snapshot.get(&id) == Some(fingerprint(&record).as_str()) {
            changes.unchanged += 1;
        } else {
            changes.rows.push(ChangedRow { id, record });
        }
    }

    changes
}

// ============================================================================
// ENGINE
// ============================================================================

impl SyncEngine {
    /// Push against the current snapshot of `table`.
    pub async fn push_table(
        &self,
        table: &str,
        actor: &str,
        progress: &dyn ProgressSink,
    ) -> SyncResult<PushOutcome> {
        let session = self.snapshots.session(table)?;
        self.push(&session, actor, progress).await
    }

    pub async fn push(
        &self,
        session: &SyncSession,
        actor: &str,
        progress: &dyn ProgressSink,
    ) -> SyncResult<PushOutcome> {
        let table = session.table();

        transition(table, PushState::ReadingSheet);
        progress.report(&SyncProgress::new(STAGE, 0, "Reading sheet"));
        let rows = self.sheet.read_all().await?;

        transition(table, PushState::Validating);
        let (header, data_rows) = match self.validate(session, rows) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(table, state = ?PushState::Idle, error = %e, "push rejected");
                return Err(e);
            }
        };

        transition(table, PushState::Diffing);
        let changes = detect_changes(session.snapshot(), &header, &data_rows);
        debug!(
            table,
            changed = changes.len(),
            unchanged = changes.unchanged,
            skipped = changes.skipped_without_id,
            "diff complete"
        );

        if changes.is_empty() {
            transition(table, PushState::NoChanges);
            info!(table, "push found no changes");
            progress.report(&SyncProgress::new(STAGE, 100, "No changes to sync"));
            return Ok(PushOutcome::NoChanges);
        }

        transition(table, PushState::WritingChanges);
        let report = self.write_changes(table, changes, actor, progress).await;

        transition(table, PushState::Done);
        info!(table, succeeded = report.succeeded, failed = report.failed(), "push complete");
        progress.report(&SyncProgress::new(STAGE, 100, report.summary()));

        Ok(PushOutcome::Applied(report))
    }

    fn validate(&self, session: &SyncSession, rows: Vec<Row>) -> SyncResult<(Vec<String>, Vec<Row>)> {
        let valid = validate_sheet(rows)?;
        self.snapshots.ensure_current(session)?;
        Ok(valid)
    }

    async fn write_changes(
        &self,
        table: &str,
        changes: ChangeSet,
        actor: &str,
        progress: &dyn ProgressSink,
    ) -> PushReport {
        let ctx = WriteContext {
            table,
            actor,
            at: Utc::now(),
            total: changes.len(),
            processed: AtomicUsize::new(0),
            progress,
        };

        let results: Vec<SyncResult<()>> = match self.config.write_strategy {
            WriteStrategy::Sequential => {
                let mut results = Vec::with_capacity(ctx.total);
                for row in &changes.rows {
                    results.push(self.write_row(&ctx, row).await);
                }
                results
            }
            WriteStrategy::Concurrent { max_in_flight } => {
                let permits = Semaphore::new(max_in_flight.max(1));
                join_all(changes.rows.iter().map(|row| {
                    let permits = &permits;
                    let ctx = &ctx;
                    async move {
                        let _permit = permits.acquire().await.map_err(|_| SyncError::Cancelled)?;
                        self.write_row(ctx, row).await
                    }
                }))
                .await
            }
        };

        let mut report = PushReport {
            table: table.to_string(),
            changed: ctx.total,
            succeeded: 0,
            failures: Vec::new(),
            skipped_without_id: changes.skipped_without_id,
        };

        for (row, result) in changes.rows.iter().zip(results) {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(table, id = %row.id, error = %e, "row update failed");
                    report.failures.push(RowFailure {
                        id: row.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// One update: payload without id/bookkeeping, stamped, then progress.
    async fn write_row(&self, ctx: &WriteContext<'_>, row: &ChangedRow) -> SyncResult<()> {
        let mut payload = row.record.update_payload();
        payload.stamp_update(ctx.actor, ctx.at);
        let result = self.store.update_record(ctx.table, &row.id, &payload).await;

        let done = ctx.processed.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.progress.report(&SyncProgress::new(
            STAGE,
            percent_of(done, ctx.total),
            format!("Synced {}/{}", done, ctx.total),
        ));
        result
    }
}

struct WriteContext<'a> {
    table: &'a str,
    actor: &'a str,
    at: DateTime<Utc>,
    total: usize,
    processed: AtomicUsize,
    progress: &'a dyn ProgressSink,
}

fn transition(table: &str, state: PushState) {
    debug!(table, state = ?state, "push state");
}

// ============================================================================
// TESTS
// ============================================================================
