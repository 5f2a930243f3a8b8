// ⬇️ Pull / export: store → sheet, then baseline snapshot
//
// Pages are requested newest-first until a short page comes back. The sheet is
// cleared and rewritten (header, then fixed-size batches, one at a time). The
// snapshot is taken from the rows as written to the sheet, so reading the sheet
// straight back reproduces every fingerprint.

use super::{percent_of, ProgressSink, SyncEngine, SyncProgress};
use crate::error::{PullStage, SyncError, SyncResult};
use crate::record::Record;
use crate::sheet::{header_for, row_to_record, to_rows, Row};
use crate::snapshot::{Snapshot, SyncSession};
use crate::store::{PageQuery, RecordFilter};
use tracing::{debug, info};

const STAGE: &str = "pull";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub table: String,
    pub category: Option<String>,
    /// Falls back to the configured default status
    pub status: Option<String>,
}

impl PullRequest {
    pub fn new(table: impl Into<String>) -> Self {
        PullRequest {
            table: table.into(),
            category: None,
            status: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub session: SyncSession,
    pub records: Vec<Record>,
    pub total: usize,
}

impl SyncEngine {
    pub async fn pull(
        &self,
        request: &PullRequest,
        progress: &dyn ProgressSink,
    ) -> SyncResult<PullOutcome> {
        let table = request.table.as_str();
        let status = request
            .status
            .clone()
            .unwrap_or_else(|| self.config.default_status.clone());
        let mut filter = RecordFilter::with_status(status);
        if let Some(category) = &request.category {
            filter = filter.with_category(category.clone());
        }

        info!(table, category = ?request.category, "pull started");
        progress.report(&SyncProgress::new(STAGE, 0, format!("Fetching {}", table)));

        let records = self.fetch_all(table, &filter).await?;

        let header = header_for(&records, self.config.header_order);
        let rows = to_rows(&header, &records);

        if let Err(source) = self.upload(&header, &rows, progress).await {
            // The sheet was cleared, so the previous baseline no longer describes it
            self.snapshots.clear(table);
            return Err(pull_failed(table, PullStage::UploadingSheet, records.len(), source));
        }

        let exported: Vec<Record> = rows.iter().map(|row| row_to_record(&header, row)).collect();
        let session = self.snapshots.commit(Snapshot::capture(table, &exported));

        let total = records.len();
        info!(table, total, version = session.version(), "pull complete");
        progress.report(&SyncProgress::new(STAGE, 100, format!("Exported {} records", total)));

        Ok(PullOutcome {
            session,
            records,
            total,
        })
    }

    async fn fetch_all(&self, table: &str, filter: &RecordFilter) -> SyncResult<Vec<Record>> {
        let page_size = self.config.page_size;
        let mut records: Vec<Record> = Vec::new();

        loop {
            let query = PageQuery {
                table: table.to_string(),
                filter: filter.clone(),
                offset: records.len(),
                limit: page_size,
            };

            let page = self
                .store
                .fetch_page(&query)
                .await
                .map_err(|source| pull_failed(table, PullStage::FetchingPages, records.len(), source))?;

            debug!(table, offset = query.offset, rows = page.len(), "fetched page");
            let short = page.len() < page_size;
            records.extend(page);

            if short {
                return Ok(records);
            }
        }
    }

    async fn upload(&self, header: &[String], rows: &[Row], progress: &dyn ProgressSink) -> SyncResult<()> {
        self.sheet.clear().await?;
        if header.is_empty() {
            return Ok(());
        }
        self.sheet.write_header(header).await?;

        let batch_size = self.config.upload_batch_size.max(1);
        let batches = rows.len().div_ceil(batch_size);

        for (i, batch) in rows.chunks(batch_size).enumerate() {
            self.sheet.append_rows(batch).await?;
            debug!(batch = i + 1, batches, rows = batch.len(), "uploaded batch");
            progress.report(&SyncProgress::new(
                STAGE,
                percent_of(i + 1, batches),
                format!("Uploaded batch {}/{}", i + 1, batches),
            ));
        }
        Ok(())
    }
}

fn pull_failed(table: &str, stage: PullStage, fetched: usize, source: SyncError) -> SyncError {
    SyncError::PullFailed {
        table: table.to_string(),
        stage,
        fetched,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{engine, engine_with, people, person, TABLE};
    use super::super::NoProgress;
    use super::*;
    use crate::config::SyncConfig;
    use crate::sheet::SheetHost;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_pull_exports_sorted_header_newest_first() {
        let (engine, _store, sheet) = engine();

        let outcome = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap();
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.session.snapshot().len(), 3);

        let rows = sheet.rows();
        assert_eq!(
            rows[0],
            vec![
                json!("category"),
                json!("createdAt"),
                json!("createdBy"),
                json!("id"),
                json!("name"),
                json!("phone"),
                json!("status")
            ]
        );
        let id_col = sheet.column("id").unwrap();
        let ids: Vec<&serde_json::Value> = rows[1..].iter().map(|r| &r[id_col]).collect();
        assert_eq!(ids, vec![&json!("1"), &json!("2"), &json!("3")]);

        println!("✅ Pull export test passed");
    }

    #[tokio::test]
    async fn test_pull_pages_until_short_page() {
        let records: Vec<Record> = (0..5)
            .map(|i| person(&i.to_string(), "Ali", &format!("2024-01-0{}T00:00:00.000Z", i + 1)))
            .collect();
        let config = SyncConfig {
            page_size: 2,
            upload_batch_size: 2,
            ..SyncConfig::default()
        };
        let (engine, store, sheet) = engine_with(records, config);

        let outcome = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap();

        assert_eq!(outcome.total, 5);
        assert_eq!(store.fetch_calls(), 3);
        assert_eq!(sheet.append_calls(), 3);
        assert_eq!(sheet.rows().len(), 6);
    }

    #[tokio::test]
    async fn test_pull_exact_multiple_fetches_one_empty_page() {
        let config = SyncConfig {
            page_size: 3,
            ..SyncConfig::default()
        };
        let (engine, store, _sheet) = engine_with(people(), config);

        let outcome = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap();
        assert_eq!(outcome.total, 3);
        assert_eq!(store.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_pull_filters_status_and_category() {
        let mut archived = person("4", "Umar", "2024-01-04T00:00:00.000Z");
        archived.insert("status", "archived");
        let mut other = person("5", "Zainab", "2024-01-05T00:00:00.000Z");
        other.insert("category", "Pendakwah");

        let mut records = people();
        records.push(archived);
        records.push(other);
        let (engine, _store, _sheet) = engine_with(records, SyncConfig::default());

        let all_active = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap();
        assert_eq!(all_active.total, 4);

        let saudara = engine
            .pull(&PullRequest::new(TABLE).with_category("saudara"), &NoProgress)
            .await
            .unwrap();
        assert_eq!(saudara.total, 3);

        let archived = engine
            .pull(&PullRequest::new(TABLE).with_status("archived"), &NoProgress)
            .await
            .unwrap();
        assert_eq!(archived.total, 1);
        assert_eq!(archived.records[0].id(), Some("4".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_failure_commits_no_snapshot() {
        let config = SyncConfig {
            page_size: 2,
            ..SyncConfig::default()
        };
        let (engine, store, _sheet) = engine_with(people(), config);
        store.fail_fetch_from(2);

        let err = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap_err();
        match err {
            SyncError::PullFailed { stage, fetched, .. } => {
                assert_eq!(stage, PullStage::FetchingPages);
                assert_eq!(fetched, 2);
            }
            other => panic!("expected PullFailed, got {:?}", other),
        }
        assert!(engine.snapshots().session(TABLE).is_err());
    }

    #[tokio::test]
    async fn test_upload_failure_commits_no_snapshot() {
        let (engine, _store, sheet) = engine();
        sheet.fail_appends();

        let err = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::PullFailed {
                stage: PullStage::UploadingSheet,
                fetched: 3,
                ..
            }
        ));
        assert!(engine.snapshots().current_version(TABLE).is_none());
    }

    #[tokio::test]
    async fn test_upload_failure_drops_previous_snapshot() {
        let (engine, store, sheet) = engine();
        let first = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap();

        sheet.fail_appends();
        let err = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap_err();
        assert!(matches!(err, SyncError::PullFailed { stage: PullStage::UploadingSheet, .. }));

        assert!(engine.snapshots().current_version(TABLE).is_none());
        let err = engine.snapshots().ensure_current(&first.session).unwrap_err();
        assert!(matches!(err, SyncError::MissingSnapshot { .. }));
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn test_pull_of_empty_table_clears_sheet() {
        let (engine, _store, sheet) = engine_with(Vec::new(), SyncConfig::default());
        sheet.write_header(&["stale".to_string()]).await.unwrap();

        let outcome = engine.pull(&PullRequest::new(TABLE), &NoProgress).await.unwrap();
        assert_eq!(outcome.total, 0);
        assert!(sheet.rows().is_empty());
        assert!(outcome.session.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_pull_reports_progress_to_completion() {
        let config = SyncConfig {
            upload_batch_size: 1,
            ..SyncConfig::default()
        };
        let (engine, _store, _sheet) = engine_with(people(), config);
        let seen = Mutex::new(Vec::new());
        let sink = |p: &SyncProgress| seen.lock().unwrap().push(p.percent);

        engine.pull(&PullRequest::new(TABLE), &sink).await.unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
