// 📥 CSV import - raw spreadsheet export → clean records
//
// Cleaning rules:
//   - UTF-8 BOM stripped, header names trimmed
//   - blank rows dropped, cells trimmed, empty cells → null
//   - missing id → fresh UUID v4
//   - createdAt / createdBy stamped when missing
// A row with more cells than the header is rejected with its line number.

use crate::error::{SyncError, SyncResult};
use crate::record::{Record, ID_FIELD};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch {
    pub records: Vec<Record>,
    pub blank_rows: usize,
    /// Rows that got a generated id
    pub assigned_ids: usize,
}

pub fn load_csv(path: &Path, actor: &str) -> SyncResult<ImportBatch> {
    let file = fs::File::open(path)?;
    let batch = clean_csv(file, actor, Utc::now())?;
    debug!(
        path = %path.display(),
        records = batch.records.len(),
        blank_rows = batch.blank_rows,
        "loaded csv"
    );
    Ok(batch)
}

pub fn clean_csv<R: Read>(mut reader: R, actor: &str, now: DateTime<Utc>) -> SyncResult<ImportBatch> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let header: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if header.iter().all(String::is_empty) {
        return Err(SyncError::Import("csv has no header row".to_string()));
    }

    let mut batch = ImportBatch {
        records: Vec::new(),
        blank_rows: 0,
        assigned_ids: 0,
    };

    for result in rdr.records() {
        let row = result?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        if row.iter().all(|cell| cell.trim().is_empty()) {
            batch.blank_rows += 1;
            continue;
        }

        if row.len() > header.len() {
            return Err(SyncError::Import(format!(
                "line {}: {} cells but the header has {} columns",
                line,
                row.len(),
                header.len()
            )));
        }

        let mut record: Record = header
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(i, name)| {
                let value = match row.get(i).map(str::trim) {
                    Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                    _ => Value::Null,
                };
                (name.clone(), value)
            })
            .collect();

        if record.id().is_none() {
            record.insert(ID_FIELD, Uuid::new_v4().to_string());
            batch.assigned_ids += 1;
        }
        record.stamp_created(actor, now);

        batch.records.push(record);
    }

    Ok(batch)
}
