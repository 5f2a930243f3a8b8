// 📊 Spreadsheet surface
//
// The sheet is a grid: header row + data rows of scalar cells. This module
// converts records to that grid (export) and back (push), and defines the
// SheetHost trait every spreadsheet backend implements.

pub mod csv_file;
pub mod memory;

use crate::config::HeaderOrder;
use crate::error::SyncResult;
use crate::record::Record;
use async_trait::async_trait;
use serde_json::Value;

pub use csv_file::CsvSheet;
pub use memory::MemorySheet;

/// One spreadsheet row.
pub type Row = Vec<Value>;

// ============================================================================
// SHEET HOST
// ============================================================================

#[async_trait]
pub trait SheetHost: Send + Sync {
    /// Remove every row, header included.
    async fn clear(&self) -> SyncResult<()>;

    async fn write_header(&self, header: &[String]) -> SyncResult<()>;

    /// Append data rows after the existing content.
    async fn append_rows(&self, rows: &[Row]) -> SyncResult<()>;

    /// Every row, header first.
    async fn read_all(&self) -> SyncResult<Vec<Row>>;
}

// ============================================================================
// EXPORT: records → grid
// ============================================================================

/// Header row for a set of records.
pub fn header_for(records: &[Record], order: HeaderOrder) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for record in records {
        for name in record.field_names() {
            if !header.iter().any(|h| h == name) {
                header.push(name.to_string());
            }
        }
    }

    if order == HeaderOrder::Sorted {
        header.sort();
    }
    header
}

/// Cell for a field value: null → empty cell, arrays/objects → JSON text.
pub fn to_cell(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        scalar => scalar.clone(),
    }
}

/// Data rows aligned to `header`; absent fields become empty cells.
pub fn to_rows(header: &[String], records: &[Record]) -> Vec<Row> {
    records
        .iter()
        .map(|record| {
            header
                .iter()
                .map(|name| record.get(name).map(to_cell).unwrap_or_else(|| Value::String(String::new())))
                .collect()
        })
        .collect()
}

/// Display text of a cell (what a CSV file or a sheet UI shows).
pub fn cell_text(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// IMPORT: grid → records
// ============================================================================

fn is_blank_cell(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Every cell empty or whitespace.
pub fn is_blank_row(row: &[Value]) -> bool {
    row.iter().all(is_blank_cell)
}

pub fn clean_rows(rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter().filter(|row| !is_blank_row(row)).collect()
}

/// Build a record from header + cells. Empty-string cells become null so the
/// record has the same shape as the one that was exported.
pub fn row_to_record(header: &[String], row: &[Value]) -> Record {
    header
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.trim().is_empty())
        .map(|(i, name)| {
            let value = match row.get(i) {
                None => Value::Null,
                Some(Value::String(s)) if s.is_empty() => Value::Null,
                Some(cell) => cell.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Header cells as column names.
pub fn header_names(row: &[Value]) -> Vec<String> {
    row.iter().map(cell_text).collect()
}

// ============================================================================
// TESTS
// ============================================================================
