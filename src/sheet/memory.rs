// In-memory sheet: a grid behind a mutex, with an upload counter and
// optional failure on append.

use super::{Row, SheetHost};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: Mutex<Vec<Row>>,
    append_calls: Mutex<usize>,
    fail_appends: Mutex<bool>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        let sheet = Self::new();
        *sheet.rows.lock().unwrap_or_else(PoisonError::into_inner) = rows;
        sheet
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Overwrite one cell (row 0 is the header). Out-of-range writes are ignored.
    pub fn set_cell(&self, row: usize, col: usize, value: impl Into<Value>) {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cell) = rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = value.into();
        }
    }

    pub fn push_row(&self, row: Row) {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).push(row);
    }

    /// Column index of a header name.
    pub fn column(&self, name: &str) -> Option<usize> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.first()?
            .iter()
            .position(|cell| cell.as_str() == Some(name))
    }

    pub fn append_calls(&self) -> usize {
        *self.append_calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_appends(&self) {
        *self.fail_appends.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}

#[async_trait]
impl SheetHost for MemorySheet {
    async fn clear(&self) -> SyncResult<()> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }

    async fn write_header(&self, header: &[String]) -> SyncResult<()> {
        let row = header.iter().map(|h| Value::String(h.clone())).collect();
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).push(row);
        Ok(())
    }

    async fn append_rows(&self, rows: &[Row]) -> SyncResult<()> {
        *self.append_calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        if *self.fail_appends.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(SyncError::Host("sheet is protected".to_string()));
        }

        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn read_all(&self) -> SyncResult<Vec<Row>> {
        Ok(self.rows())
    }
}
