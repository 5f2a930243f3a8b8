// In-memory record store with an update log and failure injection.

use super::{PageQuery, RecordStore};
use crate::error::{SyncError, SyncResult};
use crate::record::{Record, CREATED_AT};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// One `update_record` call as the store received it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCall {
    pub table: String,
    pub id: String,
    pub payload: Record,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    updates: Mutex<Vec<UpdateCall>>,
    rejected_ids: Mutex<HashSet<String>>,
    /// Fail the fetch for any page starting at or past this offset
    fail_fetch_from: Mutex<Option<usize>>,
    fetch_calls: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(table: &str, records: Vec<Record>) -> Self {
        let store = Self::new();
        store.insert(table, records);
        store
    }

    pub fn insert(&self, table: &str, records: Vec<Record>) {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_string()).or_default().extend(records);
    }

    /// Reject every update for `id`.
    pub fn reject_updates_for(&self, id: &str) {
        let mut rejected = self.rejected_ids.lock().unwrap_or_else(PoisonError::into_inner);
        rejected.insert(id.to_string());
    }

    /// Fail page fetches at or past `offset`.
    pub fn fail_fetch_from(&self, offset: usize) {
        *self.fail_fetch_from.lock().unwrap_or_else(PoisonError::into_inner) = Some(offset);
    }

    pub fn updates(&self) -> Vec<UpdateCall> {
        self.updates.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn fetch_calls(&self) -> usize {
        *self.fetch_calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, table: &str, id: &str) -> Option<Record> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(table)?
            .iter()
            .find(|r| r.id().as_deref() == Some(id))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch_page(&self, query: &PageQuery) -> SyncResult<Vec<Record>> {
        *self.fetch_calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        if let Some(fail_from) = *self.fail_fetch_from.lock().unwrap_or_else(PoisonError::into_inner) {
            if query.offset >= fail_from {
                return Err(SyncError::Store(format!(
                    "connection reset while reading offset {}",
                    query.offset
                )));
            }
        }

        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<&Record> = tables
            .get(&query.table)
            .map(|records| records.iter().filter(|r| query.filter.matches(r)).collect())
            .unwrap_or_default();

        // RFC 3339 text sorts chronologically; records without a timestamp go last
        matching.sort_by(|a, b| b.get_text(CREATED_AT).cmp(&a.get_text(CREATED_AT)));

        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn update_record(&self, table: &str, id: &str, payload: &Record) -> SyncResult<()> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(UpdateCall {
                table: table.to_string(),
                id: id.to_string(),
                payload: payload.clone(),
            });

        if self
            .rejected_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
        {
            return Err(SyncError::Store(format!("update rejected for {}", id)));
        }

        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let record = tables
            .get_mut(table)
            .and_then(|records| records.iter_mut().find(|r| r.id().as_deref() == Some(id)))
            .ok_or_else(|| SyncError::RecordNotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        record.merge(payload);
        Ok(())
    }
}
