// 🗄️ Backing store - where tracked tables live
//
// The sync engine only needs two operations from the store:
// - fetch one page of records (filtered, newest first)
// - update one record by id
//
// SqliteStore is the real backend; MemoryStore is an in-process store with
// failure injection for tests and dry runs.

pub mod memory;
pub mod sqlite;

use crate::error::SyncResult;
use crate::record::{Record, CATEGORY_FIELD, STATUS_FIELD};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::{MemoryStore, UpdateCall};
pub use sqlite::{setup_database, Event, ImportStats, SqliteStore};

// ============================================================================
// QUERY TYPES
// ============================================================================

/// Predicates applied by a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Exact match on the `status` column
    pub status: Option<String>,

    /// Case-insensitive substring match on the `category` column
    pub category: Option<String>,
}

impl RecordFilter {
    pub fn with_status(status: impl Into<String>) -> Self {
        RecordFilter {
            status: Some(status.into()),
            category: None,
        }
    }

    /// Builder: add category pattern
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Same semantics as the SQL the SQLite store issues.
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(status) = &self.status {
            if record.get_text(STATUS_FIELD).as_deref() != Some(status.as_str()) {
                return false;
            }
        }

        if let Some(category) = &self.category {
            let pattern = category.to_lowercase();
            match record.get_text(CATEGORY_FIELD) {
                Some(value) if value.to_lowercase().contains(&pattern) => {}
                _ => return false,
            }
        }

        true
    }
}

/// One page request: `limit` rows starting at `offset`, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub table: String,
    pub filter: RecordFilter,
    pub offset: usize,
    pub limit: usize,
}

// ============================================================================
// RECORD STORE
// ============================================================================

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records of `query.table` matching the filter, ordered by `createdAt`
    /// descending, at most `query.limit` of them.
    async fn fetch_page(&self, query: &PageQuery) -> SyncResult<Vec<Record>>;

    /// Merge `payload` into the stored record `id`.
    async fn update_record(&self, table: &str, id: &str, payload: &Record) -> SyncResult<()>;
}
