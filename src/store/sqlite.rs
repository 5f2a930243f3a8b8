// 🗄️ SQLite backing store (WAL mode) + audit trail
//
// Every tracked table shares one `records` table: the full record lives in a
// JSON `data` column, with status/category/created_at lifted into columns so
// pulls can filter and sort in SQL.

use super::{PageQuery, RecordStore};
use crate::error::{SyncError, SyncResult};
use crate::record::{Record, CATEGORY_FIELD, CREATED_AT, CREATED_BY, STATUS_FIELD, UPDATED_BY};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub table_name: String,
    pub record_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        table_name: &str,
        record_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            table_name: table_name.to_string(),
            record_id: record_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Outcome of an import batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped_without_id: usize,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> SyncResult<()> {
    // WAL for crash recovery (in-memory databases keep "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            status TEXT,
            category TEXT, -- lowercased, for filtering only
            created_at TEXT,
            data TEXT NOT NULL,
            UNIQUE (table_name, record_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_listing
         ON records(table_name, status, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_record ON events(table_name, record_id)",
        [],
    )?;

    Ok(())
}

/// SQLite's lower() only folds ASCII, so the filter column is folded here.
fn folded_category(record: &Record) -> Option<String> {
    record.get_text(CATEGORY_FIELD).map(|c| c.to_lowercase())
}

fn insert_event(conn: &Connection, event: &Event) -> SyncResult<()> {
    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, table_name, record_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.table_name,
            event.record_id,
            serde_json::to_string(&event.data)?,
            event.actor,
        ],
    )?;

    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> SyncResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> SyncResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> SyncResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert records; an existing (table, id) pair is a duplicate, not an error.
    pub fn insert_records(&self, table: &str, records: &[Record]) -> SyncResult<ImportStats> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut stats = ImportStats::default();

        for record in records {
            let Some(id) = record.id() else {
                stats.skipped_without_id += 1;
                continue;
            };

            let result = tx.execute(
                "INSERT INTO records (table_name, record_id, status, category, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    table,
                    id,
                    record.get_text(STATUS_FIELD),
                    folded_category(record),
                    record.get_text(CREATED_AT),
                    serde_json::to_string(record)?,
                ],
            );

            match result {
                Ok(_) => {
                    stats.inserted += 1;
                    let event = Event::new(
                        "record_added",
                        table,
                        &id,
                        serde_json::json!({ "fields": record.len() }),
                        &record.get_text(CREATED_BY).unwrap_or_else(|| "importer".to_string()),
                    );
                    insert_event(&tx, &event)?;
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    stats.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit()?;
        info!(
            table,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            "imported records"
        );
        Ok(stats)
    }

    pub fn count_records(&self, table: &str) -> SyncResult<i64> {
        let conn = self.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE table_name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_record(&self, table: &str, id: &str) -> SyncResult<Option<Record>> {
        let conn = self.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM records WHERE table_name = ?1 AND record_id = ?2",
                params![table, id],
                |row| row.get(0),
            )
            .optional()?;

        data.map(|json| serde_json::from_str(&json).map_err(SyncError::from))
            .transpose()
    }

    /// Every record of a table, newest first, regardless of status.
    pub fn all_records(&self, table: &str) -> SyncResult<Vec<Record>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT data FROM records WHERE table_name = ?1
             ORDER BY created_at DESC, id DESC",
        )?;

        let rows = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(SyncError::from))
            .collect()
    }

    pub fn get_events_for_record(&self, table: &str, id: &str) -> SyncResult<Vec<Event>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, table_name, record_id, data, actor
             FROM events
             WHERE table_name = ?1 AND record_id = ?2
             ORDER BY id DESC",
        )?;

        let rows = stmt
            .query_map(params![table, id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(event_id, timestamp, event_type, table_name, record_id, data, actor)| -> SyncResult<Event> {
                    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                        .map_err(|e| SyncError::Store(format!("bad event timestamp: {}", e)))?
                        .with_timezone(&Utc);
                    Ok(Event {
                        event_id,
                        timestamp,
                        event_type,
                        table_name,
                        record_id,
                        data: serde_json::from_str(&data)?,
                        actor,
                    })
                },
            )
            .collect()
    }

    fn fetch_page_blocking(&self, query: &PageQuery) -> SyncResult<Vec<Record>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT data FROM records
             WHERE table_name = ?1
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR instr(category, ?3) > 0)
             ORDER BY created_at DESC, id DESC
             LIMIT ?4 OFFSET ?5",
        )?;

        let rows = stmt
            .query_map(
                params![
                    query.table,
                    query.filter.status,
                    query.filter.category.as_deref().map(str::to_lowercase),
                    query.limit as i64,
                    query.offset as i64,
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            table = %query.table,
            offset = query.offset,
            rows = rows.len(),
            "fetched page"
        );

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(SyncError::from))
            .collect()
    }

    fn update_record_blocking(&self, table: &str, id: &str, payload: &Record) -> SyncResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM records WHERE table_name = ?1 AND record_id = ?2",
                params![table, id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(data) = data else {
            return Err(SyncError::RecordNotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        };

        let mut record: Record = serde_json::from_str(&data)?;
        record.merge(payload);

        tx.execute(
            "UPDATE records SET data = ?1, status = ?2, category = ?3
             WHERE table_name = ?4 AND record_id = ?5",
            params![
                serde_json::to_string(&record)?,
                record.get_text(STATUS_FIELD),
                folded_category(&record),
                table,
                id,
            ],
        )?;

        let fields: Vec<&str> = payload.field_names().collect();
        let actor = payload
            .get_text(UPDATED_BY)
            .unwrap_or_else(|| "unknown".to_string());
        let event = Event::new(
            "record_updated",
            table,
            id,
            serde_json::json!({ "fields": fields }),
            &actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn fetch_page(&self, query: &PageQuery) -> SyncResult<Vec<Record>> {
        self.fetch_page_blocking(query)
    }

    async fn update_record(&self, table: &str, id: &str, payload: &Record) -> SyncResult<()> {
        self.update_record_blocking(table, id, payload)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordFilter;

    fn case(id: &str, created_at: &str, status: &str, category: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("name", format!("Case {}", id))
            .with("status", status)
            .with("category", category)
            .with("createdAt", created_at)
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records(
                "mualaf",
                &[
                    case("1", "2025-01-01T00:00:00.000Z", "active", "Saudara Baru"),
                    case("2", "2025-03-01T00:00:00.000Z", "active", "Kelas Bimbingan"),
                    case("3", "2025-02-01T00:00:00.000Z", "inactive", "Saudara Baru"),
                    case("4", "2025-02-15T00:00:00.000Z", "active", "saudara baru"),
                ],
            )
            .unwrap();
        store
    }

    fn ids(records: &[Record]) -> Vec<String> {
        records.iter().filter_map(|r| r.id()).collect()
    }

    #[test]
    fn test_import_is_idempotent() {
        let store = seeded();
        assert_eq!(store.count_records("mualaf").unwrap(), 4);

        let stats = store
            .insert_records(
                "mualaf",
                &[
                    case("1", "2025-01-01T00:00:00.000Z", "active", "Saudara Baru"),
                    Record::new().with("name", "no id"),
                ],
            )
            .unwrap();

        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.skipped_without_id, 1);
        assert_eq!(store.count_records("mualaf").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_fetch_page_filters_and_orders() {
        let store = seeded();

        let query = PageQuery {
            table: "mualaf".to_string(),
            filter: RecordFilter::with_status("active").with_category("SAUDARA"),
            offset: 0,
            limit: 10,
        };
        let page = store.fetch_page(&query).await.unwrap();

        assert_eq!(ids(&page), vec!["4".to_string(), "1".to_string()]);
    }

    #[tokio::test]
    async fn test_category_filter_matches_memory_store() {
        let store = seeded();
        store
            .insert_records(
                "mualaf",
                &[case("5", "2025-04-01T00:00:00.000Z", "active", "ÉCOLE Dimanche")],
            )
            .unwrap();

        let mut query = PageQuery {
            table: "mualaf".to_string(),
            filter: RecordFilter::with_status("active").with_category("école"),
            offset: 0,
            limit: 10,
        };
        assert_eq!(ids(&store.fetch_page(&query).await.unwrap()), vec!["5".to_string()]);

        // % and _ are plain characters, not wildcards
        for pattern in ["%", "s_udara"] {
            query.filter = RecordFilter::with_status("active").with_category(pattern);
            assert!(store.fetch_page(&query).await.unwrap().is_empty(), "{}", pattern);
        }

        let all = store.all_records("mualaf").unwrap();
        for pattern in ["école", "SAUDARA", "%", "s_udara"] {
            let filter = RecordFilter::with_status("active").with_category(pattern);
            query.filter = filter.clone();
            let mut expected: Vec<String> =
                all.iter().filter(|r| filter.matches(r)).filter_map(|r| r.id()).collect();
            let mut actual = ids(&store.fetch_page(&query).await.unwrap());
            expected.sort();
            actual.sort();
            assert_eq!(actual, expected, "{}", pattern);
        }
    }

    #[tokio::test]
    async fn test_fetch_page_pagination() {
        let store = seeded();

        let mut query = PageQuery {
            table: "mualaf".to_string(),
            filter: RecordFilter::with_status("active"),
            offset: 0,
            limit: 2,
        };
        let first = store.fetch_page(&query).await.unwrap();
        query.offset = 2;
        let second = store.fetch_page(&query).await.unwrap();

        assert_eq!(ids(&first), vec!["2".to_string(), "4".to_string()]);
        assert_eq!(ids(&second), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_update_record_merges_and_audits() {
        let store = seeded();
        let payload = Record::new()
            .with("name", "Nur Iman")
            .with("status", "inactive")
            .with("updatedBy", "amil@example.org");

        store.update_record("mualaf", "1", &payload).await.unwrap();

        let record = store.get_record("mualaf", "1").unwrap().unwrap();
        assert_eq!(record.get_text("name").as_deref(), Some("Nur Iman"));
        assert_eq!(record.get_text("category").as_deref(), Some("Saudara Baru"));

        // status column follows the JSON
        let query = PageQuery {
            table: "mualaf".to_string(),
            filter: RecordFilter::with_status("active"),
            offset: 0,
            limit: 10,
        };
        assert!(!ids(&store.fetch_page(&query).await.unwrap()).contains(&"1".to_string()));

        let events = store.get_events_for_record("mualaf", "1").unwrap();
        assert_eq!(events[0].event_type, "record_updated");
        assert_eq!(events[0].actor, "amil@example.org");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let store = seeded();
        let err = store
            .update_record("mualaf", "99", &Record::new().with("name", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RecordNotFound { .. }));
    }

    #[test]
    fn test_tables_are_separate() {
        let store = seeded();
        store
            .insert_records(
                "attendance",
                &[Record::new().with("id", "1").with("date", "2025-01-06")],
            )
            .unwrap();

        assert_eq!(store.count_records("attendance").unwrap(), 1);
        assert_eq!(store.all_records("attendance").unwrap().len(), 1);
        assert_eq!(store.all_records("mualaf").unwrap().len(), 4);
    }
}
