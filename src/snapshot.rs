// 📸 Snapshots & Sync Sessions
//
// A Snapshot is the diff baseline: record id → fingerprint, captured when a
// table is pulled. A SyncSession is the explicit context a push runs against
// ({table, snapshot}); nothing is read from ambient storage.
//
// SnapshotStore keeps the CURRENT snapshot per table for the lifetime of an
// edit session. Snapshots are version-stamped (SHA-256 over sorted entries),
// so a push based on a snapshot that a later pull replaced is rejected.

use crate::error::{SyncError, SyncResult};
use crate::fingerprint::fingerprint;
use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    table: String,
    entries: BTreeMap<String, String>,
    version: String,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Fingerprint every record that has an id.
    pub fn capture(table: &str, records: &[Record]) -> Self {
        let entries = records
            .iter()
            .filter_map(|record| record.id().map(|id| (id, fingerprint(record))))
            .collect();

        Self::from_entries(table, entries)
    }

    pub fn from_entries(table: &str, entries: BTreeMap<String, String>) -> Self {
        let version = compute_version(&entries);
        Snapshot {
            table: table.to_string(),
            entries,
            version,
            captured_at: Utc::now(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|fp| fp.as_str())
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persisted layout: `{identifier: fingerprint}`
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(&self.entries)?)
    }

    pub fn from_json(table: &str, json: &str) -> SyncResult<Self> {
        let entries: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(Self::from_entries(table, entries))
    }
}

/// SHA-256 over `id \t fingerprint \n` lines in id order.
fn compute_version(entries: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (id, fp) in entries {
        hasher.update(id.as_bytes());
        hasher.update(b"\t");
        hasher.update(fp.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// SYNC SESSION
// ============================================================================

/// Context for one push: the table and the baseline it diffs against.
/// Obtained from `SnapshotStore::commit` / `SnapshotStore::session`.
#[derive(Debug, Clone)]
pub struct SyncSession {
    snapshot: Arc<Snapshot>,
}

impl SyncSession {
    pub fn table(&self) -> &str {
        self.snapshot.table()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn version(&self) -> &str {
        self.snapshot.version()
    }
}

// ============================================================================
// SNAPSHOT STORE
// ============================================================================

/// Session-scoped store of the current snapshot per table.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, Arc<Snapshot>>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `snapshot` the current baseline for its table.
    pub fn commit(&self, snapshot: Snapshot) -> SyncSession {
        let snapshot = Arc::new(snapshot);
        debug!(
            table = snapshot.table(),
            entries = snapshot.len(),
            version = snapshot.version(),
            "committing snapshot"
        );

        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.insert(snapshot.table().to_string(), snapshot.clone());

        SyncSession { snapshot }
    }

    /// Session for the current snapshot of `table`.
    pub fn session(&self, table: &str) -> SyncResult<SyncSession> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        snapshots
            .get(table)
            .map(|snapshot| SyncSession {
                snapshot: snapshot.clone(),
            })
            .ok_or_else(|| SyncError::MissingSnapshot {
                table: table.to_string(),
            })
    }

    pub fn current_version(&self, table: &str) -> Option<String> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        snapshots.get(table).map(|s| s.version().to_string())
    }

    /// Reject a session whose baseline is gone or was replaced by a newer pull.
    pub fn ensure_current(&self, session: &SyncSession) -> SyncResult<()> {
        match self.current_version(session.table()) {
            None => Err(SyncError::MissingSnapshot {
                table: session.table().to_string(),
            }),
            Some(current) if current != session.version() => Err(SyncError::StaleSnapshot {
                table: session.table().to_string(),
                session_version: session.version().to_string(),
                current_version: current,
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn clear(&self, table: &str) -> bool {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.remove(table).is_some()
    }

    /// End of session.
    pub fn clear_all(&self) {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.clear();
    }

    pub fn tables(&self) -> Vec<String> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        let mut tables: Vec<String> = snapshots.keys().cloned().collect();
        tables.sort();
        tables
    }

    // ========================================================================
    // SESSION DIRECTORY (CLI keeps one file per table between invocations)
    // ========================================================================

    pub fn save_table(&self, dir: &Path, table: &str) -> SyncResult<()> {
        let session = self.session(table)?;
        fs::create_dir_all(dir)?;
        fs::write(session_file(dir, table), session.snapshot().to_json()?)?;
        Ok(())
    }

    /// Load `<table>.json` from the session directory, if present.
    pub fn load_table(&self, dir: &Path, table: &str) -> SyncResult<Option<SyncSession>> {
        let path = session_file(dir, table);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)?;
        let snapshot = Snapshot::from_json(table, &json)?;
        Ok(Some(self.commit(snapshot)))
    }

    pub fn remove_table_file(dir: &Path, table: &str) -> SyncResult<()> {
        let path = session_file(dir, table);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SHEET STAMPS
// ============================================================================

/// Which snapshot a sheet file was exported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetStamp {
    pub table: String,
    pub version: String,
}

/// Never collides with a table file: table names have '.' replaced.
const SHEET_STAMPS_FILE: &str = "sheets.index.json";

impl SnapshotStore {
    /// Record that `sheet` now holds the export behind `session`.
    pub fn stamp_sheet(dir: &Path, sheet: &Path, session: &SyncSession) -> SyncResult<()> {
        let mut stamps = read_stamps(dir)?;
        stamps.insert(
            sheet_key(sheet),
            SheetStamp {
                table: session.table().to_string(),
                version: session.version().to_string(),
            },
        );
        write_stamps(dir, &stamps)
    }

    /// Forget `sheet`, e.g. after an export into it failed half way.
    pub fn unstamp_sheet(dir: &Path, sheet: &Path) -> SyncResult<()> {
        let mut stamps = read_stamps(dir)?;
        if stamps.remove(&sheet_key(sheet)).is_some() {
            write_stamps(dir, &stamps)?;
        }
        Ok(())
    }

    pub fn sheet_stamp(dir: &Path, sheet: &Path) -> SyncResult<Option<SheetStamp>> {
        Ok(read_stamps(dir)?.remove(&sheet_key(sheet)))
    }

    /// Session for pushing `sheet` back into `table`. The saved snapshot must
    /// be the one the sheet was exported under; a later pull of the same table
    /// (into any sheet) makes this sheet stale.
    pub fn load_sheet_session(&self, dir: &Path, table: &str, sheet: &Path) -> SyncResult<SyncSession> {
        let missing = || SyncError::MissingSnapshot {
            table: table.to_string(),
        };

        let session = self.load_table(dir, table)?.ok_or_else(missing)?;
        let stamp = match Self::sheet_stamp(dir, sheet)? {
            Some(stamp) if stamp.table == table => stamp,
            _ => return Err(missing()),
        };

        if stamp.version != session.version() {
            debug!(table, sheet = %sheet.display(), "sheet was exported under an older snapshot");
            return Err(SyncError::StaleSnapshot {
                table: table.to_string(),
                session_version: stamp.version,
                current_version: session.version().to_string(),
            });
        }

        Ok(session)
    }
}

fn sheet_key(sheet: &Path) -> String {
    fs::canonicalize(sheet)
        .unwrap_or_else(|_| sheet.to_path_buf())
        .display()
        .to_string()
}

fn read_stamps(dir: &Path) -> SyncResult<BTreeMap<String, SheetStamp>> {
    let path = dir.join(SHEET_STAMPS_FILE);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn write_stamps(dir: &Path, stamps: &BTreeMap<String, SheetStamp>) -> SyncResult<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(SHEET_STAMPS_FILE), serde_json::to_string_pretty(stamps)?)?;
    Ok(())
}

fn session_file(dir: &Path, table: &str) -> std::path::PathBuf {
    let safe: String = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.json", safe))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record> {
        vec![
            Record::new().with("id", "1").with("name", "Aminah"),
            Record::new().with("id", "2").with("name", "Yusuf"),
            Record::new().with("name", "no id"),
        ]
    }

    #[test]
    fn test_capture_skips_records_without_id() {
        let snapshot = Snapshot::capture("mualaf", &records());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("1"), Some("1|Aminah|"));
        assert_eq!(snapshot.get("3"), None);
        assert_eq!(snapshot.version().len(), 64);
    }

    #[test]
    fn test_version_depends_on_content_only() {
        let a = Snapshot::capture("mualaf", &records());
        let mut reversed = records();
        reversed.reverse();
        let b = Snapshot::capture("mualaf", &reversed);

        assert_eq!(a.version(), b.version());

        let changed = Snapshot::capture(
            "mualaf",
            &[Record::new().with("id", "1").with("name", "Aminah binti Ali")],
        );
        assert_ne!(a.version(), changed.version());
    }

    #[test]
    fn test_json_layout_round_trip() {
        let snapshot = Snapshot::capture("mualaf", &records());
        let json = snapshot.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["1"], "1|Aminah|");

        let restored = Snapshot::from_json("mualaf", &json).unwrap();
        assert_eq!(restored.entries(), snapshot.entries());
        assert_eq!(restored.version(), snapshot.version());
    }

    #[test]
    fn test_missing_snapshot() {
        let store = SnapshotStore::new();
        let err = store.session("attendance").unwrap_err();
        assert!(matches!(err, SyncError::MissingSnapshot { .. }));
    }

    #[test]
    fn test_newer_pull_makes_session_stale() {
        let store = SnapshotStore::new();
        let first = store.commit(Snapshot::capture("mualaf", &records()));
        assert!(store.ensure_current(&first).is_ok());

        let newer = vec![Record::new().with("id", "1").with("name", "Changed")];
        store.commit(Snapshot::capture("mualaf", &newer));

        let err = store.ensure_current(&first).unwrap_err();
        assert!(matches!(err, SyncError::StaleSnapshot { .. }));
    }

    #[test]
    fn test_tables_do_not_collide() {
        let store = SnapshotStore::new();
        let cases = store.commit(Snapshot::capture("mualaf", &records()));
        store.commit(Snapshot::capture(
            "attendance",
            &[Record::new().with("id", "a-1").with("date", "2025-01-06")],
        ));

        assert!(store.ensure_current(&cases).is_ok());
        assert_eq!(store.tables(), vec!["attendance".to_string(), "mualaf".to_string()]);

        assert!(store.clear("mualaf"));
        assert!(matches!(
            store.ensure_current(&cases).unwrap_err(),
            SyncError::MissingSnapshot { .. }
        ));
    }

    #[test]
    fn test_session_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new();
        let session = store.commit(Snapshot::capture("staff/allowance", &records()));
        store.save_table(dir.path(), "staff/allowance").unwrap();

        assert!(dir.path().join("staff_allowance.json").exists());

        let fresh = SnapshotStore::new();
        let loaded = fresh
            .load_table(dir.path(), "staff/allowance")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.version(), session.version());

        assert!(fresh.load_table(dir.path(), "other").unwrap().is_none());

        SnapshotStore::remove_table_file(dir.path(), "staff/allowance").unwrap();
        assert!(!dir.path().join("staff_allowance.json").exists());
    }

    #[test]
    fn test_sheet_exported_under_older_snapshot_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let first_sheet = dir.path().join("first.csv");
        let second_sheet = dir.path().join("second.csv");
        fs::write(&first_sheet, "id,name\n").unwrap();
        fs::write(&second_sheet, "id,name\n").unwrap();

        let store = SnapshotStore::new();
        let first = store.commit(Snapshot::capture("mualaf", &records()));
        store.save_table(dir.path(), "mualaf").unwrap();
        SnapshotStore::stamp_sheet(dir.path(), &first_sheet, &first).unwrap();

        let fresh = SnapshotStore::new();
        let loaded = fresh.load_sheet_session(dir.path(), "mualaf", &first_sheet).unwrap();
        assert_eq!(loaded.version(), first.version());

        // A second pull of the same table into another sheet
        let newer = vec![Record::new().with("id", "1").with("name", "Changed")];
        let second = store.commit(Snapshot::capture("mualaf", &newer));
        store.save_table(dir.path(), "mualaf").unwrap();
        SnapshotStore::stamp_sheet(dir.path(), &second_sheet, &second).unwrap();

        let fresh = SnapshotStore::new();
        match fresh.load_sheet_session(dir.path(), "mualaf", &first_sheet).unwrap_err() {
            SyncError::StaleSnapshot {
                session_version,
                current_version,
                ..
            } => {
                assert_eq!(session_version, first.version());
                assert_eq!(current_version, second.version());
            }
            other => panic!("expected StaleSnapshot, got {:?}", other),
        }
        assert!(fresh.load_sheet_session(dir.path(), "mualaf", &second_sheet).is_ok());

        // Never stamped, or stamped for another table
        let unknown = dir.path().join("unknown.csv");
        assert!(matches!(
            fresh.load_sheet_session(dir.path(), "mualaf", &unknown).unwrap_err(),
            SyncError::MissingSnapshot { .. }
        ));
        SnapshotStore::unstamp_sheet(dir.path(), &second_sheet).unwrap();
        assert!(SnapshotStore::sheet_stamp(dir.path(), &second_sheet).unwrap().is_none());
        assert!(matches!(
            fresh.load_sheet_session(dir.path(), "mualaf", &second_sheet).unwrap_err(),
            SyncError::MissingSnapshot { .. }
        ));
        println!("✅ Sheet stamp test passed");
    }
}
