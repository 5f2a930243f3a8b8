// 📄 Record - one row of a tracked table (case record, attendance entry, ...)
//
// Records are maps, not structs: every table has its own columns and the
// reconciliation logic must work on all of them. Field order is preserved
// (serde_json `preserve_order`) so exports can keep the source column order.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// FIELD NAMES
// ============================================================================

/// Identifier column. Must be present (exactly this name) in a pushed sheet.
pub const ID_FIELD: &str = "id";

pub const CREATED_AT: &str = "createdAt";
pub const CREATED_BY: &str = "createdBy";
pub const UPDATED_AT: &str = "updatedAt";
pub const UPDATED_BY: &str = "updatedBy";

/// Bookkeeping fields: ignored by fingerprinting, stripped from update payloads.
pub const BOOKKEEPING_FIELDS: [&str; 4] = [CREATED_AT, CREATED_BY, UPDATED_AT, UPDATED_BY];

/// Status column used by the default pull filter.
pub const STATUS_FIELD: &str = "status";

/// Category column used by the optional pull filter.
pub const CATEGORY_FIELD: &str = "category";

pub fn is_bookkeeping(field: &str) -> bool {
    BOOKKEEPING_FIELDS.contains(&field)
}

/// RFC 3339 timestamp in the shape the backend stores (`2025-01-31T10:00:00.000Z`).
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Record(Map::new())
    }

    /// Builder: add a field
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Field value as text (strings as-is, numbers/booleans formatted, null → None)
    pub fn get_text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Record identifier, trimmed. Empty or missing → None.
    pub fn id(&self) -> Option<String> {
        let id = match self.0.get(ID_FIELD)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Fields that may be written back: everything except `id` and bookkeeping.
    pub fn update_payload(&self) -> Record {
        self.0
            .iter()
            .filter(|(k, _)| k.as_str() != ID_FIELD && !is_bookkeeping(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Stamp `updatedAt` / `updatedBy`.
    pub fn stamp_update(&mut self, actor: &str, at: DateTime<Utc>) {
        self.0.insert(UPDATED_AT.to_string(), Value::String(timestamp(at)));
        self.0.insert(UPDATED_BY.to_string(), Value::String(actor.to_string()));
    }

    /// Stamp `createdAt` / `createdBy` unless already present.
    pub fn stamp_created(&mut self, actor: &str, at: DateTime<Utc>) {
        if self.get_text(CREATED_AT).map_or(true, |s| s.trim().is_empty()) {
            self.0.insert(CREATED_AT.to_string(), Value::String(timestamp(at)));
        }
        if self.get_text(CREATED_BY).map_or(true, |s| s.trim().is_empty()) {
            self.0.insert(CREATED_BY.to_string(), Value::String(actor.to_string()));
        }
    }

    /// Copy every field of `other` over this record. A null for a field this
    /// record never had is skipped, so sheet padding does not add fields.
    pub fn merge(&mut self, other: &Record) {
        for (k, v) in other.iter() {
            if v.is_null() && !self.0.contains_key(k) {
                continue;
            }
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Record(iter.into_iter().collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_id_normalization() {
        assert_eq!(Record::new().with("id", " 42 ").id(), Some("42".to_string()));
        assert_eq!(Record::new().with("id", 7).id(), Some("7".to_string()));
        assert_eq!(Record::new().with("id", "   ").id(), None);
        assert_eq!(Record::new().with("id", Value::Null).id(), None);
        assert_eq!(Record::new().with("name", "Aisyah").id(), None);
    }

    #[test]
    fn test_update_payload_strips_id_and_bookkeeping() {
        let record = Record::new()
            .with("id", "r-1")
            .with("name", "Ahmad")
            .with("createdAt", "2025-01-01T00:00:00.000Z")
            .with("createdBy", "admin")
            .with("updatedAt", "2025-01-02T00:00:00.000Z")
            .with("updatedBy", "admin")
            .with("state", "Selangor");

        let payload = record.update_payload();

        assert_eq!(payload.len(), 2);
        assert_eq!(payload.get("name"), Some(&json!("Ahmad")));
        assert_eq!(payload.get("state"), Some(&json!("Selangor")));
        assert!(!payload.contains("id"));
        assert!(!payload.contains("createdAt"));
    }

    #[test]
    fn test_stamps() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();
        let mut record = Record::new().with("id", "r-1").with("createdBy", "importer");

        record.stamp_created("someone-else", at);
        record.stamp_update("amil@example.org", at);

        assert_eq!(record.get_text("createdBy").as_deref(), Some("importer"));
        assert_eq!(record.get_text("createdAt").as_deref(), Some("2025-03-01T08:30:00.000Z"));
        assert_eq!(record.get_text("updatedBy").as_deref(), Some("amil@example.org"));
    }

    #[test]
    fn test_merge_skips_null_for_absent_fields() {
        let mut stored = Record::new().with("id", "1").with("name", "Aminah").with("phone", "0123");
        let payload = Record::new()
            .with("name", "Aminah Lim")
            .with("phone", Value::Null)
            .with("notes", Value::Null);

        stored.merge(&payload);

        assert_eq!(stored.get("name"), Some(&json!("Aminah Lim")));
        assert_eq!(stored.get("phone"), Some(&Value::Null));
        assert!(!stored.contains("notes"));
    }

    #[test]
    fn test_field_order_preserved() {
        let record = Record::new().with("zeta", 1).with("alpha", 2).with("mid", 3);
        let names: Vec<&str> = record.field_names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }
}
