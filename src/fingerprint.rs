// 🔏 Fingerprinting & Normalization
//
// A fingerprint is the normalized business content of a record:
//   sorted field names, bookkeeping fields skipped, each value normalized
//   and followed by FIELD_DELIMITER.
//
// Used to detect whether a spreadsheet row changed since it was exported.
// Values are normalized so that a round-trip through a spreadsheet (which
// has no null, and shows booleans as TRUE/FALSE) does not look like an edit.

use crate::record::{is_bookkeeping, Record};
use serde_json::Value;

/// Separator appended after every normalized value.
pub const FIELD_DELIMITER: char = '|';

/// Normalize one value for fingerprinting
///
/// - null → ""
/// - strings are trimmed
/// - "true"/"false" (any case) and booleans → "TRUE"/"FALSE"
/// - numbers use their JSON text
/// - arrays/objects use compact JSON (same text as the exported cell)
pub fn normalize_value(value: &Value) -> String {
    let text = match value {
        Value::Null => return String::new(),
        Value::Bool(true) => return "TRUE".to_string(),
        Value::Bool(false) => return "FALSE".to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string().trim().to_string(),
    };

    if text.eq_ignore_ascii_case("true") {
        "TRUE".to_string()
    } else if text.eq_ignore_ascii_case("false") {
        "FALSE".to_string()
    } else {
        text
    }
}

/// Compute the fingerprint of a record's business fields.
pub fn fingerprint(record: &Record) -> String {
    let mut names: Vec<&str> = record
        .field_names()
        .filter(|name| !is_bookkeeping(name))
        .collect();
    names.sort_unstable();

    let mut acc = String::new();
    for name in names {
        if let Some(value) = record.get(name) {
            acc.push_str(&normalize_value(value));
        }
        acc.push(FIELD_DELIMITER);
    }

    acc
}

// ============================================================================
// TESTS
// ============================================================================
