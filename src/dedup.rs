// 🔍 Deduplication Engine - Detect duplicate case records
// Two strategies: Exact Key, Fuzzy Name
//
// Keys are compared on their fuzzy form (lowercase alphanumerics only), so
// "Siti Nur-Aisyah" / "siti nuraisyah" and "012-345 6789" / "0123456789"
// are the same key.

use crate::fingerprint::normalize_value;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default key fields.
pub const DEFAULT_KEY_FIELDS: [&str; 2] = ["name", "phone"];

/// Patronymic and honorific words shared by too many converts to count as evidence.
pub const COMMON_NAME_WORDS: [&str; 13] = [
    "bin", "binti", "binte", "bte", "anak", "abdullah", "muhammad", "mohammad", "mohamad",
    "mohd", "siti", "nur", "noor",
];

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// Every key field has the same fuzzy key
    ExactKey,

    /// Other key fields equal, names overlap (shared word or containment)
    FuzzyName,
}

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub first_index: usize,
    pub second_index: usize,
    pub first_id: Option<String>,
    pub second_id: Option<String>,

    /// 0.0 - 1.0
    pub confidence: f64,

    pub strategy: MatchStrategy,

    /// Human-readable reason
    pub reason: String,
}

/// Lowercase alphanumerics only.
pub fn fuzzy_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_common_word(word: &str) -> bool {
    COMMON_NAME_WORDS.contains(&word)
}

/// Words of at least 4 letters, lowercased, common name words left out.
fn name_words(name: &str) -> HashSet<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().filter(|c| c.is_alphabetic()).count() >= 4)
        .filter(|w| !is_common_word(w))
        .map(str::to_string)
        .collect()
}

/// Fuzzy key of the distinctive part of a name.
fn distinctive_key(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !is_common_word(w))
        .map(fuzzy_key)
        .collect()
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    /// Fields forming the identity key (default: name, phone)
    pub key_fields: Vec<String>,

    /// Which key field holds the person's name
    pub name_field: String,

    /// Confidence for exact key matches (default: 0.95)
    pub exact_match_confidence: f64,

    /// Floor for fuzzy name matches (default: 0.70)
    pub fuzzy_match_threshold: f64,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine {
            key_fields: DEFAULT_KEY_FIELDS.iter().map(|f| f.to_string()).collect(),
            name_field: "name".to_string(),
            exact_match_confidence: 0.95,
            fuzzy_match_threshold: 0.70,
        }
    }

    pub fn with_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Pairwise comparison; each pair reported at most once, exact first.
    pub fn find_duplicates(&self, records: &[Record]) -> Vec<DuplicateMatch> {
        let keys: Vec<Vec<String>> = records.iter().map(|r| self.keys_of(r)).collect();
        let mut matches = Vec::new();

        for i in 0..records.len() {
            for j in (i + 1)..records.len() {
                if let Some(m) = self.check_exact_key(i, j, records, &keys) {
                    matches.push(m);
                    continue;
                }

                if let Some(m) = self.check_fuzzy_name(i, j, records, &keys) {
                    matches.push(m);
                }
            }
        }

        matches
    }

    fn keys_of(&self, record: &Record) -> Vec<String> {
        self.key_fields
            .iter()
            .map(|field| record.get(field).map(|v| fuzzy_key(&normalize_value(v))).unwrap_or_default())
            .collect()
    }

    fn display_key(&self, record: &Record) -> String {
        self.key_fields
            .iter()
            .map(|field| record.get(field).map(normalize_value).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Strategy 1: Exact Key
    fn check_exact_key(
        &self,
        i: usize,
        j: usize,
        records: &[Record],
        keys: &[Vec<String>],
    ) -> Option<DuplicateMatch> {
        // Records with no key at all are not evidence of anything
        if keys[i].iter().all(String::is_empty) || keys[i] != keys[j] {
            return None;
        }

        Some(DuplicateMatch {
            first_index: i,
            second_index: j,
            first_id: records[i].id(),
            second_id: records[j].id(),
            confidence: self.exact_match_confidence,
            strategy: MatchStrategy::ExactKey,
            reason: format!("Exact key: {}", self.display_key(&records[i])),
        })
    }

    /// Strategy 2: Fuzzy Name
    fn check_fuzzy_name(
        &self,
        i: usize,
        j: usize,
        records: &[Record],
        keys: &[Vec<String>],
    ) -> Option<DuplicateMatch> {
        let name_pos = self.key_fields.iter().position(|f| *f == self.name_field)?;

        // Every non-name key must be filled in on both sides and agree exactly
        let others_equal = keys[i]
            .iter()
            .zip(&keys[j])
            .enumerate()
            .all(|(pos, (a, b))| pos == name_pos || (!a.is_empty() && a == b));
        if !others_equal {
            return None;
        }

        let name1 = records[i].get_text(&self.name_field).unwrap_or_default();
        let name2 = records[j].get_text(&self.name_field).unwrap_or_default();
        let key1 = distinctive_key(&name1);
        let key2 = distinctive_key(&name2);
        if key1.is_empty() || key2.is_empty() {
            return None;
        }

        let contains_match = key1.contains(&key2) || key2.contains(&key1);

        let words1 = name_words(&name1);
        let words2 = name_words(&name2);
        let shared = words1.intersection(&words2).count();

        if !contains_match && shared == 0 {
            return None;
        }

        // Share of words in common (containment counts as full overlap)
        let name_score = if contains_match {
            1.0
        } else {
            shared as f64 / words1.len().max(words2.len()) as f64
        };
        let confidence = (0.55 + 0.35 * name_score).max(self.fuzzy_match_threshold);

        Some(DuplicateMatch {
            first_index: i,
            second_index: j,
            first_id: records[i].id(),
            second_id: records[j].id(),
            confidence,
            strategy: MatchStrategy::FuzzyName,
            reason: format!("Fuzzy name: {} ≈ {}", name1.trim(), name2.trim()),
        })
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, name: &str, phone: &str) -> Record {
        Record::new().with("id", id).with("name", name).with("phone", phone)
    }

    #[test]
    fn test_fuzzy_key() {
        assert_eq!(fuzzy_key("Siti Nur-Aisyah"), "sitinuraisyah");
        assert_eq!(fuzzy_key("012-345 6789"), "0123456789");
        assert_eq!(fuzzy_key("  "), "");
    }

    #[test]
    fn test_exact_key_ignores_case_and_punctuation() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            person("1", "Siti Nur-Aisyah", "012-345 6789"),
            person("2", "siti nuraisyah", "0123456789"),
        ];

        let matches = engine.find_duplicates(&records);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].strategy, MatchStrategy::ExactKey);
        assert_eq!(matches[0].confidence, 0.95);
        assert_eq!(matches[0].second_id.as_deref(), Some("2"));

        println!("✅ Exact key test passed: {}", matches[0].reason);
    }

    #[test]
    fn test_fuzzy_name_shared_word() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            person("1", "Muhammad Daniel Lee", "0111111111"),
            person("2", "Daniel Lee Wei Ming", "011-1111111"),
        ];

        let matches = engine.find_duplicates(&records);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].strategy, MatchStrategy::FuzzyName);
        assert!(matches[0].confidence >= 0.70);
        assert!(matches[0].confidence < 0.95);
    }

    #[test]
    fn test_fuzzy_name_containment() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            person("1", "Aminah", "0199999999"),
            person("2", "Nur Aminah Abdullah", "0199999999"),
        ];

        let matches = engine.find_duplicates(&records);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].strategy, MatchStrategy::FuzzyName);
        assert!((matches[0].confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_no_match_different_phone() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            person("1", "Daniel Lee", "0111111111"),
            person("2", "Daniel Lee", "0122222222"),
        ];
        assert!(engine.find_duplicates(&records).is_empty());
    }

    #[test]
    fn test_no_match_short_common_word() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            person("1", "Ali bin Abu", "0111111111"),
            person("2", "Ahmad bin Osman", "0111111111"),
        ];
        assert!(engine.find_duplicates(&records).is_empty());
    }

    #[test]
    fn test_patronymic_alone_is_not_evidence() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            Record::new().with("id", "1").with("name", "Aminah binti Abdullah").with("phone", serde_json::Value::Null),
            Record::new().with("id", "2").with("name", "Siti binti Ahmad").with("phone", ""),
            person("3", "Aisyah binti Abdullah", "0133333333"),
            person("4", "Khadijah binti Abdullah", "0133333333"),
            person("5", "Abdullah", "0133333333"),
        ];
        assert!(engine.find_duplicates(&records).is_empty());
    }

    #[test]
    fn test_blank_phones_do_not_agree() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            person("1", "Aminah binti Abdullah", ""),
            person("2", "Aminah Lim binti Abdullah", ""),
        ];
        assert!(engine.find_duplicates(&records).is_empty());

        let with_phone = vec![
            person("1", "Aminah binti Abdullah", "0144444444"),
            person("2", "Aminah Lim binti Abdullah", "014-4444444"),
        ];
        let matches = engine.find_duplicates(&with_phone);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].strategy, MatchStrategy::FuzzyName);
        println!("✅ Common name word test passed: {}", matches[0].reason);
    }

    #[test]
    fn test_blank_keys_never_match() {
        let engine = DeduplicationEngine::new();
        let records = vec![Record::new().with("id", "1"), Record::new().with("id", "2")];
        assert!(engine.find_duplicates(&records).is_empty());
    }

    #[test]
    fn test_custom_key_fields() {
        let engine = DeduplicationEngine::new().with_key_fields(["name", "icNumber"]);
        let records = vec![
            Record::new().with("name", "Hana").with("icNumber", "900101-14-5566"),
            Record::new().with("name", "HANA").with("icNumber", "900101145566"),
        ];

        let matches = engine.find_duplicates(&records);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].first_id, None);
    }
}
