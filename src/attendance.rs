// 📅 Attendance validation - class-day checks for attendance records
//
// Each attendance record carries a `date` and a `studentId`. Rules:
//   date_present / date_valid   Critical
//   date_not_future             Critical
//   date_on_class_day           Warning
//   no_duplicate_entry          Warning

use crate::error::{SyncError, SyncResult};
use crate::record::Record;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const DATE_FIELD: &str = "date";
pub const STUDENT_FIELD: &str = "studentId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Entry cannot be counted
    Warning,  // Entry is questionable
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceIssue {
    pub record_index: usize,
    pub record_id: Option<String>,
    pub severity: Severity,
    pub rule: String,
    pub issue: String,
    pub recommendation: String,
}

// ============================================================================
// ATTENDANCE REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub total_records: usize,
    /// Records with no issue at all
    pub clean_records: usize,
    pub issues: Vec<AttendanceIssue>,
}

impl AttendanceReport {
    pub fn critical_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Critical).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Warning).count()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.critical_count() > 0
    }

    pub fn issues_for(&self, record_index: usize) -> Vec<&AttendanceIssue> {
        self.issues.iter().filter(|i| i.record_index == record_index).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records: {} clean | {} critical, {} warnings",
            self.total_records,
            self.clean_records,
            self.critical_count(),
            self.warning_count()
        )
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct AttendanceValidator {
    /// Weekdays on which classes are scheduled
    pub class_days: Vec<Weekday>,

    /// Dates after this are in the future
    pub today: NaiveDate,
}

impl AttendanceValidator {
    pub fn new(class_days: Vec<Weekday>, today: NaiveDate) -> Self {
        AttendanceValidator { class_days, today }
    }

    /// Accepts YYYY-MM-DD and DD/MM/YYYY.
    pub fn parse_date(text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
            .ok()
    }

    pub fn validate(&self, records: &[Record]) -> AttendanceReport {
        let mut issues = Vec::new();
        let mut seen: HashMap<(String, NaiveDate), usize> = HashMap::new();

        for (index, record) in records.iter().enumerate() {
            let issue = |severity, rule: &str, issue: String, recommendation: &str| AttendanceIssue {
                record_index: index,
                record_id: record.id(),
                severity,
                rule: rule.to_string(),
                issue,
                recommendation: recommendation.to_string(),
            };

            let raw = record.get_text(DATE_FIELD).unwrap_or_default();
            if raw.trim().is_empty() {
                issues.push(issue(
                    Severity::Critical,
                    "date_present",
                    "Date is empty".to_string(),
                    "Fill in the class date",
                ));
                continue;
            }

            let Some(date) = Self::parse_date(&raw) else {
                issues.push(issue(
                    Severity::Critical,
                    "date_valid",
                    format!("Invalid date format: {}", raw),
                    "Use YYYY-MM-DD or DD/MM/YYYY",
                ));
                continue;
            };

            if date > self.today {
                issues.push(issue(
                    Severity::Critical,
                    "date_not_future",
                    format!("Date {} is after {}", date, self.today),
                    "Attendance can only be recorded for past classes",
                ));
            }

            if !self.class_days.contains(&date.weekday()) {
                issues.push(issue(
                    Severity::Warning,
                    "date_on_class_day",
                    format!("{} is a {:?}, not a class day", date, date.weekday()),
                    "Check the date against the class schedule",
                ));
            }

            let student = record.get_text(STUDENT_FIELD).unwrap_or_default();
            let student = student.trim();
            if !student.is_empty() {
                if let Some(first) = seen.get(&(student.to_string(), date)) {
                    issues.push(issue(
                        Severity::Warning,
                        "no_duplicate_entry",
                        format!("Student {} already recorded on {} (record {})", student, date, first),
                        "Remove the duplicate entry",
                    ));
                } else {
                    seen.insert((student.to_string(), date), index);
                }
            }
        }

        let flagged: HashSet<usize> = issues.iter().map(|i| i.record_index).collect();

        AttendanceReport {
            total_records: records.len(),
            clean_records: records.len() - flagged.len(),
            issues,
        }
    }
}

/// Comma-separated weekday names ("mon,thu" or "Monday, Thursday").
pub fn parse_class_days(text: &str) -> SyncResult<Vec<Weekday>> {
    text.split(',')
        .map(str::trim)
        .filter(|day| !day.is_empty())
        .map(|day| {
            day.parse::<Weekday>()
                .map_err(|_| SyncError::Config(format!("unknown weekday: {}", day)))
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, student: &str, date: &str) -> Record {
        Record::new().with("id", id).with("studentId", student).with("date", date)
    }

    fn validator() -> AttendanceValidator {
        // 2024-03-15 is a Friday
        AttendanceValidator::new(
            vec![Weekday::Tue, Weekday::Sat],
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        )
    }

    #[test]
    fn test_clean_entries() {
        let report = validator().validate(&[
            entry("a1", "s1", "2024-03-12"),
            entry("a2", "s1", "09/03/2024"),
            entry("a3", "s2", "2024-03-12"),
        ]);

        assert_eq!(report.clean_records, 3);
        assert!(report.issues.is_empty());
        println!("✅ Clean attendance test passed: {}", report.summary());
    }

    #[test]
    fn test_missing_and_invalid_dates_are_critical() {
        let report = validator().validate(&[
            entry("a1", "s1", ""),
            entry("a2", "s1", "12-03-2024"),
            Record::new().with("id", "a3").with("studentId", "s2"),
        ]);

        assert_eq!(report.critical_count(), 3);
        assert_eq!(report.clean_records, 0);
        assert_eq!(report.issues_for(1)[0].rule, "date_valid");
    }

    #[test]
    fn test_future_date_is_critical() {
        let report = validator().validate(&[entry("a1", "s1", "2024-03-16")]);

        assert!(report.has_critical_issues());
        assert_eq!(report.issues[0].rule, "date_not_future");
    }

    #[test]
    fn test_non_class_day_is_warning() {
        let report = validator().validate(&[entry("a1", "s1", "2024-03-13")]);

        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.issues[0].rule, "date_on_class_day");
        assert_eq!(report.issues[0].record_id.as_deref(), Some("a1"));
    }

    #[test]
    fn test_duplicate_student_day_is_warning() {
        let report = validator().validate(&[
            entry("a1", "s1", "2024-03-12"),
            entry("a2", " s1 ", "12/03/2024"),
        ]);

        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.issues[0].record_index, 1);
        assert_eq!(report.issues[0].rule, "no_duplicate_entry");
        assert_eq!(report.clean_records, 1);
    }

    #[test]
    fn test_parse_class_days() {
        assert_eq!(
            parse_class_days("tue, Saturday").unwrap(),
            vec![Weekday::Tue, Weekday::Sat]
        );
        assert!(parse_class_days("someday").is_err());
    }
}
