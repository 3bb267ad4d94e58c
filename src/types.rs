use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Messaging-platform user identifier. Stable and opaque to this crate.
pub type UserId = u64;

pub const UNKNOWN_CLASS: &str = "Unknown Class";
pub const UNKNOWN_ASSIGNMENT: &str = "Unknown Assignment";
pub const UNKNOWN_GRADE: &str = "Unknown Grade";

/// Attendance rows must never surface as grade records. Matched
/// case-insensitively as substrings, both against raw fragment text and
/// against the extracted class name.
pub const ATTENDANCE_MARKERS: &[&str] = &["attendance", "absent"];

pub fn is_attendance_marked(text: &str) -> bool {
    let lower = text.to_lowercase();
    ATTENDANCE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Portal login credentials for one user. Replaced wholesale on re-setup,
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: UserId,
    pub email: String,
    pub secret: String,
}

/// One assignment grade as extracted from the portal. Equality is exact
/// string equality across all three fields, which is what the change
/// detector diffs on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GradeRecord {
    pub class_name: String,
    pub assignment_name: String,
    pub grade: String,
}

impl GradeRecord {
    pub fn new(
        class_name: impl Into<String>,
        assignment_name: impl Into<String>,
        grade: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            assignment_name: assignment_name.into(),
            grade: grade.into(),
        }
    }

    /// Persisted/displayed line form. This exact format is stored in the
    /// `grades` table and must stay stable across releases so old snapshots
    /// keep decoding.
    pub fn to_line(&self) -> String {
        format!(
            "Class: {}, Test: {}, Grade: {}",
            self.class_name, self.assignment_name, self.grade
        )
    }

    /// Inverse of [`GradeRecord::to_line`]. Returns `None` for lines that
    /// do not carry all three separators; callers skip such lines rather
    /// than fail.
    pub fn from_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("Class: ")?;
        let (class_name, rest) = rest.split_once(", Test: ")?;
        let (assignment_name, grade) = rest.split_once(", Grade: ")?;
        Some(Self::new(class_name, assignment_name, grade))
    }
}

/// One row of the averages grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAverage {
    pub class_name: String,
    pub term_performance: String,
}

impl ClassAverage {
    pub fn to_line(&self) -> String {
        format!("Class: {}, Average: {}", self.class_name, self.term_performance)
    }
}

/// Full set of records known for a user as of the last successful poll.
/// Replaced wholesale after every successful fetch.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub user_id: UserId,
    pub records: HashSet<GradeRecord>,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_codec_round_trip() {
        let record = GradeRecord::new("Math 10", "Quiz 1", "85%");
        let line = record.to_line();
        assert_eq!(line, "Class: Math 10, Test: Quiz 1, Grade: 85%");
        assert_eq!(GradeRecord::from_line(&line), Some(record));
    }

    #[test]
    fn test_line_codec_sentinels() {
        let record = GradeRecord::new(UNKNOWN_CLASS, UNKNOWN_ASSIGNMENT, UNKNOWN_GRADE);
        assert_eq!(GradeRecord::from_line(&record.to_line()), Some(record));
    }

    #[test]
    fn test_line_codec_rejects_malformed() {
        assert_eq!(GradeRecord::from_line("not a grade line"), None);
        assert_eq!(GradeRecord::from_line("Class: Math, Grade: 90%"), None);
        assert_eq!(GradeRecord::from_line(""), None);
    }

    #[test]
    fn test_attendance_markers_case_insensitive() {
        assert!(is_attendance_marked("Daily Attendance"));
        assert!(is_attendance_marked("student was ABSENT today"));
        assert!(!is_attendance_marked("Math 10"));
    }
}
