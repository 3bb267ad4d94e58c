//! Fragment parsing.
//!
//! Turns raw text fragments harvested from the portal's content list into
//! typed [`GradeRecord`]s. The portal renders these as loosely formatted
//! lines with `Class:` / `Period:` / `Assignment:` / `Grade:` markers in no
//! reliable shape, so extraction is an ordered list of substring rules with
//! sentinel fallbacks. Fields the portal omits become sentinels, never
//! errors. Pure and deterministic, no I/O.

use std::collections::HashSet;

use crate::types::{
    is_attendance_marked, GradeRecord, UNKNOWN_ASSIGNMENT, UNKNOWN_CLASS, UNKNOWN_GRADE,
};

const CLASS_MARKER: &str = "Class:";
/// The portal renders the period both as `Period: 2` and as `(Period 2)`,
/// so the class-name boundary matches the bare word.
const PERIOD_MARKER: &str = "Period";
const ASSIGNMENT_MARKER: &str = "Assignment:";
const GRADE_MARKER: &str = "Grade:";
/// Some portal rows carry this phrase instead of a bare `Grade:` marker.
const ASSIGNMENT_GRADE_MARKER: &str = "Assignment Grade";

/// Parse all fragments into a deduplicated record set. Fragments that are
/// not assignment records (or that are attendance rows) are dropped
/// silently.
pub fn parse_fragments<S: AsRef<str>>(fragments: &[S]) -> HashSet<GradeRecord> {
    fragments
        .iter()
        .filter_map(|f| parse_fragment(f.as_ref()))
        .collect()
}

/// Parse one fragment. `None` means the fragment is not a grade record.
pub fn parse_fragment(text: &str) -> Option<GradeRecord> {
    // No attendance row may become a record. The denylist runs on the raw
    // text here and again on the extracted class name below, so the filter
    // holds even if extraction ever stops being a pure substring of the raw.
    if is_attendance_marked(text) {
        return None;
    }

    if !text.contains(ASSIGNMENT_GRADE_MARKER) && !text.contains(GRADE_MARKER) {
        return None;
    }

    let class_name = extract_class_name(text);
    if is_attendance_marked(&class_name) {
        return None;
    }

    let assignment_name = slice_after(text, ASSIGNMENT_MARKER)
        .map(|rest| clean_field(cut_before(rest, GRADE_MARKER)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_ASSIGNMENT.to_string());

    let grade = slice_after(text, GRADE_MARKER)
        .map(|rest| clean_field(cut_before(rest, ASSIGNMENT_MARKER)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_GRADE.to_string());

    Some(GradeRecord::new(class_name, assignment_name, grade))
}

/// Class name rules, in order: text between `Class:` and a following
/// `Period:`, else the first parenthesized group, else the sentinel.
fn extract_class_name(text: &str) -> String {
    if let Some(rest) = slice_after(text, CLASS_MARKER) {
        let name = clean_field(cut_before(rest, PERIOD_MARKER));
        if !name.is_empty() {
            return name;
        }
    }

    if let Some(open) = text.find('(') {
        let rest = &text[open + 1..];
        let inner = cut_before(rest, ")");
        let name = clean_field(inner);
        if !name.is_empty() {
            return name;
        }
    }

    UNKNOWN_CLASS.to_string()
}

/// Text after the first occurrence of `marker`, or `None` when absent.
fn slice_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.find(marker).map(|idx| &text[idx + marker.len()..])
}

/// Text before the first occurrence of `marker`, or all of it when absent.
fn cut_before<'a>(text: &'a str, marker: &str) -> &'a str {
    match text.find(marker) {
        Some(idx) => &text[..idx],
        None => text,
    }
}

/// Marker splits leave separator debris behind ("Math 10 (" when the period
/// follows in parentheses, "Quiz 1," before a grade marker). Strip it along
/// with surrounding whitespace.
fn clean_field(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['(', ','])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_fragment() {
        let record =
            parse_fragment("Class: Math 10 (Period 2), Assignment: Quiz 1, Grade: 85%").unwrap();
        assert_eq!(record.class_name, "Math 10");
        assert_eq!(record.assignment_name, "Quiz 1");
        assert_eq!(record.grade, "85%");
    }

    #[test]
    fn test_fragment_without_class_marker() {
        let record = parse_fragment("Grade: B Assignment: Essay").unwrap();
        assert_eq!(record.class_name, UNKNOWN_CLASS);
        assert_eq!(record.assignment_name, "Essay");
        assert_eq!(record.grade, "B");
    }

    #[test]
    fn test_class_bounded_at_period_with_or_without_colon() {
        let parenthesized = parse_fragment("Class: Math 10 (Period 2), Grade: 85%").unwrap();
        assert_eq!(parenthesized.class_name, "Math 10");
        let colon = parse_fragment("Class: Math 10 Period: 2 Grade: 85%").unwrap();
        assert_eq!(colon.class_name, "Math 10");
    }

    #[test]
    fn test_class_from_parentheses() {
        let record = parse_fragment("Assignment Grade posted (French 9) Grade: 72%").unwrap();
        assert_eq!(record.class_name, "French 9");
        assert_eq!(record.grade, "72%");
        assert_eq!(record.assignment_name, UNKNOWN_ASSIGNMENT);
    }

    #[test]
    fn test_grade_bounded_by_assignment_marker() {
        let record = parse_fragment("Grade: 91% Assignment: Unit Test").unwrap();
        assert_eq!(record.grade, "91%");
        assert_eq!(record.assignment_name, "Unit Test");
    }

    #[test]
    fn test_assignment_grade_marker_without_colon_grade() {
        let record = parse_fragment("Class: History 11 Period: 3 Assignment Grade updated").unwrap();
        assert_eq!(record.class_name, "History 11");
        assert_eq!(record.grade, UNKNOWN_GRADE);
        assert_eq!(record.assignment_name, UNKNOWN_ASSIGNMENT);
    }

    #[test]
    fn test_non_grade_fragments_dropped() {
        assert!(parse_fragment("Upcoming field trip on Friday").is_none());
        assert!(parse_fragment("Class: Math 10 Period: 2 schedule change").is_none());
    }

    #[test]
    fn test_attendance_filtered_on_raw_text() {
        assert!(parse_fragment("Attendance Grade: present").is_none());
        assert!(parse_fragment("ATTENDANCE record Grade: n/a").is_none());
    }

    #[test]
    fn test_attendance_filtered_case_insensitively_anywhere() {
        assert!(parse_fragment("Grade: ok (Was Absent Term 1)").is_none());
        assert!(parse_fragment("Class: Attendance Period: 1 Grade: present").is_none());
    }

    #[test]
    fn test_first_marker_occurrence_wins() {
        let record =
            parse_fragment("Class: Math 10 Period: 2 Grade: 85% Assignment: Quiz Grade: redo")
                .unwrap();
        assert_eq!(record.grade, "85%");
        assert_eq!(record.assignment_name, "Quiz");
    }

    #[test]
    fn test_set_semantics_deduplicate() {
        let fragments = vec![
            "Class: Math 10 Period: 2 Assignment: Quiz 1 Grade: 85%",
            "Class: Math 10 Period: 2 Assignment: Quiz 1 Grade: 85%",
            "Class: Math 10 Period: 2 Assignment: Quiz 2 Grade: 90%",
        ];
        assert_eq!(parse_fragments(&fragments).len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let fragments = vec![
            "Class: Math 10 (Period 2), Assignment: Quiz 1, Grade: 85%",
            "Grade: B Assignment: Essay",
            "Attendance Grade: present",
        ];
        let first = parse_fragments(&fragments);
        let second = parse_fragments(&fragments);
        assert_eq!(first, second);
    }
}
