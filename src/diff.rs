//! Change detection between snapshots.

use std::collections::HashSet;

use crate::types::GradeRecord;

/// Records present in `current` but not in `previous`, i.e. what the user
/// has not been told about yet. An empty `previous` means this is the first
/// successful fetch for the user: the whole set is treated as an already
/// known baseline and nothing is reported, so a freshly onboarded user is
/// not flooded with their entire grade history. Result order is
/// unspecified.
pub fn new_records(
    previous: &HashSet<GradeRecord>,
    current: &HashSet<GradeRecord>,
) -> Vec<GradeRecord> {
    if previous.is_empty() {
        return Vec::new();
    }
    current.difference(previous).cloned().collect()
}
