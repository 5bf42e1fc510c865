//! Folding run results back into persisted status records.

use super::duplicates::DuplicateInfo;
use super::types::{ConstraintResult, ConstraintStatus, PersistentData};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct MergeStamp {
    pub run_at: DateTime<Utc>,
    pub iteration: usize,
    pub requested_iterations: usize,
}

/// Produces the new status record for an entry after a run.
///
/// Only engine-owned fields are written. Duplicate bookkeeping is set for
/// `duplicate` results and stripped otherwise; everything in `extra` is
/// carried over untouched.
pub fn merge_persistent_data(
    previous: &PersistentData,
    result: &ConstraintResult,
    stamp: &MergeStamp,
) -> PersistentData {
    let mut merged = previous.clone();
    merged.status = result.status;
    merged.message = result.message.clone();
    merged.satisfied = result.satisfied;
    merged.error = result.error.filter(|e| e.is_finite());
    merged.last_run_at = Some(stamp.run_at);
    merged.last_iteration = Some(stamp.iteration);
    merged.last_requested_iterations = Some(stamp.requested_iterations);

    if result.status == ConstraintStatus::Duplicate {
        merged.duplicate_constraint_ids = Some(result.duplicate_ids.clone());
        merged.duplicate_signature = result.duplicate_signature.clone();
    } else {
        merged.clear_duplicate_info();
    }
    merged
}

/// Status-only refresh used outside of a run: no timestamps, no error value.
pub(crate) fn mark_status(data: &mut PersistentData, status: ConstraintStatus, message: &str) {
    data.status = status;
    data.message = message.to_string();
    data.satisfied = false;
    if status != ConstraintStatus::Duplicate {
        data.clear_duplicate_info();
    }
}

pub(crate) fn mark_duplicate(data: &mut PersistentData, info: &DuplicateInfo) {
    mark_status(data, ConstraintStatus::Duplicate, &info.message);
    data.duplicate_constraint_ids = Some(info.related_ids.clone());
    data.duplicate_signature = Some(info.signature.clone());
}
