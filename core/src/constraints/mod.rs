//! Constraint history and solve orchestration.
//!
//! Entries live in an ordered [`ConstraintHistory`]. A run walks them in
//! declaration order for up to `max_iterations` relaxation passes, asking
//! each live constraint to compute and apply a correction through the
//! scene, then folds the results back into every entry's persisted status.

pub mod types;
pub mod registry;
pub mod history;
pub mod duplicates;
pub mod hooks;
pub mod merge;
pub mod solver;
pub mod scheduler;

#[cfg(test)]
mod tests_registry;
#[cfg(test)]
mod tests_history;
#[cfg(test)]
mod tests_duplicates;
#[cfg(test)]
mod tests_scheduler;

pub use duplicates::{detect_duplicates, DuplicateInfo, DuplicateMap};
pub use history::{ChangeKind, ConstraintHistory, HistoryChange, HistorySnapshot, SnapshotEntry};
pub use hooks::{HookDetail, HookError, HookEvent, NoHooks, RunHooks, SkipReason};
pub use merge::{merge_persistent_data, MergeStamp};
pub use registry::{
    normalize_type_key, Constraint, ConstraintError, ConstraintKind, ConstraintRegistry, ParamField,
    ParamSchema, ParamType,
};
pub use scheduler::{AssemblySession, AutoRunner, RunScheduler};
pub use solver::{run_all, CancelToken, RunOptions, RunRecord, RunReport, RunState, SolveContext};
pub use types::{
    ConstraintEntry, ConstraintResult, ConstraintStatus, InputParams, PersistentData, SolveOutcome,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Unregistered constraint type: {0}")]
    UnregisteredConstraintType(String),

    #[error("Unknown constraint type: {0}")]
    UnknownConstraintType(String),

    #[error("Constraint not found: {0}")]
    ConstraintNotFound(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;
