use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Type-specific configuration of an entry, including its `elements`
/// selection list and numeric targets.
pub type InputParams = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintStatus {
    /// Not evaluated yet, or still converging
    #[default]
    Pending,
    Satisfied,
    /// A correction was applied but residual error remains
    Adjusted,
    Error,
    Disabled,
    /// Shares its selection pair with another entry (same or other family)
    Duplicate,
}

impl ConstraintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Satisfied => "satisfied",
            Self::Adjusted => "adjusted",
            Self::Error => "error",
            Self::Disabled => "disabled",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for ConstraintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Solver-owned status record stored on each entry.
///
/// Keys the engine does not own are kept in `extra` and survive merges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentData {
    #[serde(default)]
    pub status: ConstraintStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub satisfied: bool,
    #[serde(default)]
    pub error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_iteration: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_requested_iterations: Option<usize>,
    #[serde(default, rename = "duplicateConstraintIDs", skip_serializing_if = "Option::is_none")]
    pub duplicate_constraint_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_signature: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistentData {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn clear_duplicate_info(&mut self) {
        self.duplicate_constraint_ids = None;
        self.duplicate_signature = None;
    }
}

/// One user-declared constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEntry {
    /// Mirrored into `input_params["id"]`.
    pub id: String,
    /// Normalized type key.
    pub constraint_type: String,
    pub input_params: InputParams,
    pub persistent_data: PersistentData,
    pub enabled: bool,
    /// UI expansion flag; ignored by the solver.
    pub open: bool,
}

impl ConstraintEntry {
    pub fn new(id: &str, constraint_type: &str, input_params: InputParams) -> Self {
        let mut entry = Self {
            id: id.to_string(),
            constraint_type: constraint_type.to_string(),
            input_params,
            persistent_data: PersistentData::pending(),
            enabled: true,
            open: false,
        };
        entry.sync_id_param();
        entry
    }

    /// Selection endpoints (`inputParams.elements`).
    pub fn elements(&self) -> &[Value] {
        match self.input_params.get("elements") {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn status(&self) -> ConstraintStatus {
        self.persistent_data.status
    }

    pub(crate) fn sync_id_param(&mut self) {
        self.input_params
            .insert("id".to_string(), Value::String(self.id.clone()));
    }
}

/// What a constraint implementation reports from one `solve` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub ok: bool,
    /// Explicit status; derived from the flags when absent.
    pub status: Option<ConstraintStatus>,
    pub satisfied: bool,
    /// True only when the scene was actually mutated.
    pub applied: bool,
    pub error: Option<f64>,
    pub message: Option<String>,
    pub diagnostics: Option<Value>,
}

impl SolveOutcome {
    pub fn satisfied(error: f64) -> Self {
        Self { ok: true, satisfied: true, error: Some(error), ..Default::default() }
    }

    pub fn adjusted(error: f64, applied: bool) -> Self {
        Self { ok: true, applied, error: Some(error), ..Default::default() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { ok: false, message: Some(message.into()), ..Default::default() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Value) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

/// Normalized per-entry result kept by the solve loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintResult {
    pub ok: bool,
    pub status: ConstraintStatus,
    pub satisfied: bool,
    pub applied: bool,
    pub error: Option<f64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,
    /// Iteration that produced this result; `None` for synthetic results.
    pub iteration: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub duplicate_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_signature: Option<String>,
}

impl ConstraintResult {
    /// Fills in a status from the outcome flags when the implementation
    /// did not set one.
    pub fn from_outcome(outcome: SolveOutcome, iteration: usize) -> Self {
        let status = outcome.status.unwrap_or(if !outcome.ok {
            ConstraintStatus::Error
        } else if outcome.satisfied {
            ConstraintStatus::Satisfied
        } else if outcome.applied {
            ConstraintStatus::Adjusted
        } else {
            ConstraintStatus::Pending
        });
        let message = outcome.message.unwrap_or_else(|| default_message(status).to_string());
        Self {
            ok: outcome.ok,
            status,
            satisfied: outcome.satisfied,
            applied: outcome.applied,
            error: outcome.error,
            message,
            diagnostics: outcome.diagnostics,
            iteration: Some(iteration),
            duplicate_ids: Vec::new(),
            duplicate_signature: None,
        }
    }

    pub fn failure(message: impl Into<String>, iteration: Option<usize>) -> Self {
        Self {
            iteration,
            ..Self::synthetic(ConstraintStatus::Error, message)
        }
    }

    /// Result that never came from a `solve` call.
    pub fn synthetic(status: ConstraintStatus, message: impl Into<String>) -> Self {
        Self {
            ok: !matches!(status, ConstraintStatus::Error),
            status,
            satisfied: false,
            applied: false,
            error: None,
            message: message.into(),
            diagnostics: None,
            iteration: None,
            duplicate_ids: Vec::new(),
            duplicate_signature: None,
        }
    }
}

fn default_message(status: ConstraintStatus) -> &'static str {
    match status {
        ConstraintStatus::Pending => "Awaiting further iterations",
        ConstraintStatus::Satisfied => "Satisfied",
        ConstraintStatus::Adjusted => "Adjusted",
        ConstraintStatus::Error => "Constraint failed",
        ConstraintStatus::Disabled => "Constraint disabled",
        ConstraintStatus::Duplicate => "Duplicate constraint",
    }
}
