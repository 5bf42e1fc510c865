//! Lookup table from normalized type keys to constraint implementations.

use super::solver::SolveContext;
use super::types::{InputParams, SolveOutcome};
use super::{AssemblyError, AssemblyResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Number or numeric expression string
    Number,
    Boolean,
    String,
    /// List of opaque selections
    Selections,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub name: &'static str,
    pub param_type: ParamType,
    pub default_value: Value,
}

impl ParamField {
    pub fn new(name: &'static str, param_type: ParamType, default_value: Value) -> Self {
        Self { name, param_type, default_value }
    }
}

/// Ordered input-parameter schema.
pub type ParamSchema = Vec<ParamField>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstraintError {
    #[error("Selection {0} could not be resolved")]
    Unresolved(usize),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// A live constraint instance, seeded with a copy of an entry's parameters.
pub trait Constraint: Send {
    /// Computes a correction and applies it through `ctx`.
    /// Errors are recorded against the entry; they never abort a run.
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError>;

    /// Parameters as the instance currently holds them. Keys added here
    /// during a run are carried back onto the entry.
    fn input_params(&self) -> &InputParams;
}

/// Static description and factory of one constraint type.
pub trait ConstraintKind: Send + Sync {
    fn type_key(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Fallback lookup name (e.g. `DistanceConstraint`).
    fn class_name(&self) -> &'static str;

    fn short_name(&self) -> &'static str;

    fn long_name(&self) -> &'static str;

    /// Prefix of generated entry IDs.
    fn id_prefix(&self) -> &'static str {
        self.short_name()
    }

    fn input_params_schema(&self) -> ParamSchema;

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint>;

    fn default_params(&self) -> InputParams {
        self.input_params_schema()
            .into_iter()
            .map(|field| (field.name.to_string(), field.default_value))
            .collect()
    }
}

/// Lowercases, trims and collapses whitespace/hyphen runs to `_`, so
/// `"Touch Align"`, `"touch-align"` and `"touch_align"` share one key.
pub fn normalize_type_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_sep = !key.is_empty();
            continue;
        }
        if pending_sep {
            key.push('_');
            pending_sep = false;
        }
        key.extend(c.to_lowercase());
    }
    key
}

#[derive(Clone, Default)]
pub struct ConstraintRegistry {
    by_key: HashMap<String, Arc<dyn ConstraintKind>>,
    /// Registration order, one slot per type key.
    kinds: Vec<Arc<dyn ConstraintKind>>,
}

impl fmt::Debug for ConstraintRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintRegistry")
            .field("types", &self.kinds.iter().map(|k| k.type_key()).collect::<Vec<_>>())
            .finish()
    }
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in kinds.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::kinds::register_builtin(&mut registry);
        registry
    }

    pub fn register(&mut self, kind: Arc<dyn ConstraintKind>) {
        let type_key = normalize_type_key(kind.type_key());
        let names = std::iter::once(kind.type_key())
            .chain(kind.aliases().iter().copied())
            .chain(std::iter::once(kind.class_name()));
        for name in names {
            let key = normalize_type_key(name);
            if key.is_empty() {
                continue;
            }
            if let Some(previous) = self.by_key.insert(key.clone(), kind.clone()) {
                if normalize_type_key(previous.type_key()) != type_key {
                    tracing::debug!(key = %key, "constraint key re-registered to {}", kind.type_key());
                }
            }
        }

        match self
            .kinds
            .iter()
            .position(|k| normalize_type_key(k.type_key()) == type_key)
        {
            Some(slot) => self.kinds[slot] = kind,
            None => self.kinds.push(kind),
        }
    }

    pub fn register_kind<K: ConstraintKind + 'static>(&mut self, kind: K) {
        self.register(Arc::new(kind));
    }

    pub fn get(&self, name: &str) -> AssemblyResult<Arc<dyn ConstraintKind>> {
        self.get_safe(name)
            .ok_or_else(|| AssemblyError::UnregisteredConstraintType(name.to_string()))
    }

    pub fn get_safe(&self, name: &str) -> Option<Arc<dyn ConstraintKind>> {
        self.by_key.get(&normalize_type_key(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_key.contains_key(&normalize_type_key(name))
    }

    /// Each registered implementation once, in registration order.
    pub fn list(&self) -> Vec<Arc<dyn ConstraintKind>> {
        self.kinds.clone()
    }
}
