//! Document variables and numeric expressions.
//!
//! Numeric constraint parameters may be written as expressions such as
//! `"@gap * 2 + 1"`. They are resolved to plain numbers against the
//! document's [`VariableStore`] before a solve run starts.

pub mod parser;
pub mod evaluator;


pub use evaluator::{evaluate, evaluate_str, resolve_number, EvalError};
pub use parser::{parse_expression, BinaryOperator, Expr, ParseError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named numeric values referenced from expressions as `@name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableStore {
    values: BTreeMap<String, f64>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: f64) -> Option<f64> {
        self.values.insert(name.to_string(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn remove(&mut self, name: &str) -> Option<f64> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
