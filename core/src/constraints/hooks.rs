//! Host hook table fired by the solve loop.
//!
//! Every hook receives a [`HookEvent`]. A hook that returns an error or
//! panics is logged and otherwise ignored; it never aborts the run.

use super::solver::RunRecord;
use super::types::ConstraintResult;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct HookError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    Disabled,
    Duplicate,
    Unregistered,
    /// A numeric parameter could not be evaluated
    InvalidParams,
}

#[derive(Debug, Clone, Copy)]
pub enum HookDetail<'a> {
    None,
    Skipped(SkipReason),
    Result(&'a ConstraintResult),
    IterationComplete { applied: bool },
    Complete {
        results: &'a [RunRecord],
        aborted: bool,
        iterations: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct HookEvent<'a> {
    pub iteration: usize,
    /// Declaration index of the entry, for per-constraint hooks.
    pub index: Option<usize>,
    pub id: Option<&'a str>,
    pub constraint_type: Option<&'a str>,
    pub total_constraints: usize,
    pub detail: HookDetail<'a>,
}

impl<'a> HookEvent<'a> {
    pub(crate) fn run(iteration: usize, total_constraints: usize) -> Self {
        Self {
            iteration,
            index: None,
            id: None,
            constraint_type: None,
            total_constraints,
            detail: HookDetail::None,
        }
    }

    pub(crate) fn entry(iteration: usize, index: usize, id: &'a str, constraint_type: &'a str, total: usize) -> Self {
        Self {
            iteration,
            index: Some(index),
            id: Some(id),
            constraint_type: Some(constraint_type),
            total_constraints: total,
            detail: HookDetail::None,
        }
    }

    pub(crate) fn with(mut self, detail: HookDetail<'a>) -> Self {
        self.detail = detail;
        self
    }
}

pub trait RunHooks: Send + Sync {
    fn on_start(&self, _event: &HookEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_iteration_start(&self, _event: &HookEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_constraint_start(&self, _event: &HookEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_constraint_skipped(&self, _event: &HookEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_constraint_end(&self, _event: &HookEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_iteration_complete(&self, _event: &HookEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn on_complete(&self, _event: &HookEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Empty hook table.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl RunHooks for NoHooks {}

/// Invokes one hook, logging and discarding failures.
pub(crate) fn fire<F>(name: &str, hook: F)
where
    F: FnOnce() -> Result<(), HookError>,
{
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(hook = name, error = %e, "run hook failed"),
        Err(_) => tracing::warn!(hook = name, "run hook panicked"),
    }
}
