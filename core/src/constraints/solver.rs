//! The relaxation loop.
//!
//! A run walks the history in declaration order, once per iteration, and
//! lets every live constraint correct the scene in place (later entries see
//! the corrections of earlier ones within the same pass). The loop stops
//! early at the first iteration that leaves no applied-but-unsatisfied
//! correction behind.

use super::duplicates::DuplicateMap;
use super::history::{ChangeKind, ConstraintHistory, DISABLED_MESSAGE};
use super::hooks::{fire, HookDetail, HookEvent, RunHooks, SkipReason};
use super::merge::{merge_persistent_data, MergeStamp};
use super::registry::{Constraint, ConstraintKind, ParamType};
use super::types::{ConstraintEntry, ConstraintResult, ConstraintStatus, InputParams};
use crate::geometry::{Quaternion, Vector3};
use crate::scene::{Component, ComponentId, SceneAdapter};
use crate::variables::{resolve_number, VariableStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NOT_EVALUATED_MESSAGE: &str = "Run aborted before evaluation";

/// Effective settings of one run. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub translation_gain: f64,
    pub rotation_gain: f64,
    /// Pause between iterations, for visual debugging.
    pub iteration_delay_ms: u64,
    pub render_each_iteration: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 1,
            translation_gain: 0.5,
            rotation_gain: 0.5,
            iteration_delay_ms: 0,
            render_each_iteration: true,
        }
    }
}

impl RunOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_gains(mut self, translation: f64, rotation: f64) -> Self {
        self.translation_gain = translation;
        self.rotation_gain = rotation;
        self
    }

    /// At least one iteration, gains clamped to `[0, 1]`, and a positive
    /// finite tolerance.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let gain = |value: f64, fallback: f64| {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                fallback
            }
        };
        Self {
            tolerance: if self.tolerance.is_finite() && self.tolerance > 0.0 {
                self.tolerance
            } else {
                defaults.tolerance
            },
            max_iterations: self.max_iterations.max(1),
            translation_gain: gain(self.translation_gain, defaults.translation_gain),
            rotation_gain: gain(self.rotation_gain, defaults.rotation_gain),
            iteration_delay_ms: self.iteration_delay_ms,
            render_each_iteration: self.render_each_iteration,
        }
    }
}

/// Cooperative cancellation flag shared between a run and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bookkeeping shared by every constraint call of one run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Components moved so far, in first-move order.
    pub updated: Vec<ComponentId>,
    /// Components held in place by a constraint for the rest of the run.
    /// The scene's own `fixed` flags are never written.
    pub grounded: HashSet<ComponentId>,
}

/// What a constraint sees while solving: selection resolution, gains,
/// tolerance and the only sanctioned ways to move a component.
pub struct SolveContext<'a> {
    scene: &'a mut dyn SceneAdapter,
    state: &'a mut RunState,
    pub translation_gain: f64,
    pub rotation_gain: f64,
    pub tolerance: f64,
    pub iteration: usize,
    pub max_iterations: usize,
}

impl<'a> SolveContext<'a> {
    pub fn new(
        scene: &'a mut dyn SceneAdapter,
        state: &'a mut RunState,
        options: &RunOptions,
        iteration: usize,
    ) -> Self {
        Self {
            scene,
            state,
            translation_gain: options.translation_gain,
            rotation_gain: options.rotation_gain,
            tolerance: options.tolerance,
            iteration,
            max_iterations: options.max_iterations,
        }
    }

    pub fn resolve(&self, selection: &Value) -> Option<ComponentId> {
        self.scene.resolve_object(selection)
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.scene.component(id)
    }

    /// Fixed in the scene, or grounded earlier in this run.
    pub fn is_component_fixed(&self, id: ComponentId) -> bool {
        self.state.grounded.contains(&id) || self.scene.is_component_fixed(id)
    }

    /// Holds `id` in place until the run ends. Returns false when the
    /// component does not exist.
    pub fn ground(&mut self, id: ComponentId) -> bool {
        if self.scene.component(id).is_none() {
            return false;
        }
        self.state.grounded.insert(id);
        true
    }

    /// Fixed components are never moved.
    pub fn apply_translation(&mut self, id: ComponentId, delta: &Vector3) -> bool {
        if self.is_component_fixed(id) {
            return false;
        }
        let applied = self.scene.apply_translation(id, delta);
        if applied {
            self.mark_updated(id);
        }
        applied
    }

    pub fn apply_rotation(&mut self, id: ComponentId, rotation: &Quaternion) -> bool {
        if self.is_component_fixed(id) {
            return false;
        }
        let applied = self.scene.apply_rotation(id, rotation);
        if applied {
            self.mark_updated(id);
        }
        applied
    }

    pub fn render(&mut self) {
        if let Err(e) = self.scene.render_scene() {
            debug!(error = %e, "render request failed");
        }
    }

    /// Components moved so far in this run.
    pub fn updated(&self) -> &[ComponentId] {
        self.state.updated.as_slice()
    }

    fn mark_updated(&mut self, id: ComponentId) {
        if !self.state.updated.contains(&id) {
            self.state.updated.push(id);
        }
    }
}

/// Final result of one entry, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub constraint_type: String,
    pub index: usize,
    pub result: ConstraintResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub records: Vec<RunRecord>,
    pub aborted: bool,
    /// Iterations that ran to completion.
    pub iterations: usize,
}

impl RunReport {
    pub fn result_for(&self, id: &str) -> Option<&ConstraintResult> {
        self.records.iter().find(|r| r.id == id).map(|r| &r.result)
    }
}

struct RuntimeRecord {
    id: String,
    constraint_type: String,
    index: usize,
    instance: Option<Box<dyn Constraint>>,
    skip: Option<SkipReason>,
    result: ConstraintResult,
}

impl RuntimeRecord {
    fn prepare(
        index: usize,
        entry: &ConstraintEntry,
        history: &ConstraintHistory,
        duplicates: &DuplicateMap,
    ) -> Self {
        let mut record = Self {
            id: entry.id.clone(),
            constraint_type: entry.constraint_type.clone(),
            index,
            instance: None,
            skip: None,
            result: ConstraintResult::synthetic(ConstraintStatus::Pending, NOT_EVALUATED_MESSAGE),
        };

        if !entry.enabled {
            record.skip = Some(SkipReason::Disabled);
            record.result = ConstraintResult::synthetic(ConstraintStatus::Disabled, DISABLED_MESSAGE);
            return record;
        }

        if let Some(info) = duplicates.get(&entry.id) {
            let mut result = ConstraintResult::synthetic(ConstraintStatus::Duplicate, info.message.clone());
            result.duplicate_ids = info.related_ids.clone();
            result.duplicate_signature = Some(info.signature.clone());
            record.skip = Some(SkipReason::Duplicate);
            record.result = result;
            return record;
        }

        let Some(kind) = history.kind_of(entry) else {
            record.skip = Some(SkipReason::Unregistered);
            record.result = ConstraintResult::failure(
                format!("Unregistered constraint type '{}'", entry.constraint_type),
                None,
            );
            return record;
        };

        match evaluate_params(kind.as_ref(), &entry.input_params, &history.variables) {
            Ok(params) => record.instance = Some(kind.instantiate(params)),
            Err(message) => {
                record.skip = Some(SkipReason::InvalidParams);
                record.result = ConstraintResult::failure(message, None);
            }
        }
        record
    }
}

/// Copies `params`, replacing expression strings in numeric schema fields
/// with their value.
fn evaluate_params(
    kind: &dyn ConstraintKind,
    params: &InputParams,
    variables: &VariableStore,
) -> Result<InputParams, String> {
    let mut resolved = params.clone();
    for field in kind.input_params_schema() {
        if field.param_type != ParamType::Number {
            continue;
        }
        let Some(value) = params.get(field.name).filter(|v| v.is_string()) else {
            continue;
        };
        let replacement = match resolve_number(value, variables) {
            Ok(Some(number)) => Number::from_f64(number)
                .map(Value::Number)
                .ok_or_else(|| format!("Invalid parameter '{}': not a finite number", field.name))?,
            Ok(None) => field.default_value.clone(),
            Err(e) => return Err(format!("Invalid parameter '{}': {}", field.name, e)),
        };
        resolved.insert(field.name.to_string(), replacement);
    }
    Ok(resolved)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Constraint panicked: {}", detail)
}

fn solve_one(
    instance: &mut dyn Constraint,
    scene: &mut dyn SceneAdapter,
    state: &mut RunState,
    options: &RunOptions,
    iteration: usize,
) -> ConstraintResult {
    let mut ctx = SolveContext::new(scene, state, options, iteration);
    match catch_unwind(AssertUnwindSafe(|| instance.solve(&mut ctx))) {
        Ok(Ok(outcome)) => ConstraintResult::from_outcome(outcome, iteration),
        Ok(Err(e)) => ConstraintResult::failure(e.to_string(), Some(iteration)),
        Err(payload) => ConstraintResult::failure(panic_message(payload), Some(iteration)),
    }
}

/// Runs up to `options.max_iterations` relaxation passes over `history`
/// and writes every entry's outcome back into its `persistent_data`.
///
/// Cancellation is polled at entry, at each iteration start, before each
/// constraint and after each pass. An aborted run is still finalized.
pub async fn run_all(
    history: &mut ConstraintHistory,
    scene: &mut dyn SceneAdapter,
    options: &RunOptions,
    hooks: &dyn RunHooks,
    cancel: &CancelToken,
) -> RunReport {
    let options = options.normalized();
    let duplicates = history.refresh_statuses();
    let total = history.len();

    let mut runtime: Vec<RuntimeRecord> = history
        .entries()
        .iter()
        .enumerate()
        .map(|(index, entry)| RuntimeRecord::prepare(index, entry, history, &duplicates))
        .collect();

    info!(
        constraints = total,
        max_iterations = options.max_iterations,
        "starting constraint run"
    );
    fire("on_start", || hooks.on_start(&HookEvent::run(0, total)));

    let mut state = RunState::default();
    let mut aborted = cancel.is_cancelled();
    let mut completed = 0usize;
    let mut last_reached = 0usize;

    if !aborted {
        for iteration in 0..options.max_iterations {
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }
            last_reached = iteration;
            fire("on_iteration_start", || {
                hooks.on_iteration_start(&HookEvent::run(iteration, total))
            });

            let mut any_applied = false;
            let mut converging = false;
            for record in runtime.iter_mut() {
                if cancel.is_cancelled() {
                    aborted = true;
                    break;
                }
                let event = HookEvent::entry(
                    iteration,
                    record.index,
                    &record.id,
                    &record.constraint_type,
                    total,
                );
                let Some(instance) = record.instance.as_mut() else {
                    let reason = record.skip.unwrap_or(SkipReason::Unregistered);
                    fire("on_constraint_skipped", || {
                        hooks.on_constraint_skipped(&event.with(HookDetail::Skipped(reason)))
                    });
                    continue;
                };

                fire("on_constraint_start", || hooks.on_constraint_start(&event));
                let result = solve_one(instance.as_mut(), scene, &mut state, &options, iteration);
                debug!(
                    id = %record.id,
                    iteration,
                    status = %result.status,
                    applied = result.applied,
                    "constraint evaluated"
                );
                any_applied |= result.applied;
                converging |= result.applied && !result.satisfied;
                record.result = result;
                fire("on_constraint_end", || {
                    hooks.on_constraint_end(&event.with(HookDetail::Result(&record.result)))
                });
            }

            if aborted || cancel.is_cancelled() {
                aborted = true;
                break;
            }

            if options.render_each_iteration {
                if let Err(e) = scene.render_scene() {
                    debug!(error = %e, "render request failed");
                }
            }
            if options.iteration_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(options.iteration_delay_ms)).await;
            } else {
                tokio::task::yield_now().await;
            }

            completed += 1;
            fire("on_iteration_complete", || {
                hooks.on_iteration_complete(
                    &HookEvent::run(iteration, total)
                        .with(HookDetail::IterationComplete { applied: any_applied }),
                )
            });
            if !converging {
                debug!(iteration, "no unsatisfied correction left; stopping early");
                break;
            }
        }
    }

    if aborted {
        warn!(completed, "constraint run aborted");
    }

    let stamp_time = Utc::now();
    for (record, entry) in runtime.iter().zip(history.entries_mut().iter_mut()) {
        let stamp = MergeStamp {
            run_at: stamp_time,
            iteration: record.result.iteration.unwrap_or(last_reached),
            requested_iterations: options.max_iterations,
        };
        entry.persistent_data = merge_persistent_data(&entry.persistent_data, &record.result, &stamp);

        // Stored parameters stay as authored; only keys a constraint
        // introduced during the run are carried back.
        if let Some(instance) = &record.instance {
            for (key, value) in instance.input_params() {
                if !entry.input_params.contains_key(key) {
                    entry.input_params.insert(key.clone(), value.clone());
                }
            }
        }
    }

    scene.sync_transforms(&state.updated);

    let records: Vec<RunRecord> = runtime
        .into_iter()
        .map(|r| RunRecord {
            id: r.id,
            constraint_type: r.constraint_type,
            index: r.index,
            result: r.result,
        })
        .collect();

    history.emit(ChangeKind::Solve, None);
    fire("on_complete", || {
        hooks.on_complete(&HookEvent::run(last_reached, total).with(HookDetail::Complete {
            results: &records,
            aborted,
            iterations: completed,
        }))
    });
    info!(iterations = completed, aborted, moved = state.updated.len(), "constraint run finished");

    RunReport {
        records,
        aborted,
        iterations: completed,
    }
}
