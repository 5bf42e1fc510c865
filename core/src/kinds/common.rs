//! Selection anchors and parameter helpers shared by the built-in kinds.

use crate::constraints::{ConstraintError, InputParams, SolveContext};
use crate::geometry::{is_finite_vector, vector_from_value, Point3, Vector3, EPSILON};
use crate::scene::ComponentId;
use serde_json::Value;

/// A resolved selection, expressed in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub component: ComponentId,
    pub point: Point3,
    /// Unit length.
    pub normal: Vector3,
    pub fixed: bool,
}

pub fn elements(params: &InputParams) -> &[Value] {
    match params.get("elements") {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

/// Resolves `elements[slot]`. The selection may carry a local `point`
/// (default origin) and `normal` (default +Z).
pub fn resolve_anchor(
    ctx: &SolveContext<'_>,
    params: &InputParams,
    slot: usize,
) -> Result<Anchor, ConstraintError> {
    let selection = elements(params).get(slot).ok_or(ConstraintError::Unresolved(slot))?;
    let id = ctx.resolve(selection).ok_or(ConstraintError::Unresolved(slot))?;
    let component = ctx.component(id).ok_or(ConstraintError::Unresolved(slot))?;

    let local_point = selection
        .get("point")
        .and_then(vector_from_value)
        .unwrap_or_else(Vector3::zeros);
    let local_normal = selection
        .get("normal")
        .and_then(vector_from_value)
        .filter(|n| n.norm() > EPSILON)
        .unwrap_or_else(Vector3::z);

    let normal = component.to_world_vector(&local_normal);
    Ok(Anchor {
        component: id,
        point: component.to_world_point(&Point3::from(local_point)),
        normal: normal.normalize(),
        fixed: ctx.is_component_fixed(id),
    })
}

/// Resolves the first two selections, which must land on different components.
pub fn resolve_pair(
    ctx: &SolveContext<'_>,
    params: &InputParams,
) -> Result<(Anchor, Anchor), ConstraintError> {
    let a = resolve_anchor(ctx, params, 0)?;
    let b = resolve_anchor(ctx, params, 1)?;
    if a.component == b.component {
        return Err(ConstraintError::Failed(
            "Both selections resolve to the same component".to_string(),
        ));
    }
    Ok((a, b))
}

pub fn number_param(params: &InputParams, name: &str, default: f64) -> Result<f64, ConstraintError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(name, "not a finite number")),
        Some(other) => Err(invalid(name, &format!("expected a number, got {}", other))),
    }
}

pub fn bool_param(params: &InputParams, name: &str, default: bool) -> Result<bool, ConstraintError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(invalid(name, &format!("expected a boolean, got {}", other))),
    }
}

pub fn invalid(name: &str, reason: &str) -> ConstraintError {
    ConstraintError::InvalidParam {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

pub fn both_fixed() -> ConstraintError {
    ConstraintError::Failed("Both components are fixed".to_string())
}

/// Moves the second anchor's component by `delta`, or the first by
/// `-delta` when the second is fixed. Free pairs split the move.
pub fn translate_pair(
    ctx: &mut SolveContext<'_>,
    a: &Anchor,
    b: &Anchor,
    delta: &Vector3,
) -> Result<bool, ConstraintError> {
    if !is_finite_vector(delta) {
        return Err(ConstraintError::Failed("Non-finite correction".to_string()));
    }
    match (a.fixed, b.fixed) {
        (true, true) => Err(both_fixed()),
        (true, false) => Ok(ctx.apply_translation(b.component, delta)),
        (false, true) => Ok(ctx.apply_translation(a.component, &-delta)),
        (false, false) => {
            let half = delta * 0.5;
            let moved_b = ctx.apply_translation(b.component, &half);
            let moved_a = ctx.apply_translation(a.component, &-half);
            Ok(moved_a || moved_b)
        }
    }
}

/// Which side a rotation-only correction turns: the second unless it is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotating {
    First,
    Second,
}

pub fn rotating_side(a: &Anchor, b: &Anchor) -> Result<Rotating, ConstraintError> {
    match (a.fixed, b.fixed) {
        (true, true) => Err(both_fixed()),
        (_, false) => Ok(Rotating::Second),
        (false, true) => Ok(Rotating::First),
    }
}
