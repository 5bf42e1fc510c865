use super::common::{number_param, resolve_pair, translate_pair, invalid, Anchor};
use crate::constraints::{
    Constraint, ConstraintError, ConstraintKind, InputParams, ParamField, ParamSchema, ParamType,
    SolveContext, SolveOutcome,
};
use crate::geometry::{Vector3, EPSILON};
use serde_json::json;

#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceKind;

impl ConstraintKind for DistanceKind {
    fn type_key(&self) -> &'static str {
        "distance"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["offset"]
    }

    fn class_name(&self) -> &'static str {
        "DistanceConstraint"
    }

    fn short_name(&self) -> &'static str {
        "DIST"
    }

    fn long_name(&self) -> &'static str {
        "Distance"
    }

    fn input_params_schema(&self) -> ParamSchema {
        vec![
            ParamField::new("elements", ParamType::Selections, json!([])),
            ParamField::new("distance", ParamType::Number, json!(0.0)),
        ]
    }

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint> {
        Box::new(DistanceConstraint { params, coincident: false })
    }
}

/// Distance with a fixed target of zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoincidentKind;

impl ConstraintKind for CoincidentKind {
    fn type_key(&self) -> &'static str {
        "coincident"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mate"]
    }

    fn class_name(&self) -> &'static str {
        "CoincidentConstraint"
    }

    fn short_name(&self) -> &'static str {
        "COIN"
    }

    fn long_name(&self) -> &'static str {
        "Coincident"
    }

    fn input_params_schema(&self) -> ParamSchema {
        vec![ParamField::new("elements", ParamType::Selections, json!([]))]
    }

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint> {
        Box::new(DistanceConstraint { params, coincident: true })
    }
}

pub struct DistanceConstraint {
    params: InputParams,
    coincident: bool,
}

impl DistanceConstraint {
    fn target(&self) -> Result<f64, ConstraintError> {
        if self.coincident {
            return Ok(0.0);
        }
        let target = number_param(&self.params, "distance", 0.0)?;
        if target < 0.0 {
            return Err(invalid("distance", "must not be negative"));
        }
        Ok(target)
    }
}

fn residual(a: &Anchor, b: &Anchor, target: f64) -> f64 {
    ((b.point - a.point).norm() - target).abs()
}

impl Constraint for DistanceConstraint {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let target = self.target()?;
        let (a, b) = resolve_pair(ctx, &self.params)?;

        let offset = b.point - a.point;
        let current = offset.norm();
        let error = (current - target).abs();
        if error <= ctx.tolerance {
            return Ok(SolveOutcome::satisfied(error));
        }

        // Anchors on top of each other: push apart along the first normal.
        let direction: Vector3 = if current > EPSILON { offset / current } else { a.normal };
        let correction = direction * (target - current) * ctx.translation_gain;
        let applied = translate_pair(ctx, &a, &b, &correction)?;

        let (a, b) = resolve_pair(ctx, &self.params)?;
        let remaining = residual(&a, &b, target);
        let outcome = if remaining <= ctx.tolerance {
            SolveOutcome { applied, ..SolveOutcome::satisfied(remaining) }
        } else {
            SolveOutcome::adjusted(remaining, applied)
        };
        Ok(outcome.with_diagnostics(json!({ "target": target, "before": current })))
    }

    fn input_params(&self) -> &InputParams {
        &self.params
    }
}
