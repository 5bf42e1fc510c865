use super::common::{invalid, number_param, resolve_pair, rotating_side, Anchor, Rotating};
use crate::constraints::{
    Constraint, ConstraintError, ConstraintKind, InputParams, ParamField, ParamSchema, ParamType,
    SolveContext, SolveOutcome,
};
use crate::geometry::{
    angle_between, any_perpendicular, rotation_between, scale_rotation, UnitQuaternion, Vector3,
    EPSILON,
};
use nalgebra::Unit;
use serde_json::json;
use std::f64::consts::{FRAC_PI_2, PI};

#[derive(Debug, Clone, Copy, Default)]
pub struct AngleKind;

impl ConstraintKind for AngleKind {
    fn type_key(&self) -> &'static str {
        "angle"
    }

    fn class_name(&self) -> &'static str {
        "AngleConstraint"
    }

    fn short_name(&self) -> &'static str {
        "ANG"
    }

    fn long_name(&self) -> &'static str {
        "Angle"
    }

    fn input_params_schema(&self) -> ParamSchema {
        vec![
            ParamField::new("elements", ParamType::Selections, json!([])),
            // Degrees
            ParamField::new("angle", ParamType::Number, json!(90.0)),
        ]
    }

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint> {
        Box::new(AngleConstraint { params })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelKind;

impl ConstraintKind for ParallelKind {
    fn type_key(&self) -> &'static str {
        "parallel"
    }

    fn class_name(&self) -> &'static str {
        "ParallelConstraint"
    }

    fn short_name(&self) -> &'static str {
        "PAR"
    }

    fn long_name(&self) -> &'static str {
        "Parallel"
    }

    fn input_params_schema(&self) -> ParamSchema {
        vec![ParamField::new("elements", ParamType::Selections, json!([]))]
    }

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint> {
        Box::new(ParallelConstraint { params })
    }
}

pub struct AngleConstraint {
    params: InputParams,
}

impl AngleConstraint {
    fn target(&self) -> Result<f64, ConstraintError> {
        let degrees = number_param(&self.params, "angle", 90.0)?;
        if !(0.0..=180.0).contains(&degrees) {
            return Err(invalid("angle", "must be between 0 and 180 degrees"));
        }
        Ok(degrees.to_radians())
    }
}

fn turn_axis(a: &Anchor, b: &Anchor) -> Unit<Vector3> {
    let axis = a.normal.cross(&b.normal);
    if axis.norm() > EPSILON {
        Unit::new_normalize(axis)
    } else {
        Unit::new_normalize(any_perpendicular(&a.normal))
    }
}

impl Constraint for AngleConstraint {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let target = self.target()?;
        let (a, b) = resolve_pair(ctx, &self.params)?;

        let current = angle_between(&a.normal, &b.normal);
        let error = (current - target).abs();
        if error <= ctx.tolerance {
            return Ok(SolveOutcome::satisfied(error));
        }

        // A positive turn about a x b opens the angle when applied to b
        // and closes it when applied to a.
        let step = (target - current) * ctx.rotation_gain;
        let axis = turn_axis(&a, &b);
        let applied = match rotating_side(&a, &b)? {
            Rotating::Second => {
                let rotation = UnitQuaternion::from_axis_angle(&axis, step);
                ctx.apply_rotation(b.component, rotation.quaternion())
            }
            Rotating::First => {
                let rotation = UnitQuaternion::from_axis_angle(&axis, -step);
                ctx.apply_rotation(a.component, rotation.quaternion())
            }
        };

        let (a, b) = resolve_pair(ctx, &self.params)?;
        let remaining = (angle_between(&a.normal, &b.normal) - target).abs();
        let outcome = if remaining <= ctx.tolerance {
            SolveOutcome { applied, ..SolveOutcome::satisfied(remaining) }
        } else {
            SolveOutcome::adjusted(remaining, applied)
        };
        Ok(outcome.with_diagnostics(json!({
            "targetDegrees": target.to_degrees(),
            "currentDegrees": current.to_degrees(),
        })))
    }

    fn input_params(&self) -> &InputParams {
        &self.params
    }
}

pub struct ParallelConstraint {
    params: InputParams,
}

/// Angle to the nearest of the parallel and antiparallel directions.
fn parallel_error(a: &Anchor, b: &Anchor) -> f64 {
    let angle = angle_between(&a.normal, &b.normal);
    angle.min(PI - angle)
}

impl Constraint for ParallelConstraint {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let (a, b) = resolve_pair(ctx, &self.params)?;
        let error = parallel_error(&a, &b);
        if error <= ctx.tolerance {
            return Ok(SolveOutcome::satisfied(error));
        }

        let flipped = angle_between(&a.normal, &b.normal) > FRAC_PI_2;
        let applied = match rotating_side(&a, &b)? {
            Rotating::Second => {
                let wanted = if flipped { -a.normal } else { a.normal };
                let rotation = scale_rotation(&rotation_between(&b.normal, &wanted), ctx.rotation_gain);
                ctx.apply_rotation(b.component, rotation.quaternion())
            }
            Rotating::First => {
                let wanted = if flipped { -b.normal } else { b.normal };
                let rotation = scale_rotation(&rotation_between(&a.normal, &wanted), ctx.rotation_gain);
                ctx.apply_rotation(a.component, rotation.quaternion())
            }
        };

        let (a, b) = resolve_pair(ctx, &self.params)?;
        let remaining = parallel_error(&a, &b);
        Ok(if remaining <= ctx.tolerance {
            SolveOutcome { applied, ..SolveOutcome::satisfied(remaining) }
        } else {
            SolveOutcome::adjusted(remaining, applied)
        })
    }

    fn input_params(&self) -> &InputParams {
        &self.params
    }
}
