use super::common::{
    bool_param, number_param, resolve_pair, rotating_side, translate_pair, Anchor, Rotating,
};
use crate::constraints::{
    Constraint, ConstraintError, ConstraintKind, InputParams, ParamField, ParamSchema, ParamType,
    SolveContext, SolveOutcome,
};
use crate::geometry::{angle_between, rotation_between, scale_rotation};
use serde_json::json;

/// Face-to-face contact: normals opposed (touch) or matched (align), then
/// anchors brought together, optionally offset along the first normal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TouchAlignKind;

impl ConstraintKind for TouchAlignKind {
    fn type_key(&self) -> &'static str {
        "touch_align"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["touch", "align", "flush"]
    }

    fn class_name(&self) -> &'static str {
        "TouchAlignConstraint"
    }

    fn short_name(&self) -> &'static str {
        "TA"
    }

    fn long_name(&self) -> &'static str {
        "Touch / Align"
    }

    fn input_params_schema(&self) -> ParamSchema {
        vec![
            ParamField::new("elements", ParamType::Selections, json!([])),
            ParamField::new("reverse", ParamType::Boolean, json!(false)),
            ParamField::new("offset", ParamType::Number, json!(0.0)),
        ]
    }

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint> {
        Box::new(TouchAlignConstraint { params })
    }
}

pub struct TouchAlignConstraint {
    params: InputParams,
}

struct Residual {
    angle: f64,
    distance: f64,
}

impl Residual {
    fn total(&self) -> f64 {
        self.angle + self.distance
    }
}

fn measure(a: &Anchor, b: &Anchor, align: bool, offset: f64) -> Residual {
    let wanted = if align { a.normal } else { -a.normal };
    let target_point = a.point + a.normal * offset;
    Residual {
        angle: angle_between(&b.normal, &wanted),
        distance: (target_point - b.point).norm(),
    }
}

impl Constraint for TouchAlignConstraint {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let align = bool_param(&self.params, "reverse", false)?;
        let offset = number_param(&self.params, "offset", 0.0)?;
        let (a, b) = resolve_pair(ctx, &self.params)?;

        let before = measure(&a, &b, align, offset);
        if before.angle <= ctx.tolerance && before.distance <= ctx.tolerance {
            return Ok(SolveOutcome::satisfied(before.total()));
        }

        let mut applied = false;
        if before.angle > ctx.tolerance {
            let (turning, from, to) = match rotating_side(&a, &b)? {
                Rotating::Second => {
                    let wanted = if align { a.normal } else { -a.normal };
                    (b.component, b.normal, wanted)
                }
                Rotating::First => {
                    let wanted = if align { b.normal } else { -b.normal };
                    (a.component, a.normal, wanted)
                }
            };
            let rotation = scale_rotation(&rotation_between(&from, &to), ctx.rotation_gain);
            applied |= ctx.apply_rotation(turning, rotation.quaternion());
        }

        // Translate against the post-rotation anchors.
        let (a, b) = resolve_pair(ctx, &self.params)?;
        let target_point = a.point + a.normal * offset;
        let delta = (target_point - b.point) * ctx.translation_gain;
        if delta.norm() > ctx.tolerance * ctx.translation_gain {
            applied |= translate_pair(ctx, &a, &b, &delta)?;
        }

        let (a, b) = resolve_pair(ctx, &self.params)?;
        let after = measure(&a, &b, align, offset);
        let outcome = if after.angle <= ctx.tolerance && after.distance <= ctx.tolerance {
            SolveOutcome { applied, ..SolveOutcome::satisfied(after.total()) }
        } else {
            SolveOutcome::adjusted(after.total(), applied)
        };
        Ok(outcome.with_diagnostics(json!({
            "angle": after.angle,
            "distance": after.distance,
        })))
    }

    fn input_params(&self) -> &InputParams {
        &self.params
    }
}
