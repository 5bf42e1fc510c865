use super::common::resolve_anchor;
use crate::constraints::{
    Constraint, ConstraintError, ConstraintKind, InputParams, ParamField, ParamSchema, ParamType,
    SolveContext, SolveOutcome,
};
use serde_json::json;

/// Grounds one component for the rest of a run, so later constraints
/// never move it. The scene's own `fixed` flag is left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedKind;

impl ConstraintKind for FixedKind {
    fn type_key(&self) -> &'static str {
        "fixed"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["fix", "ground"]
    }

    fn class_name(&self) -> &'static str {
        "FixedConstraint"
    }

    fn short_name(&self) -> &'static str {
        "FIX"
    }

    fn long_name(&self) -> &'static str {
        "Fixed Component"
    }

    fn input_params_schema(&self) -> ParamSchema {
        vec![ParamField::new("elements", ParamType::Selections, json!([]))]
    }

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint> {
        Box::new(FixedConstraint { params })
    }
}

pub struct FixedConstraint {
    params: InputParams,
}

impl Constraint for FixedConstraint {
    fn solve(&mut self, ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        let anchor = resolve_anchor(ctx, &self.params, 0)?;
        if !ctx.ground(anchor.component) {
            return Ok(SolveOutcome::failed("Component could not be fixed"));
        }
        Ok(SolveOutcome::satisfied(0.0).with_message("Component fixed"))
    }

    fn input_params(&self) -> &InputParams {
        &self.params
    }
}
