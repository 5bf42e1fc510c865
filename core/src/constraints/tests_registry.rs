use super::*;
use serde_json::json;

struct NoopConstraint {
    params: InputParams,
}

impl Constraint for NoopConstraint {
    fn solve(&mut self, _ctx: &mut SolveContext<'_>) -> Result<SolveOutcome, ConstraintError> {
        Ok(SolveOutcome::satisfied(0.0))
    }

    fn input_params(&self) -> &InputParams {
        &self.params
    }
}

struct GearKind(&'static str);

impl ConstraintKind for GearKind {
    fn type_key(&self) -> &'static str {
        "gear_ratio"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["Gear"]
    }

    fn class_name(&self) -> &'static str {
        "GearRatioConstraint"
    }

    fn short_name(&self) -> &'static str {
        "GEAR"
    }

    fn long_name(&self) -> &'static str {
        self.0
    }

    fn input_params_schema(&self) -> ParamSchema {
        vec![
            ParamField::new("elements", ParamType::Selections, json!([])),
            ParamField::new("ratio", ParamType::Number, json!(2.0)),
        ]
    }

    fn instantiate(&self, params: InputParams) -> Box<dyn Constraint> {
        Box::new(NoopConstraint { params })
    }
}

#[test]
fn test_normalize_type_key() {
    assert_eq!(normalize_type_key("Touch Align"), "touch_align");
    assert_eq!(normalize_type_key("  touch-align "), "touch_align");
    assert_eq!(normalize_type_key("TOUCH__ALIGN"), "touch_align");
    assert_eq!(normalize_type_key("distance"), "distance");
    assert_eq!(normalize_type_key("   "), "");
}

#[test]
fn test_lookup_by_key_alias_and_class_name() {
    let mut registry = ConstraintRegistry::new();
    registry.register_kind(GearKind("Gear Ratio"));

    for name in ["gear_ratio", "Gear Ratio", "gear-ratio", "GEAR", "GearRatioConstraint"] {
        assert!(registry.contains(name), "{} should resolve", name);
        assert_eq!(registry.get(name).unwrap().type_key(), "gear_ratio");
    }
}

#[test]
fn test_unknown_type_errors_or_none() {
    let registry = ConstraintRegistry::new();
    match registry.get("warp") {
        Err(AssemblyError::UnregisteredConstraintType(name)) => assert_eq!(name, "warp"),
        other => panic!("expected UnregisteredConstraintType, got {:?}", other.map(|k| k.type_key())),
    }
    assert!(registry.get_safe("warp").is_none());
}

#[test]
fn test_list_is_deduplicated_and_reregistration_replaces() {
    let mut registry = ConstraintRegistry::new();
    registry.register_kind(GearKind("First"));
    registry.register_kind(GearKind("Second"));

    let kinds = registry.list();
    assert_eq!(kinds.len(), 1, "aliases must not produce extra list entries");
    assert_eq!(kinds[0].long_name(), "Second");
    assert_eq!(registry.get("gear").unwrap().long_name(), "Second");
}

#[test]
fn test_default_params_follow_schema() {
    let params = GearKind("Gear").default_params();
    assert_eq!(params.get("ratio"), Some(&json!(2.0)));
    assert_eq!(params.get("elements"), Some(&json!([])));
    assert_eq!(GearKind("Gear").id_prefix(), "GEAR");
}
