use super::duplicates::{duplicate_family, selection_key, signature_for};
use super::*;
use serde_json::{json, Value};

fn entry(id: &str, constraint_type: &str, elements: Value) -> ConstraintEntry {
    let params = json!({ "elements": elements });
    ConstraintEntry::new(id, constraint_type, params.as_object().unwrap().clone())
}

#[test]
fn test_families_ignore_case_and_separators() {
    assert_eq!(duplicate_family("touch_align"), Some("touch_align"));
    assert_eq!(duplicate_family("Touch Align"), Some("touch_align"));
    assert_eq!(duplicate_family("touch-align"), Some("touch_align"));
    assert_eq!(duplicate_family("offset"), Some("distance"));
    assert_eq!(duplicate_family("fixed"), None);
}

#[test]
fn test_selection_key_priority() {
    assert_eq!(
        selection_key(&json!({"id": "c1", "name": "Bolt", "path": ["a"]})).as_deref(),
        Some("id:c1")
    );
    assert_eq!(selection_key(&json!({"name": "Bolt", "path": ["a"]})).as_deref(), Some("name:Bolt"));
    assert_eq!(selection_key(&json!({"path": ["Asm", "Bolt"]})).as_deref(), Some("path:Asm/Bolt"));
    assert_eq!(
        selection_key(&json!({"face": 3, "kind": "planar"})).as_deref(),
        Some("{face=3;kind=planar}")
    );
    assert_eq!(selection_key(&json!("Bolt")).as_deref(), Some("ref:Bolt"));
    assert_eq!(selection_key(&json!(null)), None);
    assert_eq!(selection_key(&json!({})), None);
}

#[test]
fn test_selection_key_depth_is_bounded() {
    let mut nested = json!({"leaf": "x"});
    for _ in 0..10 {
        nested = json!({ "inner": nested });
    }
    assert_eq!(selection_key(&nested), None);

    let shallow = json!({"inner": {"inner": {"leaf": "x"}}});
    assert_eq!(selection_key(&shallow).as_deref(), Some("{inner={inner={leaf=x}}}"));
}

#[test]
fn test_signature_is_order_independent() {
    let forward = signature_for(&[json!({"name": "A"}), json!({"name": "B"})]);
    let backward = signature_for(&[json!({"name": "B"}), json!({"name": "A"})]);
    assert!(forward.is_some());
    assert_eq!(forward, backward);
    assert_eq!(signature_for(&[json!({"name": "A"})]), None);
    assert_eq!(signature_for(&[json!({"name": "A"}), json!(null)]), None);
}

#[test]
fn test_swapped_touch_aligns_are_symmetric_duplicates() {
    let entries = vec![
        entry("TA1", "touch_align", json!([{"name": "A"}, {"name": "B"}])),
        entry("TA2", "Touch Align", json!([{"name": "B"}, {"name": "A"}])),
    ];
    let map = detect_duplicates(&entries);

    assert_eq!(map["TA1"].related_ids, vec!["TA2".to_string()]);
    assert_eq!(map["TA2"].related_ids, vec!["TA1".to_string()]);
    assert_eq!(map["TA1"].signature, map["TA2"].signature);
    assert_eq!(map["TA1"].message, "Duplicate of TA2");
    assert_eq!(map["TA1"].family, "touch_align");
}

#[test]
fn test_cross_family_is_conflict_and_duplicates_come_first() {
    let entries = vec![
        entry("D1", "distance", json!(["A", "B"])),
        entry("TA1", "touch_align", json!(["B", "A"])),
        entry("D2", "offset", json!(["A", "B"])),
    ];
    let map = detect_duplicates(&entries);

    assert_eq!(map["D1"].duplicate_ids, vec!["D2".to_string()]);
    assert_eq!(map["D1"].conflict_ids, vec!["TA1".to_string()]);
    assert_eq!(map["D1"].message, "Duplicate of D2; Conflicts with TA1");
    assert_eq!(map["D1"].related_ids, vec!["D2".to_string(), "TA1".to_string()]);
    assert_eq!(map["TA1"].message, "Conflicts with D1, D2");
}

#[test]
fn test_unique_disabled_and_unkeyed_entries_are_not_reported() {
    let mut disabled = entry("TA3", "touch_align", json!(["A", "B"]));
    disabled.enabled = false;
    let entries = vec![
        entry("TA1", "touch_align", json!(["A", "B"])),
        entry("TA2", "touch_align", json!(["A", "C"])),
        disabled,
        entry("F1", "fixed", json!(["A", "B"])),
        entry("X1", "touch_align", json!([null, "B"])),
        entry("X2", "touch_align", json!([null, "B"])),
    ];
    assert!(detect_duplicates(&entries).is_empty());
}
