use super::history::{migrate_legacy_fields, DISABLED_MESSAGE};
use super::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

fn params(value: Value) -> InputParams {
    value.as_object().unwrap().clone()
}

fn pair(a: &str, b: &str) -> InputParams {
    params(json!({ "elements": [{"name": a}, {"name": b}] }))
}

fn ids(history: &ConstraintHistory) -> Vec<String> {
    history.entries().iter().map(|e| e.id.clone()).collect()
}

#[test]
fn test_add_seeds_defaults_and_generates_ids() {
    let mut history = ConstraintHistory::with_builtin();
    let dist = history
        .add_constraint("Distance", Some(params(json!({"distance": 12.5}))))
        .unwrap();
    let angle = history.add_constraint("angle", None).unwrap();

    assert_eq!(dist, "DIST1");
    assert_eq!(angle, "ANG2");
    let entry = history.get(&dist).unwrap();
    assert_eq!(entry.constraint_type, "distance");
    assert_eq!(entry.input_params["distance"], json!(12.5));
    assert_eq!(entry.input_params["elements"], json!([]));
    assert_eq!(entry.input_params["id"], json!("DIST1"));
    assert_eq!(entry.status(), ConstraintStatus::Pending);
    assert!(entry.enabled);
    assert_eq!(history.get(&angle).unwrap().input_params["angle"], json!(90.0));
}

#[test]
fn test_add_unknown_type_fails() {
    let mut history = ConstraintHistory::with_builtin();
    let err = history.add_constraint("weld", None).unwrap_err();
    assert!(matches!(err, AssemblyError::UnknownConstraintType(ref t) if t == "weld"));
    assert!(history.is_empty());
}

#[test]
fn test_supplied_ids_are_kept_and_bump_counter() {
    let mut history = ConstraintHistory::with_builtin();
    let kept = history
        .add_constraint("distance", Some(params(json!({"id": "DIST40"}))))
        .unwrap();
    assert_eq!(kept, "DIST40");
    assert_eq!(history.id_counter(), 40);

    let clash = history
        .add_constraint("distance", Some(params(json!({"id": "DIST40"}))))
        .unwrap();
    assert_eq!(clash, "DIST41");
}

#[test]
fn test_ids_stay_unique_across_remove_and_readd() {
    let mut history = ConstraintHistory::with_builtin();
    let a = history.add_constraint("distance", None).unwrap();
    let b = history.add_constraint("distance", None).unwrap();
    assert!(history.remove_constraint(&a).is_some());
    let c = history.add_constraint("distance", None).unwrap();
    history.move_constraint(&c, -1);
    let d = history.add_constraint("distance", None).unwrap();

    let all = ids(&history);
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(unique.len(), all.len());
    assert_ne!(c, a, "a removed ID must not be reissued");
    assert_eq!(all, vec![c, b, d]);
    assert!(history.remove_constraint("missing").is_none());
}

#[test]
fn test_move_constraint_bounds() {
    let mut history = ConstraintHistory::with_builtin();
    let a = history.add_constraint("distance", None).unwrap();
    let b = history.add_constraint("angle", None).unwrap();
    let c = history.add_constraint("parallel", None).unwrap();

    assert!(history.move_constraint(&a, 2));
    assert_eq!(ids(&history), vec![b.clone(), c.clone(), a.clone()]);
    assert!(!history.move_constraint(&a, 1));
    assert!(!history.move_constraint(&b, -1));
    assert!(!history.move_constraint("missing", 0));
    assert!(history.move_constraint(&a, -2));
    assert_eq!(ids(&history), vec![a, b, c]);
}

#[test]
fn test_update_params_resyncs_id() {
    let mut history = ConstraintHistory::with_builtin();
    let id = history.add_constraint("distance", None).unwrap();

    history
        .update_constraint_params(&id, |p| {
            p.insert("distance".into(), json!(4.0));
            p.remove("id");
        })
        .unwrap();
    let entry = history.get(&id).unwrap();
    assert_eq!(entry.input_params["distance"], json!(4.0));
    assert_eq!(entry.input_params["id"], json!(id.clone()), "id must be mirrored back");

    history
        .update_constraint_params(&id, |p| {
            p.insert("constraintID".into(), json!("Spacer"));
            p.remove("id");
        })
        .unwrap();
    assert!(history.get(&id).is_none());
    let renamed = history.get("Spacer").unwrap();
    assert_eq!(renamed.input_params["id"], json!("Spacer"));
    assert!(!renamed.input_params.contains_key("constraintID"));

    let err = history.update_constraint_params("nope", |_| {}).unwrap_err();
    assert!(matches!(err, AssemblyError::ConstraintNotFound(_)));
}

#[test]
fn test_disable_and_reenable_status() {
    let mut history = ConstraintHistory::with_builtin();
    let id = history.add_constraint("distance", Some(pair("A", "B"))).unwrap();

    assert!(history.set_constraint_enabled(&id, false).unwrap());
    let entry = history.get(&id).unwrap();
    assert_eq!(entry.status(), ConstraintStatus::Disabled);
    assert_eq!(entry.persistent_data.message, DISABLED_MESSAGE);

    assert!(!history.set_constraint_enabled(&id, false).unwrap(), "unchanged state is a no-op");

    assert!(history.set_constraint_enabled(&id, true).unwrap());
    assert_eq!(history.get(&id).unwrap().status(), ConstraintStatus::Pending);
}

#[test]
fn test_open_state_and_exclusive_open() {
    let mut history = ConstraintHistory::with_builtin();
    let a = history.add_constraint("distance", None).unwrap();
    let b = history.add_constraint("distance", None).unwrap();

    assert!(history.set_open_state(&a, true));
    assert!(history.set_open_state(&b, true));
    assert!(history.set_exclusive_open(&b));
    assert!(!history.get(&a).unwrap().open);
    assert!(history.get(&b).unwrap().open);
    assert!(!history.set_open_state("missing", true));
    assert!(!history.set_exclusive_open("missing"));
}

#[test]
fn test_duplicates_marked_on_add_and_cleared_on_remove() {
    let mut history = ConstraintHistory::with_builtin();
    let first = history.add_constraint("touch_align", Some(pair("A", "B"))).unwrap();
    let second = history.add_constraint("touch align", Some(pair("B", "A"))).unwrap();

    for (id, other) in [(&first, &second), (&second, &first)] {
        let data = &history.get(id).unwrap().persistent_data;
        assert_eq!(data.status, ConstraintStatus::Duplicate);
        assert_eq!(data.duplicate_constraint_ids.as_deref(), Some(&[other.clone()][..]));
        assert!(data.duplicate_signature.is_some());
    }

    history.remove_constraint(&second);
    let data = &history.get(&first).unwrap().persistent_data;
    assert_eq!(data.status, ConstraintStatus::Pending);
    assert!(data.duplicate_constraint_ids.is_none());
    assert!(data.duplicate_signature.is_none());
}

#[test]
fn test_snapshot_round_trip() {
    let mut history = ConstraintHistory::with_builtin();
    let a = history.add_constraint("distance", Some(pair("A", "B"))).unwrap();
    let b = history.add_constraint("angle", Some(pair("A", "C"))).unwrap();
    history.set_constraint_enabled(&b, false).unwrap();
    history.set_open_state(&a, true);
    history
        .update_constraint_params(&a, |p| {
            p.insert("note".into(), json!("keep me"));
        })
        .unwrap();

    let json = history.to_json().unwrap();
    let mut restored = ConstraintHistory::with_builtin();
    restored.from_json(&json).unwrap();

    assert_eq!(restored.snapshot(), history.snapshot());
    assert!(restored.id_counter() >= history.id_counter());
}

#[test]
fn test_deserialize_bare_array_with_legacy_ids() {
    let mut history = ConstraintHistory::with_builtin();
    let payload = json!([
        {"type": "distance", "constraintID": "DIST7", "inputParams": {"distance": 3}},
        {"type": "Touch Align", "inputParams": {"constraintID": "TA12", "elements": []}},
        {"type": "angle", "inputParams": {}}
    ]);
    history.deserialize(&payload).unwrap();

    assert_eq!(ids(&history)[..2], ["DIST7".to_string(), "TA12".to_string()]);
    assert_eq!(history.entries()[1].constraint_type, "touch_align");
    assert_eq!(history.id_counter(), 13, "counter is the max suffix, then one generated ID");
    assert_eq!(ids(&history)[2], "ANG13");
    assert!(history.entries().iter().all(|e| !e.input_params.contains_key("constraintID")));

    let next = history.add_constraint("distance", None).unwrap();
    assert_eq!(next, "DIST14");
}

#[test]
fn test_supplied_counter_wins_when_larger() {
    let mut history = ConstraintHistory::with_builtin();
    history
        .deserialize(&json!({
            "idCounter": 50,
            "constraints": [{"type": "distance", "inputParams": {"id": "DIST3"}}]
        }))
        .unwrap();
    assert_eq!(history.id_counter(), 50);
    assert_eq!(history.add_constraint("distance", None).unwrap(), "DIST51");
}

#[test]
fn test_unregistered_entries_stay_loadable() {
    let mut history = ConstraintHistory::with_builtin();
    history
        .deserialize(&json!({
            "idCounter": 2,
            "constraints": [
                {"type": "laser_weld", "inputParams": {"id": "LW1"}, "persistentData": {"status": "satisfied", "ui": {"pinned": true}}},
                {"type": "distance", "inputParams": {"id": "DIST2"}}
            ]
        }))
        .unwrap();

    assert_eq!(history.len(), 2);
    assert!(!history.is_registered("LW1"));
    assert!(history.is_registered("DIST2"));
    let orphan = history.get("LW1").unwrap();
    assert_eq!(orphan.status(), ConstraintStatus::Error);
    assert!(orphan.persistent_data.message.contains("laser_weld"));
    assert_eq!(orphan.persistent_data.extra["ui"], json!({"pinned": true}));

    assert!(history.remove_constraint("LW1").is_some());
}

#[test]
fn test_deserialize_rejects_malformed_payloads() {
    let mut history = ConstraintHistory::with_builtin();
    assert!(matches!(
        history.deserialize(&json!({"constraints": 3})),
        Err(AssemblyError::InvalidSnapshot(_))
    ));
    assert!(matches!(history.deserialize(&json!("nope")), Err(AssemblyError::InvalidSnapshot(_))));
    assert!(matches!(
        history.deserialize(&json!([{"inputParams": {}}])),
        Err(AssemblyError::InvalidSnapshot(_))
    ));
    assert!(matches!(history.from_json("{not json"), Err(AssemblyError::Serialization(_))));
}

#[test]
fn test_migrate_legacy_fields_prefers_current_id() {
    let migrated = migrate_legacy_fields(&json!({
        "type": "distance",
        "constraintID": "OLD1",
        "inputParams": {"id": "NEW1", "constraintID": "OLD2"}
    }))
    .unwrap();
    assert_eq!(migrated.input_params["id"], json!("NEW1"));
    assert!(!migrated.input_params.contains_key("constraintID"));
    assert!(migrated.enabled);
    assert!(!migrated.open);
}

#[test]
fn test_listeners_and_scheduler_requests() {
    let mut history = ConstraintHistory::with_builtin();
    let seen: Arc<Mutex<Vec<ChangeKind>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    history.subscribe(move |change| sink.lock().unwrap().push(change.kind));

    let scheduler = Arc::new(RunScheduler::new());
    history.attach_scheduler(scheduler.clone());

    let id = history.add_constraint("distance", None).unwrap();
    assert!(scheduler.has_pending());
    assert!(scheduler.begin(&RunOptions::default()).is_some());
    assert!(!scheduler.has_pending());

    history.set_open_state(&id, true);
    assert!(!scheduler.has_pending(), "UI flags never schedule a run");

    history.set_constraint_enabled(&id, false).unwrap();
    history.check_constraint_errors();
    history.remove_constraint(&id);
    assert!(scheduler.has_pending());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ChangeKind::Add,
            ChangeKind::Open,
            ChangeKind::Enable,
            ChangeKind::Check,
            ChangeKind::Remove
        ]
    );
}
