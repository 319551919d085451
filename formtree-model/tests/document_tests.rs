use formtree_model::{Address, DocumentPatch, ModelError, NodeDocument, PatchOp};
use formtree_types::{NodeId, NodePath, SectionKey, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

fn doc() -> NodeDocument {
    NodeDocument::new(NodeId::new(), NodePath::new("job/1").unwrap())
}

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

fn key(s: &str) -> SectionKey {
    SectionKey::new(s).unwrap()
}

// ── Values ───────────────────────────────────────────────────────

#[test]
fn set_creates_intermediate_objects() {
    let mut d = doc();
    let a = addr("job/1#input.brief.goal.value");
    assert_eq!(d.set_value(&a, json!("sell shoes")).unwrap(), None);
    assert_eq!(d.value_at(&a), Some(&json!("sell shoes")));
    assert_eq!(d.data(), &json!({"input": {"brief": {"goal": "sell shoes"}}}));
}

#[test]
fn set_returns_previous_value() {
    let mut d = doc();
    let a = addr("job/1#input.title.value");
    d.set_value(&a, json!("a")).unwrap();
    assert_eq!(d.set_value(&a, json!("b")).unwrap(), Some(json!("a")));
}

#[test]
fn instance_segments_are_object_keys() {
    let mut d = doc();
    d.set_value(&addr("job/1#chars.2.name.value"), json!("Ada")).unwrap();
    assert_eq!(d.data(), &json!({"chars": {"2": {"name": "Ada"}}}));
}

#[test]
fn scalar_ancestor_is_a_path_conflict() {
    let mut d = doc();
    d.set_value(&addr("job/1#input.value"), json!("flat")).unwrap();
    let err = d
        .set_value(&addr("job/1#input.title.value"), json!("x"))
        .unwrap_err();
    assert!(matches!(err, ModelError::PathConflict { .. }));
}

#[test]
fn other_node_address_is_rejected() {
    let mut d = doc();
    let err = d.set_value(&addr("job/2#input.title.value"), json!("x")).unwrap_err();
    assert!(matches!(err, ModelError::NodeMismatch { .. }));
    assert_eq!(d.value_at(&addr("job/2#input.title.value")), None);
}

#[test]
fn remove_value() {
    let mut d = doc();
    let a = addr("job/1#input.title.value");
    d.set_value(&a, json!("x")).unwrap();
    assert_eq!(d.remove_value(&a).unwrap(), Some(json!("x")));
    assert_eq!(d.value_at(&a), None);
    assert_eq!(d.remove_value(&addr("job/1#nothing.here.value")).unwrap(), None);
}

#[test]
fn segments_with_pointer_metacharacters() {
    let mut d = doc();
    let a = addr("job/1#in/put.ti~tle.value");
    d.set_value(&a, json!(1)).unwrap();
    assert_eq!(d.value_at(&a), Some(&json!(1)));
    assert_eq!(d.pointer_for(&a).unwrap(), "/in~1put/ti~0tle");
}

// ── Sections ─────────────────────────────────────────────────────

#[test]
fn section_data_ignores_blank_leaves() {
    let mut d = doc();
    d.set_value(&addr("job/1#stage1.a.value"), json!("")).unwrap();
    d.set_value(&addr("job/1#stage1.b.value"), json!([])).unwrap();
    assert!(!d.section_has_data(&key("stage1")));
    d.set_value(&addr("job/1#stage1.c.value"), json!("x")).unwrap();
    assert!(d.section_has_data(&key("stage1")));
    assert_eq!(d.sections_with_data(), vec![key("stage1")]);
}

#[test]
fn touch_section_is_monotonic_and_clears_warning() {
    let mut d = doc();
    let s = key("stage1");
    let future = Timestamp::new(u64::MAX / 2, 0);
    d.set_section_timestamp(s.clone(), future);
    d.mark_stale(s.clone());
    let touched = d.touch_section(&s);
    assert!(touched.is_after(&future));
    assert!(!d.is_stale(&s));
}

#[test]
fn clear_section_drops_everything() {
    let mut d = doc();
    let s = key("stage2");
    d.set_value(&addr("job/1#stage2.x.value"), json!("x")).unwrap();
    d.touch_section(&s);
    d.mark_stale(s.clone());
    d.clear_section(&s);
    assert!(!d.section_has_data(&s));
    assert_eq!(d.section_timestamp(&s), None);
    assert!(!d.is_stale(&s));
}

// ── Patches ──────────────────────────────────────────────────────

#[test]
fn apply_patch_skips_selected_ops() {
    let mut d = doc();
    d.set_value(&addr("job/1#stage9.x.value"), json!("old")).unwrap();
    let mut timestamps = BTreeMap::new();
    timestamps.insert(key("input"), Timestamp::from_millis(5));
    let patch = DocumentPatch {
        ops: vec![
            PatchOp {
                address: addr("job/1#input.a.value"),
                value: Some(json!(1)),
            },
            PatchOp {
                address: addr("job/1#input.b.value"),
                value: Some(json!(2)),
            },
        ],
        cleared_sections: BTreeSet::from([key("stage9")]),
        section_timestamps: Some(timestamps),
        stale_sections: None,
    };
    let rejected = addr("job/1#input.b.value");
    d.apply_patch(&patch, |a| *a == rejected).unwrap();

    assert_eq!(d.data(), &json!({"input": {"a": 1}}));
    assert_eq!(
        d.section_timestamp(&key("input")),
        Some(Timestamp::from_millis(5))
    );
}

#[test]
fn document_serde_round_trip() {
    let mut d = doc();
    d.set_value(&addr("job/1#input.title.value"), json!("t")).unwrap();
    d.touch_section(&key("input"));
    d.mark_stale(key("stage1"));
    d.revision = 4;

    let text = serde_json::to_string(&d).unwrap();
    let back: NodeDocument = serde_json::from_str(&text).unwrap();
    assert_eq!(back, d);
}
