use formtree_edit::{
    EditError, ValidationMachine, ValidationStatus, ValidationUnit, Verdict,
};
use formtree_model::Address;
use formtree_types::{LocalizedText, NodePath};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;

fn node() -> NodePath {
    NodePath::new("job/1").unwrap()
}

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

fn machine() -> ValidationMachine {
    ValidationMachine::new(
        &node(),
        vec![
            ValidationUnit {
                key: "characters".into(),
                scope: "chars".into(),
                function_ref: Some("validate_chars".into()),
            },
            ValidationUnit {
                key: "brief".into(),
                scope: "input".into(),
                function_ref: None,
            },
        ],
    )
    .unwrap()
}

// ── Transitions ──────────────────────────────────────────────────

#[test]
fn units_start_idle() {
    let m = machine();
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Idle);
    assert!(m.is_configured());
}

#[test]
fn idle_to_validating_to_valid() {
    let mut m = machine();
    let ticket = m.begin("characters").unwrap();
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Validating);
    assert!(m.complete(&ticket, Verdict::valid()).unwrap());
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Valid);
}

#[test]
fn invalid_keeps_reasons_and_fix() {
    let mut m = machine();
    let ticket = m.begin("characters").unwrap();
    let verdict = Verdict::invalid(vec![LocalizedText::plain("name too short")])
        .with_fix(BTreeMap::from([("name".to_string(), json!("Ada Lovelace"))]));
    m.complete(&ticket, verdict).unwrap();
    let result = m.result("characters").unwrap();
    assert_eq!(result.status, ValidationStatus::Invalid);
    assert_eq!(result.reasons.len(), 1);
    assert!(result.suggested_fix.is_some());
}

#[test]
fn edit_in_scope_resets_to_idle() {
    let mut m = machine();
    let ticket = m.begin("characters").unwrap();
    m.complete(&ticket, Verdict::valid()).unwrap();
    let reset = m.content_changed([&addr("job/1#chars.1.name.value")]);
    assert_eq!(reset, vec!["characters".to_string()]);
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Idle);
}

#[test]
fn edit_out_of_scope_leaves_unit_alone() {
    let mut m = machine();
    let ticket = m.begin("characters").unwrap();
    m.complete(&ticket, Verdict::valid()).unwrap();
    m.content_changed([&addr("job/1#input.title.value")]);
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Valid);
    assert_eq!(m.status("brief").unwrap(), ValidationStatus::Idle);
}

#[test]
fn stale_verdict_is_discarded() {
    let mut m = machine();
    let ticket = m.begin("characters").unwrap();
    m.content_changed([&addr("job/1#chars.1.name.value")]);
    assert!(!m.complete(&ticket, Verdict::valid()).unwrap());
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Idle);
}

#[test]
fn superseded_ticket_is_discarded() {
    let mut m = machine();
    let first = m.begin("characters").unwrap();
    let second = m.begin("characters").unwrap();
    assert!(!m.complete(&first, Verdict::invalid(vec![])).unwrap());
    assert!(m.complete(&second, Verdict::valid()).unwrap());
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Valid);
}

#[test]
fn abort_returns_to_idle() {
    let mut m = machine();
    let ticket = m.begin("brief").unwrap();
    m.abort(&ticket).unwrap();
    assert_eq!(m.status("brief").unwrap(), ValidationStatus::Idle);
}

#[test]
fn unknown_unit_is_an_error() {
    let mut m = machine();
    assert!(matches!(m.begin("nope"), Err(EditError::UnknownUnit(_))));
}

// ── Save gating ──────────────────────────────────────────────────

#[test]
fn save_requires_every_covering_unit_valid() {
    let mut m = machine();
    let dirty = [addr("job/1#chars.1.name.value"), addr("job/1#input.topic.value")];
    let err = m.ensure_can_save(&dirty).unwrap_err();
    assert!(matches!(err, EditError::ValidationRequired { .. }));

    let t = m.begin("characters").unwrap();
    m.complete(&t, Verdict::valid()).unwrap();
    assert!(m.ensure_can_save(&dirty).is_err());

    let t = m.begin("brief").unwrap();
    m.complete(&t, Verdict::valid()).unwrap();
    assert!(m.ensure_can_save(&dirty).is_ok());
}

#[test]
fn unit_without_dirty_addresses_does_not_gate() {
    let mut m = machine();
    let t = m.begin("brief").unwrap();
    m.complete(&t, Verdict::valid()).unwrap();
    // characters is still idle but nothing under chars changed.
    assert!(m.ensure_can_save(&[addr("job/1#input.topic.value")]).is_ok());
    assert!(matches!(
        m.ensure_can_save(&[addr("job/1#chars.2.age.value")]),
        Err(EditError::ValidationRequired { status: ValidationStatus::Idle, .. })
    ));
}

#[test]
fn no_units_never_gates() {
    let m = ValidationMachine::new(&node(), vec![]).unwrap();
    assert!(m.ensure_can_save(&[addr("job/1#input.topic.value")]).is_ok());
}

// ── Suggested fixes ──────────────────────────────────────────────

#[test]
fn suggested_fix_taken_once_from_invalid_unit() {
    let mut m = machine();
    let t = m.begin("characters").unwrap();
    m.complete(
        &t,
        Verdict::invalid(vec![]).with_fix(BTreeMap::from([("name".to_string(), json!("x"))])),
    )
    .unwrap();
    let fix = m.take_suggested_fix("characters").unwrap();
    assert_eq!(fix.len(), 1);
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Idle);
    assert!(m.take_suggested_fix("characters").unwrap().is_empty());
}

#[test]
fn valid_unit_has_no_fix() {
    let mut m = machine();
    let t = m.begin("characters").unwrap();
    m.complete(&t, Verdict::valid()).unwrap();
    assert!(m.take_suggested_fix("characters").unwrap().is_empty());
    assert_eq!(m.status("characters").unwrap(), ValidationStatus::Valid);
}

// ── Responses ────────────────────────────────────────────────────

#[test]
fn response_with_valid_flag() {
    let v = Verdict::from_response(&json!({"valid": true})).unwrap();
    assert_eq!(v, Verdict::valid());
}

#[test]
fn response_with_status_reasons_and_fix() {
    let v = Verdict::from_response(&json!({
        "status": "invalid",
        "reasons": ["too short", {"en": "bad tone", "zh": "语气不对"}],
        "suggestedFix": {"name": "Ada"}
    }))
    .unwrap();
    assert!(!v.valid);
    assert_eq!(v.reasons.len(), 2);
    assert_eq!(v.reasons[1].get("zh"), Some("语气不对"));
    assert_eq!(v.suggested_fix.unwrap()["name"], json!("Ada"));
}

#[test]
fn response_without_verdict_is_malformed() {
    let err = Verdict::from_response(&json!({"ok": 1})).unwrap_err();
    assert!(matches!(err, EditError::Invoker(_)));
}
