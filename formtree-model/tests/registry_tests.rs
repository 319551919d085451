use formtree_model::{
    Datatype, FieldEntry, FieldRegistry, FieldRules, MemoryRegistry, RegistryError,
};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── FieldEntry constructors ──────────────────────────────────────

#[test]
fn text_entry_defaults() {
    let e = FieldEntry::text("title");
    assert_eq!(e.id, "title");
    assert_eq!(e.widget, "text");
    assert_eq!(e.datatype, Datatype::Text);
    assert!(!e.rules.required);
    assert!(e.default_value.is_none());
}

#[test]
fn select_entry_carries_options() {
    let e = FieldEntry::select("tone", vec!["warm".into(), "dry".into()]).required();
    assert_eq!(e.datatype, Datatype::Choice);
    assert_eq!(e.rules.options.as_deref(), Some(&["warm".to_string(), "dry".to_string()][..]));
    assert!(e.rules.required);
}

#[test]
fn entry_deserializes_camel_case_aliases() {
    let e: FieldEntry = serde_json::from_value(json!({
        "id": "count",
        "widget": "slider",
        "datatype": "number",
        "rules": {"min": 1, "max": 10},
        "defaultValue": 3
    }))
    .unwrap();
    assert_eq!(e.default_value, Some(json!(3)));
    assert_eq!(e.rules.min, Some(1.0));
    assert_eq!(e.rules.max, Some(10.0));
}

#[test]
fn unknown_datatype_falls_back_to_json() {
    let e: FieldEntry =
        serde_json::from_value(json!({"id": "blob", "datatype": "hologram"})).unwrap();
    assert_eq!(e.datatype, Datatype::Json);
}

// ── Local rule checks ────────────────────────────────────────────

#[test]
fn required_rejects_missing_and_blank() {
    let rules = FieldRules {
        required: true,
        ..FieldRules::default()
    };
    assert_eq!(rules.check("Title", None).len(), 1);
    assert_eq!(rules.check("Title", Some(&json!("  "))).len(), 1);
    assert!(rules.check("Title", Some(&json!("ok"))).is_empty());
    assert_eq!(
        rules.check("Title", None)[0].get("en"),
        Some("Title is required")
    );
}

#[test]
fn optional_blank_value_passes_every_rule() {
    let rules = FieldRules {
        min_length: Some(5),
        ..FieldRules::default()
    };
    assert!(rules.check("Bio", Some(&json!(""))).is_empty());
}

#[test]
fn length_bounds_count_characters() {
    let rules = FieldRules {
        min_length: Some(2),
        max_length: Some(3),
        ..FieldRules::default()
    };
    assert_eq!(rules.check("Code", Some(&json!("a"))).len(), 1);
    assert!(rules.check("Code", Some(&json!("日本語"))).is_empty());
    assert_eq!(rules.check("Code", Some(&json!("abcd"))).len(), 1);
}

#[test]
fn numeric_bounds() {
    let rules = FieldRules {
        min: Some(1.0),
        max: Some(10.0),
        ..FieldRules::default()
    };
    assert!(rules.check("Shots", Some(&json!(5))).is_empty());
    assert_eq!(rules.check("Shots", Some(&json!(11))).len(), 1);
    assert_eq!(rules.check("Shots", Some(&json!(-2))).len(), 1);
}

#[test]
fn options_and_max_items() {
    let rules = FieldRules {
        options: Some(vec!["a".into(), "b".into()]),
        max_items: Some(2),
        ..FieldRules::default()
    };
    assert!(rules.check("Pick", Some(&json!("a"))).is_empty());
    assert_eq!(rules.check("Pick", Some(&json!("c"))).len(), 1);
    assert_eq!(rules.check("Pick", Some(&json!(["x", "y", "z"]))).len(), 1);
}

// ── Registry lookup ──────────────────────────────────────────────

#[test]
fn lookup_hit_and_miss() {
    let registry = MemoryRegistry::new().with(FieldEntry::text("title"));
    assert_eq!(registry.entry("title").unwrap().id, "title");
    assert_eq!(
        registry.entry("missing").unwrap_err(),
        RegistryError::NotFound("missing".to_string())
    );
}

#[test]
fn batch_lookup_reports_misses() {
    let registry = MemoryRegistry::new()
        .with(FieldEntry::text("a"))
        .with(FieldEntry::number("b"));
    let (found, missing) = registry.entries(&["a".into(), "x".into(), "b".into()]);
    assert_eq!(found.len(), 2);
    assert_eq!(missing, vec![RegistryError::NotFound("x".to_string())]);
}

#[test]
fn registry_from_json() {
    let registry = MemoryRegistry::from_json_str(
        r#"[{"id": "title", "widget": "text"}, {"id": "n", "datatype": "number"}]"#,
    )
    .unwrap();
    assert_eq!(registry.len(), 2);

    let err = MemoryRegistry::from_json_str(r#"[{"id": " "}]"#).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidEntry { .. }));
}
