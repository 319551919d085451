use formtree_model::render::{plan, render_all, render_field};
use formtree_model::{
    Address, AddressMap, CollectionRules, CollectionSectionItem, ContentTree, FieldEntry,
    FieldItem, FieldRenderer, FieldView, MemoryRegistry, RenderNode, SectionItem, WidgetKind,
    WidgetView,
};
use formtree_types::NodePath;
use pretty_assertions::assert_eq;
use serde_json::json;

/// Renders each field as a short tag.
struct TagRenderer;

impl FieldRenderer for TagRenderer {
    type Output = String;

    fn text_input(&mut self, view: &WidgetView<'_>) -> String {
        format!("text:{}", view.address)
    }
    fn text_area(&mut self, view: &WidgetView<'_>) -> String {
        format!("area:{}", view.address)
    }
    fn number_input(&mut self, view: &WidgetView<'_>) -> String {
        format!("number:{}", view.address)
    }
    fn toggle(&mut self, view: &WidgetView<'_>) -> String {
        format!("toggle:{}", view.address)
    }
    fn select(&mut self, view: &WidgetView<'_>) -> String {
        format!("select:{}", view.address)
    }
    fn tag_list(&mut self, view: &WidgetView<'_>) -> String {
        format!("tags:{}", view.address)
    }
    fn media_picker(&mut self, view: &WidgetView<'_>) -> String {
        format!("media:{}", view.address)
    }
    fn json_editor(&mut self, view: &WidgetView<'_>) -> String {
        format!("json:{}", view.address)
    }
    fn address_unresolved(&mut self, scope: &str, _reason: &str) -> String {
        format!("unresolved:{scope}")
    }
    fn entry_not_found(&mut self, address: &Address, field_ref: &str) -> String {
        format!("missing:{field_ref}@{address}")
    }
}

fn node() -> NodePath {
    NodePath::new("n").unwrap()
}

fn registry() -> MemoryRegistry {
    MemoryRegistry::new()
        .with(FieldEntry::text("title"))
        .with(FieldEntry::number("age"))
        .with(FieldEntry::toggle("lead"))
        .with(FieldEntry::select("tone", vec!["warm".into()]))
}

// ── Widget selection ─────────────────────────────────────────────

#[test]
fn widget_name_wins_over_datatype() {
    let mut entry = FieldEntry::text("bio");
    entry.widget = "textarea".into();
    assert_eq!(WidgetKind::for_entry(&entry), WidgetKind::TextArea);
}

#[test]
fn unknown_widget_falls_back_to_datatype() {
    let mut entry = FieldEntry::number("count");
    entry.widget = "fancy-dial".into();
    assert_eq!(WidgetKind::for_entry(&entry), WidgetKind::NumberInput);

    let mut text_with_options = FieldEntry::text("mood");
    text_with_options.widget = String::new();
    text_with_options.rules.options = Some(vec!["calm".into()]);
    assert_eq!(WidgetKind::for_entry(&text_with_options), WidgetKind::Select);
}

// ── Plan ─────────────────────────────────────────────────────────

#[test]
fn plan_pairs_fields_with_entries() {
    let tree = ContentTree::new(vec![
        FieldItem::new("title").required().into(),
        SectionItem::new("cast", vec![FieldItem::new("tone").read_only().into()]).into(),
    ]);
    let map = AddressMap::build(&node(), &tree);
    let reg = registry();
    let nodes = plan(&node(), &tree, &map, &reg);

    let RenderNode::Field(FieldView::Widget(title)) = &nodes[0] else {
        panic!("expected a widget");
    };
    assert_eq!(title.address.as_str(), "n#title.value");
    assert_eq!(title.widget, WidgetKind::TextInput);
    assert!(title.required);
    assert!(title.editable);

    let RenderNode::Section { children, .. } = &nodes[1] else {
        panic!("expected a section");
    };
    let RenderNode::Field(FieldView::Widget(tone)) = &children[0] else {
        panic!("expected a widget");
    };
    assert_eq!(tone.address.as_str(), "n#cast.tone.value");
    assert_eq!(tone.widget, WidgetKind::Select);
    assert!(!tone.editable);
}

#[test]
fn plan_emits_placeholders() {
    let tree = ContentTree::from_json(&json!([
        {"ref": "nope"},
        {"path": "sec", "children": [{"path": "sec"}]}
    ]))
    .unwrap();
    let map = AddressMap::build(&node(), &tree);
    let reg = registry();
    let rendered = render_all(&mut TagRenderer, &plan(&node(), &tree, &map, &reg));
    assert_eq!(
        rendered,
        vec!["missing:nope@n#nope.value".to_string(), "unresolved:sec".to_string()]
    );
}

#[test]
fn duplicate_field_renders_placeholder_after_first() {
    let tree = ContentTree::new(vec![
        FieldItem::new("title").into(),
        SectionItem::new(
            "cast",
            vec![FieldItem::new("tone").into(), FieldItem::new("tone").into()],
        )
        .into(),
    ]);
    let map = AddressMap::build(&node(), &tree);
    let reg = registry();
    let rendered = render_all(&mut TagRenderer, &plan(&node(), &tree, &map, &reg));
    assert_eq!(
        rendered,
        vec![
            "text:n#title.value".to_string(),
            "select:n#cast.tone.value".to_string(),
            "unresolved:cast".to_string(),
        ]
    );
}

#[test]
fn plan_reports_collection_bounds() {
    let chars = CollectionSectionItem::new(
        "chars",
        CollectionRules::new(1, 2),
        vec![FieldItem::new("age").into(), FieldItem::new("lead").into()],
        2,
    );
    let tree = ContentTree::new(vec![chars.into()]);
    let map = AddressMap::build(&node(), &tree);
    let reg = registry();
    let nodes = plan(&node(), &tree, &map, &reg);

    let RenderNode::Collection {
        scope,
        can_add,
        can_remove,
        instances,
        ..
    } = &nodes[0]
    else {
        panic!("expected a collection");
    };
    assert_eq!(scope, "chars");
    assert!(!can_add);
    assert!(can_remove);
    assert_eq!(instances.len(), 2);

    let rendered = render_all(&mut TagRenderer, &nodes);
    assert_eq!(
        rendered,
        vec![
            "number:n#chars.1.age.value".to_string(),
            "toggle:n#chars.1.lead.value".to_string(),
            "number:n#chars.2.age.value".to_string(),
            "toggle:n#chars.2.lead.value".to_string(),
        ]
    );
}

#[test]
fn render_field_dispatches_single_view() {
    let tree = ContentTree::new(vec![FieldItem::new("title").into()]);
    let map = AddressMap::build(&node(), &tree);
    let reg = registry();
    let nodes = plan(&node(), &tree, &map, &reg);
    let RenderNode::Field(view) = &nodes[0] else {
        panic!("expected a field");
    };
    assert_eq!(render_field(&mut TagRenderer, view), "text:n#title.value");
}
