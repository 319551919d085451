//! Field renderer dispatch.
//!
//! [`plan`] turns a content tree into a render plan: every field is paired
//! with its address and registry entry and a [`WidgetKind`] is chosen for
//! it. Fields that cannot be addressed or whose entry is missing become
//! explicit placeholders. A UI layer implements [`FieldRenderer`] and walks
//! the plan with [`render_field`] / [`render_all`]; the match over widget
//! kinds is exhaustive, so adding a kind is a compile error in every
//! renderer.

use crate::address::{self, Address, AddressMap};
use crate::error::AddressError;
use crate::registry::{Datatype, FieldEntry, FieldRegistry};
use crate::traverse::relative_segments;
use crate::tree::{ContentItem, ContentTree, FieldItem};
use formtree_types::{InstanceId, NodePath};
use std::collections::HashSet;
use tracing::warn;

/// Closed set of widgets a field can be rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    TextInput,
    TextArea,
    NumberInput,
    Toggle,
    Select,
    TagList,
    MediaPicker,
    JsonEditor,
}

impl WidgetKind {
    /// Picks the widget for an entry: the registry's widget name wins when
    /// it is recognised, otherwise the datatype decides.
    pub fn for_entry(entry: &FieldEntry) -> Self {
        Self::from_widget_name(&entry.widget).unwrap_or_else(|| Self::from_datatype(entry))
    }

    fn from_widget_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "text" | "input" | "string" => Self::TextInput,
            "textarea" | "longtext" | "long_text" | "paragraph" => Self::TextArea,
            "number" | "integer" | "slider" => Self::NumberInput,
            "toggle" | "switch" | "checkbox" | "boolean" => Self::Toggle,
            "select" | "dropdown" | "radio" | "choice" => Self::Select,
            "tags" | "list" | "chips" => Self::TagList,
            "media" | "image" | "upload" | "file" => Self::MediaPicker,
            "json" => Self::JsonEditor,
            _ => return None,
        };
        Some(kind)
    }

    fn from_datatype(entry: &FieldEntry) -> Self {
        match entry.datatype {
            Datatype::Text if entry.rules.options.is_some() => Self::Select,
            Datatype::Text => Self::TextInput,
            Datatype::LongText => Self::TextArea,
            Datatype::Number => Self::NumberInput,
            Datatype::Boolean => Self::Toggle,
            Datatype::Choice => Self::Select,
            Datatype::List => Self::TagList,
            Datatype::Media => Self::MediaPicker,
            Datatype::Json => Self::JsonEditor,
        }
    }
}

/// A field ready to be drawn.
#[derive(Debug, Clone)]
pub struct WidgetView<'r> {
    pub address: Address,
    pub widget: WidgetKind,
    pub entry: &'r FieldEntry,
    /// Required by the tree item or by the entry's rules.
    pub required: bool,
    pub editable: bool,
}

/// What to draw for one field item.
#[derive(Debug, Clone)]
pub enum FieldView<'r> {
    Widget(WidgetView<'r>),
    /// The field has no usable identifier, or its address is taken by an
    /// earlier field; draw an error placeholder.
    AddressUnresolved { scope: String, reason: String },
    /// The registry has no entry for the ref; draw a "field not found"
    /// placeholder.
    EntryNotFound { address: Address, field_ref: String },
}

/// One node of a render plan, mirroring the content tree.
#[derive(Debug, Clone)]
pub enum RenderNode<'r> {
    Field(FieldView<'r>),
    Section {
        scope: String,
        label: Option<String>,
        children: Vec<RenderNode<'r>>,
    },
    Collection {
        scope: String,
        label: Option<String>,
        can_add: bool,
        can_remove: bool,
        instances: Vec<(InstanceId, Vec<RenderNode<'r>>)>,
    },
}

/// Builds the render plan of a tree.
///
/// `map` must have been built from the same tree; it is used to confirm
/// that every emitted address is the canonical one.
pub fn plan<'r, R>(
    node: &NodePath,
    tree: &ContentTree,
    map: &AddressMap,
    registry: &'r R,
) -> Vec<RenderNode<'r>>
where
    R: FieldRegistry + ?Sized,
{
    let ctx = PlanCtx {
        node,
        map,
        scope: Vec::new(),
        enclosing: None,
    };
    let mut emitted = HashSet::new();
    plan_items(&tree.items, &ctx, registry, &mut emitted)
}

struct PlanCtx<'t> {
    node: &'t NodePath,
    map: &'t AddressMap,
    scope: Vec<String>,
    enclosing: Option<&'t str>,
}

impl<'t> PlanCtx<'t> {
    fn descend(&self, segments: Vec<String>, enclosing: &'t str) -> Self {
        let mut scope = self.scope.clone();
        scope.extend(segments);
        Self {
            node: self.node,
            map: self.map,
            scope,
            enclosing: Some(enclosing),
        }
    }
}

fn plan_items<'t, 'r, R>(
    items: &'t [ContentItem],
    ctx: &PlanCtx<'t>,
    registry: &'r R,
    emitted: &mut HashSet<Address>,
) -> Vec<RenderNode<'r>>
where
    R: FieldRegistry + ?Sized,
{
    let mut nodes = Vec::with_capacity(items.len());
    for item in items {
        let node = match item {
            ContentItem::Field(field) => {
                RenderNode::Field(field_view(field, ctx, registry, emitted))
            }
            ContentItem::Section(section) => {
                let segments = relative_segments(ctx.enclosing, &section.path);
                let children = if segments.is_empty() {
                    plan_items(&section.children, ctx, registry, emitted)
                } else {
                    let inner = ctx.descend(segments, &section.path);
                    plan_items(&section.children, &inner, registry, emitted)
                };
                RenderNode::Section {
                    scope: ctx.scope.join("."),
                    label: section.label.clone(),
                    children,
                }
            }
            ContentItem::Collection(collection) => {
                let segments = relative_segments(ctx.enclosing, &collection.path);
                let base = ctx.descend(segments, &collection.path);
                let count = collection.instances.len();
                let mut instances = Vec::with_capacity(count);
                for instance in &collection.instances {
                    let inner =
                        base.descend(vec![instance.instance_id.to_string()], &collection.path);
                    instances.push((
                        instance.instance_id,
                        plan_items(&instance.children, &inner, registry, emitted),
                    ));
                }
                RenderNode::Collection {
                    scope: base.scope.join("."),
                    label: collection.label.clone(),
                    can_add: collection.collection_rules.can_add(count),
                    can_remove: collection.collection_rules.can_remove(count),
                    instances,
                }
            }
        };
        nodes.push(node);
    }
    nodes
}

/// View of one field. A field whose address was already emitted earlier in
/// the plan gets the unresolved placeholder, matching [`AddressMap`].
fn field_view<'r, R>(
    field: &FieldItem,
    ctx: &PlanCtx<'_>,
    registry: &'r R,
    emitted: &mut HashSet<Address>,
) -> FieldView<'r>
where
    R: FieldRegistry + ?Sized,
{
    let scope = ctx.scope.join(".");
    let field_ref = match address::normalize_field_id(&field.ident, ctx.enclosing) {
        Ok(field_ref) => field_ref,
        Err(error) => {
            return FieldView::AddressUnresolved {
                scope,
                reason: error.to_string(),
            };
        }
    };
    let address = Address::compose(ctx.node, &ctx.scope, &field_ref);
    if !emitted.insert(address.clone()) {
        return FieldView::AddressUnresolved {
            scope,
            reason: AddressError::Collision {
                address: address.to_string(),
            }
            .to_string(),
        };
    }
    if !ctx.map.contains(&address) {
        warn!(%address, "render plan address missing from address map");
    }
    match registry.entry(&field_ref) {
        Ok(entry) => FieldView::Widget(WidgetView {
            address,
            widget: WidgetKind::for_entry(entry),
            entry,
            required: field.required || entry.rules.required,
            editable: field.editable,
        }),
        Err(_) => FieldView::EntryNotFound { address, field_ref },
    }
}

/// Draws fields. One method per widget kind plus the two placeholders.
pub trait FieldRenderer {
    type Output;

    fn text_input(&mut self, view: &WidgetView<'_>) -> Self::Output;
    fn text_area(&mut self, view: &WidgetView<'_>) -> Self::Output;
    fn number_input(&mut self, view: &WidgetView<'_>) -> Self::Output;
    fn toggle(&mut self, view: &WidgetView<'_>) -> Self::Output;
    fn select(&mut self, view: &WidgetView<'_>) -> Self::Output;
    fn tag_list(&mut self, view: &WidgetView<'_>) -> Self::Output;
    fn media_picker(&mut self, view: &WidgetView<'_>) -> Self::Output;
    fn json_editor(&mut self, view: &WidgetView<'_>) -> Self::Output;

    fn address_unresolved(&mut self, scope: &str, reason: &str) -> Self::Output;
    fn entry_not_found(&mut self, address: &Address, field_ref: &str) -> Self::Output;
}

/// Dispatches one field view to the matching renderer method.
pub fn render_field<F: FieldRenderer + ?Sized>(renderer: &mut F, view: &FieldView<'_>) -> F::Output {
    match view {
        FieldView::Widget(w) => match w.widget {
            WidgetKind::TextInput => renderer.text_input(w),
            WidgetKind::TextArea => renderer.text_area(w),
            WidgetKind::NumberInput => renderer.number_input(w),
            WidgetKind::Toggle => renderer.toggle(w),
            WidgetKind::Select => renderer.select(w),
            WidgetKind::TagList => renderer.tag_list(w),
            WidgetKind::MediaPicker => renderer.media_picker(w),
            WidgetKind::JsonEditor => renderer.json_editor(w),
        },
        FieldView::AddressUnresolved { scope, reason } => renderer.address_unresolved(scope, reason),
        FieldView::EntryNotFound { address, field_ref } => {
            renderer.entry_not_found(address, field_ref)
        }
    }
}

/// Renders every field of a plan depth-first.
pub fn render_all<F: FieldRenderer + ?Sized>(
    renderer: &mut F,
    nodes: &[RenderNode<'_>],
) -> Vec<F::Output> {
    let mut out = Vec::new();
    render_into(renderer, nodes, &mut out);
    out
}

fn render_into<F: FieldRenderer + ?Sized>(
    renderer: &mut F,
    nodes: &[RenderNode<'_>],
    out: &mut Vec<F::Output>,
) {
    for node in nodes {
        match node {
            RenderNode::Field(view) => out.push(render_field(renderer, view)),
            RenderNode::Section { children, .. } => render_into(renderer, children, out),
            RenderNode::Collection { instances, .. } => {
                for (_, children) in instances {
                    render_into(renderer, children, out);
                }
            }
        }
    }
}
