//! Depth-first traversal of content trees.
//!
//! Traversal always descends through section children and through every
//! collection instance. Fields that only exist in a collection template
//! (no instance yet) are still reported by [`collect_field_refs`], since
//! the registry must know about them before the first instance is added.

use crate::address::{self, Address};
use crate::tree::{CollectionSectionItem, ContentItem, ContentTree, FieldItem};
use formtree_types::{InstanceId, NodePath};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Read access to field values by address.
pub trait ValueSource {
    fn value(&self, address: &Address) -> Option<&Value>;
}

impl ValueSource for BTreeMap<Address, Value> {
    fn value(&self, address: &Address) -> Option<&Value> {
        self.get(address)
    }
}

impl ValueSource for HashMap<Address, Value> {
    fn value(&self, address: &Address) -> Option<&Value> {
        self.get(address)
    }
}

/// Whether a value counts as empty.
///
/// Blank means null, `false`, zero, a whitespace-only string, or an empty
/// array or object.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Whether a value holds any non-blank leaf.
pub fn has_content(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(has_content),
        Value::Object(map) => map.values().any(has_content),
        other => !is_blank(other),
    }
}

/// Where a field sits in the tree.
#[derive(Debug, Clone)]
pub struct FieldSite<'a> {
    pub item: &'a FieldItem,
    /// Address segments of the enclosing scope, instance ids included.
    pub scope: Vec<String>,
    /// Declared path of the closest enclosing section or collection.
    pub enclosing_path: Option<&'a str>,
    /// Innermost enclosing collection instance.
    pub instance: Option<InstanceId>,
    instance_depth: Option<usize>,
}

impl FieldSite<'_> {
    /// Dotted scope string.
    pub fn scope_string(&self) -> String {
        self.scope.join(".")
    }

    /// The instance id when the field sits directly in an instance
    /// (possibly through label-only groups).
    pub fn direct_instance(&self) -> Option<InstanceId> {
        match (self.instance, self.instance_depth) {
            (Some(id), Some(depth)) if depth == self.scope.len() => Some(id),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct Ctx<'a> {
    scope: Vec<String>,
    enclosing_path: Option<&'a str>,
    instance: Option<InstanceId>,
    instance_depth: Option<usize>,
}

/// Segments a relative section path adds below its parent.
///
/// A child path spelled out in full (`parent.child`) is made relative.
pub(crate) fn relative_segments(parent_path: Option<&str>, path: &str) -> Vec<String> {
    let path = path.trim();
    let relative = parent_path
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .and_then(|p| path.strip_prefix(p).and_then(|rest| rest.strip_prefix('.')))
        .unwrap_or(path);
    relative
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl<'a> Ctx<'a> {
    fn root() -> Self {
        Self {
            scope: Vec::new(),
            enclosing_path: None,
            instance: None,
            instance_depth: None,
        }
    }

    fn enter_section(&self, path: &'a str) -> Self {
        let segments = relative_segments(self.enclosing_path, path);
        if segments.is_empty() {
            return self.clone();
        }
        let mut next = self.clone();
        next.scope.extend(segments);
        next.enclosing_path = Some(path);
        next
    }

    fn enter_instance(&self, collection: &'a CollectionSectionItem, id: InstanceId) -> Self {
        let mut next = self.enter_section(&collection.path);
        next.enclosing_path = Some(&collection.path);
        next.scope.push(id.to_string());
        next.instance = Some(id);
        next.instance_depth = Some(next.scope.len());
        next
    }
}

/// Every field reachable through sections and collection instances, in
/// tree order. Template-only fields are not included.
pub fn field_sites(tree: &ContentTree) -> Vec<FieldSite<'_>> {
    let mut out = Vec::new();
    walk_sites(&tree.items, &Ctx::root(), &mut out);
    out
}

fn walk_sites<'a>(items: &'a [ContentItem], ctx: &Ctx<'a>, out: &mut Vec<FieldSite<'a>>) {
    for item in items {
        match item {
            ContentItem::Field(field) => out.push(FieldSite {
                item: field,
                scope: ctx.scope.clone(),
                enclosing_path: ctx.enclosing_path,
                instance: ctx.instance,
                instance_depth: ctx.instance_depth,
            }),
            ContentItem::Section(section) => {
                walk_sites(&section.children, &ctx.enter_section(&section.path), out);
            }
            ContentItem::Collection(collection) => {
                for instance in &collection.instances {
                    let inner = ctx.enter_instance(collection, instance.instance_id);
                    walk_sites(&instance.children, &inner, out);
                }
            }
        }
    }
}

/// Distinct normalised field refs, in first-seen order.
///
/// Descends into sections, every collection instance and every collection
/// template. Fields that cannot be normalised are skipped (they surface in
/// [`structural_defects`]).
pub fn collect_field_refs(tree: &ContentTree) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    collect_refs(&tree.items, None, &mut seen, &mut out);
    out
}

fn collect_refs(
    items: &[ContentItem],
    enclosing: Option<&str>,
    seen: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    for item in items {
        match item {
            ContentItem::Field(field) => {
                if let Ok(id) = address::normalize_field_id(&field.ident, enclosing) {
                    if seen.insert(id.clone()) {
                        out.push(id);
                    }
                }
            }
            ContentItem::Section(section) => {
                let inner = if section.path.trim().is_empty() {
                    enclosing
                } else {
                    Some(section.path.as_str())
                };
                collect_refs(&section.children, inner, seen, out);
            }
            ContentItem::Collection(collection) => {
                let inner = Some(collection.path.as_str());
                for instance in &collection.instances {
                    collect_refs(&instance.children, inner, seen, out);
                }
                collect_refs(&collection.template, inner, seen, out);
            }
        }
    }
}

/// True iff every addressable field of the tree holds a blank value in
/// `values`. Sections and collections are transparent.
pub fn is_empty<S>(tree: &ContentTree, node: &NodePath, values: &S) -> bool
where
    S: ValueSource + ?Sized,
{
    field_sites(tree).iter().all(|site| {
        match address::site_address(node, site) {
            Ok(resolved) => values.value(&resolved.address).is_none_or(is_blank),
            // Unaddressable fields hold no value.
            Err(_) => true,
        }
    })
}

/// A structural problem found in a content tree. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralDefect {
    /// Two siblings share the same ref or path.
    DuplicateSibling { scope: String, key: String },
    /// A field whose identifier cannot be normalised.
    UnresolvableField { scope: String, reason: String },
}

impl fmt::Display for StructuralDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = |s: &str| if s.is_empty() { "<root>".to_string() } else { s.to_string() };
        match self {
            Self::DuplicateSibling { scope, key } => {
                write!(f, "duplicate sibling '{key}' in {}", root(scope))
            }
            Self::UnresolvableField { scope, reason } => {
                write!(f, "unresolvable field in {}: {reason}", root(scope))
            }
        }
    }
}

/// Finds duplicate sibling keys and unresolvable fields.
pub fn structural_defects(tree: &ContentTree) -> Vec<StructuralDefect> {
    let mut defects = Vec::new();
    check_siblings(&tree.items, "", None, &mut defects);
    defects
}

fn join_scope(scope: &str, segment: &str) -> String {
    if scope.is_empty() {
        segment.to_string()
    } else if segment.is_empty() {
        scope.to_string()
    } else {
        format!("{scope}.{segment}")
    }
}

fn check_siblings(
    items: &[ContentItem],
    scope: &str,
    enclosing: Option<&str>,
    defects: &mut Vec<StructuralDefect>,
) {
    check_scope(items, scope, enclosing, &mut HashSet::new(), defects);
}

/// Checks `items` against the keys already taken in their address scope.
/// A section with a blank path adds no segment, so its children share the
/// parent's keys.
fn check_scope(
    items: &[ContentItem],
    scope: &str,
    enclosing: Option<&str>,
    keys: &mut HashSet<String>,
    defects: &mut Vec<StructuralDefect>,
) {
    let note_key = |key: String, keys: &mut HashSet<String>, defects: &mut Vec<StructuralDefect>| {
        if !keys.insert(key.clone()) {
            defects.push(StructuralDefect::DuplicateSibling {
                scope: scope.to_string(),
                key,
            });
        }
    };

    for item in items {
        match item {
            ContentItem::Field(field) => {
                match address::normalize_field_id(&field.ident, enclosing) {
                    Ok(id) => note_key(id, keys, defects),
                    Err(error) => defects.push(StructuralDefect::UnresolvableField {
                        scope: scope.to_string(),
                        reason: error.to_string(),
                    }),
                }
            }
            ContentItem::Section(section) => {
                let relative = relative_segments(enclosing, &section.path).join(".");
                if relative.is_empty() {
                    check_scope(&section.children, scope, enclosing, keys, defects);
                } else {
                    note_key(relative.clone(), keys, defects);
                    check_siblings(
                        &section.children,
                        &join_scope(scope, &relative),
                        Some(section.path.as_str()),
                        defects,
                    );
                }
            }
            ContentItem::Collection(collection) => {
                let relative = relative_segments(enclosing, &collection.path).join(".");
                note_key(relative.clone(), keys, defects);
                let base = join_scope(scope, &relative);
                let inner = Some(collection.path.as_str());
                check_siblings(&collection.template, &format!("{base}[template]"), inner, defects);
                for instance in &collection.instances {
                    let at = join_scope(&base, &instance.instance_id.to_string());
                    check_siblings(&instance.children, &at, inner, defects);
                }
            }
        }
    }
}
