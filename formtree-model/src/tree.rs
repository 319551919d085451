//! Content tree types.
//!
//! A node's content is a tree of three closed item kinds:
//! - [`FieldItem`]: a leaf bound to a field registry entry
//! - [`SectionItem`]: a named group of child items
//! - [`CollectionSectionItem`]: a repeatable group whose template is
//!   instantiated once per [`Instance`]
//!
//! Trees arrive as loosely shaped JSON (`ref` / `name` / `id` / `path`
//! identifiers, `children` or `instances` arrays). [`ContentTree::from_json`]
//! classifies every raw item into the closed enum once, so traversal and
//! rendering match exhaustively instead of sniffing properties.

use crate::error::{ModelError, ModelResult};
use crate::traverse::relative_segments;
use formtree_types::InstanceId;
use serde::Serialize;
use serde_json::{Map, Value};

/// Identifier candidates carried by a field item.
///
/// Normalisation into a single address segment happens at resolution time
/// (see [`crate::address::normalize_field_id`]) so unresolvable fields stay
/// representable and can be reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldIdent {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A leaf item bound to one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldItem {
    #[serde(flatten)]
    pub ident: FieldIdent,
    pub required: bool,
    pub editable: bool,
}

impl FieldItem {
    /// An editable, optional field with an explicit `ref`.
    pub fn new(field_ref: impl Into<String>) -> Self {
        Self {
            ident: FieldIdent {
                field_ref: Some(field_ref.into()),
                ..FieldIdent::default()
            },
            required: false,
            editable: true,
        }
    }

    /// A field identified only by the given identifier candidates.
    pub fn with_ident(ident: FieldIdent) -> Self {
        Self {
            ident,
            required: false,
            editable: true,
        }
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }
}

/// A named group of items.
///
/// `path` is relative to the enclosing section. An empty path makes the
/// section a label-only group that contributes no address segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionItem {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub children: Vec<ContentItem>,
}

impl SectionItem {
    pub fn new(path: impl Into<String>, children: Vec<ContentItem>) -> Self {
        Self {
            path: path.into(),
            label: None,
            children,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Bounds on the number of instances of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionRules {
    pub min: u32,
    pub max: u32,
}

impl CollectionRules {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Whether one more instance fits.
    pub fn can_add(&self, count: usize) -> bool {
        (count as u64) < u64::from(self.max)
    }

    /// Whether one instance may be removed.
    pub fn can_remove(&self, count: usize) -> bool {
        (count as u64) > u64::from(self.min)
    }
}

impl Default for CollectionRules {
    fn default() -> Self {
        Self {
            min: 0,
            max: u32::MAX,
        }
    }
}

/// One repetition of a collection template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub children: Vec<ContentItem>,
}

/// A repeatable group.
///
/// `instances` is kept in display order; identity lives in `instance_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSectionItem {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub collection_rules: CollectionRules,
    pub template: Vec<ContentItem>,
    pub instances: Vec<Instance>,
}

impl CollectionSectionItem {
    /// A collection with `count` instances numbered from 1.
    pub fn new(
        path: impl Into<String>,
        rules: CollectionRules,
        template: Vec<ContentItem>,
        count: u32,
    ) -> Self {
        let instances = (1..=count)
            .filter_map(|id| InstanceId::new(id).ok())
            .map(|instance_id| Instance {
                instance_id,
                children: template.clone(),
            })
            .collect();
        Self {
            path: path.into(),
            label: None,
            collection_rules: rules,
            template,
            instances,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Next unused instance id: one past the highest id ever present.
    pub fn next_instance_id(&self) -> InstanceId {
        self.instances
            .iter()
            .map(|i| i.instance_id)
            .max()
            .map_or(InstanceId::FIRST, InstanceId::next)
    }

    /// Instantiates the template under a new id.
    pub fn instantiate(&self, instance_id: InstanceId) -> Instance {
        Instance {
            instance_id,
            children: self.template.clone(),
        }
    }

    /// Position of an instance in display order.
    pub fn position_of(&self, instance_id: InstanceId) -> Option<usize> {
        self.instances
            .iter()
            .position(|i| i.instance_id == instance_id)
    }

    /// Instance ids in display order.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.iter().map(|i| i.instance_id).collect()
    }
}

/// A content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentItem {
    Field(FieldItem),
    Section(SectionItem),
    Collection(CollectionSectionItem),
}

impl From<FieldItem> for ContentItem {
    fn from(item: FieldItem) -> Self {
        Self::Field(item)
    }
}

impl From<SectionItem> for ContentItem {
    fn from(item: SectionItem) -> Self {
        Self::Section(item)
    }
}

impl From<CollectionSectionItem> for ContentItem {
    fn from(item: CollectionSectionItem) -> Self {
        Self::Collection(item)
    }
}

/// The content of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ContentTree {
    pub items: Vec<ContentItem>,
}

impl ContentTree {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self { items }
    }

    /// Parses a loosely shaped JSON tree.
    ///
    /// Accepts either an array of items or an object with an `items` /
    /// `children` array. Items may declare `kind` (or `type`) explicitly;
    /// otherwise an item with `instances` or collection rules is a
    /// collection, one with `children` is a section and anything else is a
    /// field.
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("items").or_else(|| map.get("children")) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(invalid("$", "expected an `items` array"));
                }
            },
            _ => return Err(invalid("$", "expected an array or object")),
        };
        Ok(Self {
            items: parse_items(items, "$")?,
        })
    }

    /// Parses a JSON string.
    pub fn from_json_str(source: &str) -> ModelResult<Self> {
        let value: Value = serde_json::from_str(source)?;
        Self::from_json(&value)
    }

    /// Finds the collection at a dotted address scope such as `chars` or
    /// `chars.1.outfits`.
    pub fn find_collection_mut(&mut self, scope: &str) -> Option<&mut CollectionSectionItem> {
        let segments: Vec<&str> = scope.split('.').filter(|s| !s.is_empty()).collect();
        find_collection_in(&mut self.items, None, &segments)
    }

    /// Immutable variant of [`Self::find_collection_mut`].
    pub fn find_collection(&self, scope: &str) -> Option<&CollectionSectionItem> {
        let segments: Vec<&str> = scope.split('.').filter(|s| !s.is_empty()).collect();
        find_collection_ref(&self.items, None, &segments)
    }
}

/// Remaining scope segments after entering an item with `path`, if the
/// scope passes through it.
fn strip_path<'s>(
    segments: &'s [&'s str],
    enclosing: Option<&str>,
    path: &str,
) -> Option<&'s [&'s str]> {
    let own = relative_segments(enclosing, path);
    if own.len() > segments.len() || own.iter().zip(segments).any(|(a, b)| a != b) {
        return None;
    }
    Some(&segments[own.len()..])
}

fn find_collection_in<'a>(
    items: &'a mut [ContentItem],
    enclosing: Option<&str>,
    segments: &[&str],
) -> Option<&'a mut CollectionSectionItem> {
    for item in items.iter_mut() {
        match item {
            ContentItem::Field(_) => {}
            ContentItem::Section(section) => {
                let Some(rest) = strip_path(segments, enclosing, &section.path) else {
                    continue;
                };
                let inner = if section.path.trim().is_empty() {
                    enclosing
                } else {
                    Some(section.path.as_str())
                };
                if let Some(found) = find_collection_in(&mut section.children, inner, rest) {
                    return Some(found);
                }
            }
            ContentItem::Collection(collection) => {
                let Some(rest) = strip_path(segments, enclosing, &collection.path) else {
                    continue;
                };
                if rest.is_empty() {
                    return Some(collection);
                }
                let Ok(id) = rest[0].parse::<InstanceId>() else {
                    continue;
                };
                let path = collection.path.as_str();
                let Some(instance) = collection
                    .instances
                    .iter_mut()
                    .find(|i| i.instance_id == id)
                else {
                    continue;
                };
                if let Some(found) = find_collection_in(&mut instance.children, Some(path), &rest[1..]) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn find_collection_ref<'a>(
    items: &'a [ContentItem],
    enclosing: Option<&str>,
    segments: &[&str],
) -> Option<&'a CollectionSectionItem> {
    for item in items {
        match item {
            ContentItem::Field(_) => {}
            ContentItem::Section(section) => {
                let Some(rest) = strip_path(segments, enclosing, &section.path) else {
                    continue;
                };
                let inner = if section.path.trim().is_empty() {
                    enclosing
                } else {
                    Some(section.path.as_str())
                };
                if let Some(found) = find_collection_ref(&section.children, inner, rest) {
                    return Some(found);
                }
            }
            ContentItem::Collection(collection) => {
                let Some(rest) = strip_path(segments, enclosing, &collection.path) else {
                    continue;
                };
                if rest.is_empty() {
                    return Some(collection);
                }
                let Ok(id) = rest[0].parse::<InstanceId>() else {
                    continue;
                };
                if let Some(instance) = collection.instances.iter().find(|i| i.instance_id == id) {
                    if let Some(found) =
                        find_collection_ref(&instance.children, Some(&collection.path), &rest[1..])
                    {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

// ── Loose JSON ingestion ─────────────────────────────────────────

fn invalid(location: &str, reason: impl Into<String>) -> ModelError {
    ModelError::InvalidItem {
        location: location.to_string(),
        reason: reason.into(),
    }
}

fn string_prop(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string_prop(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| string_prop(map, k))
}

fn bool_prop(map: &Map<String, Value>, key: &str, default: bool) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn rules_value(map: &Map<String, Value>) -> Option<&Value> {
    map.get("collection_rules")
        .or_else(|| map.get("collectionRules"))
        .or_else(|| map.get("rules"))
}

enum RawKind {
    Field,
    Section,
    Collection,
}

fn classify(map: &Map<String, Value>, location: &str) -> ModelResult<RawKind> {
    if let Some(kind) = first_string_prop(map, &["kind", "type"]) {
        return match kind.as_str() {
            "field" => Ok(RawKind::Field),
            "section" => Ok(RawKind::Section),
            "collection" | "collection_section" | "collectionSection" => Ok(RawKind::Collection),
            other => Err(invalid(location, format!("unknown item kind '{other}'"))),
        };
    }
    if map.contains_key("instances")
        || map.contains_key("template")
        || map.contains_key("collection_rules")
        || map.contains_key("collectionRules")
    {
        return Ok(RawKind::Collection);
    }
    if map.contains_key("children") {
        return Ok(RawKind::Section);
    }
    Ok(RawKind::Field)
}

fn parse_items(items: &[Value], location: &str) -> ModelResult<Vec<ContentItem>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_item(item, &format!("{location}[{i}]")))
        .collect()
}

fn children_of<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_array))
        .map_or(&[], Vec::as_slice)
}

fn parse_item(value: &Value, location: &str) -> ModelResult<ContentItem> {
    let Value::Object(map) = value else {
        return Err(invalid(location, "item is not an object"));
    };
    let label = first_string_prop(map, &["label", "title"]);

    match classify(map, location)? {
        RawKind::Field => Ok(ContentItem::Field(FieldItem {
            ident: FieldIdent {
                field_ref: string_prop(map, "ref"),
                name: string_prop(map, "name"),
                id: string_prop(map, "id"),
                path: string_prop(map, "path"),
            },
            required: bool_prop(map, "required", false),
            editable: bool_prop(map, "editable", true),
        })),
        RawKind::Section => Ok(ContentItem::Section(SectionItem {
            path: string_prop(map, "path").unwrap_or_default(),
            label,
            children: parse_items(children_of(map, &["children"]), &format!("{location}.children"))?,
        })),
        RawKind::Collection => {
            let path = string_prop(map, "path")
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| invalid(location, "collection without a path"))?;
            let rules = parse_rules(rules_value(map), location)?;
            let template = parse_items(
                children_of(map, &["template", "children"]),
                &format!("{location}.template"),
            )?;
            let mut collection = CollectionSectionItem {
                path,
                label,
                collection_rules: rules,
                template,
                instances: Vec::new(),
            };
            match map.get("instances") {
                Some(Value::Array(raw)) => {
                    for (i, raw_instance) in raw.iter().enumerate() {
                        let at = format!("{location}.instances[{i}]");
                        let instance = parse_instance(raw_instance, &collection, &at)?;
                        if collection.position_of(instance.instance_id).is_some() {
                            return Err(invalid(
                                &at,
                                format!("duplicate instance id {}", instance.instance_id),
                            ));
                        }
                        collection.instances.push(instance);
                    }
                }
                Some(_) => return Err(invalid(location, "`instances` is not an array")),
                None => {
                    for _ in 0..rules.min {
                        let instance = collection.instantiate(collection.next_instance_id());
                        collection.instances.push(instance);
                    }
                }
            }
            Ok(ContentItem::Collection(collection))
        }
    }
}

fn parse_rules(value: Option<&Value>, location: &str) -> ModelResult<CollectionRules> {
    let Some(value) = value else {
        return Ok(CollectionRules::default());
    };
    let Value::Object(map) = value else {
        return Err(invalid(location, "collection rules are not an object"));
    };
    let bound = |key: &str, default: u32| -> ModelResult<u32> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| invalid(location, format!("rule '{key}' is not a count"))),
        }
    };
    let rules = CollectionRules {
        min: bound("min", 0)?,
        max: bound("max", u32::MAX)?,
    };
    if rules.min > rules.max {
        return Err(invalid(
            location,
            format!("min {} exceeds max {}", rules.min, rules.max),
        ));
    }
    Ok(rules)
}

fn parse_instance(
    value: &Value,
    collection: &CollectionSectionItem,
    location: &str,
) -> ModelResult<Instance> {
    let Value::Object(map) = value else {
        return Err(invalid(location, "instance is not an object"));
    };
    let raw_id = ["instance_id", "instanceId", "id"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_i64))
        .ok_or_else(|| invalid(location, "instance without an integer id"))?;
    let instance_id = InstanceId::try_from(raw_id)?;
    let children = match map.get("children") {
        Some(Value::Array(items)) => parse_items(items, &format!("{location}.children"))?,
        _ => collection.template.clone(),
    };
    Ok(Instance {
        instance_id,
        children,
    })
}

impl TryFrom<Value> for ContentTree {
    type Error = ModelError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

impl<'de> serde::Deserialize<'de> for ContentTree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_prefers_explicit_kind() {
        let map = json!({"kind": "section", "instances": []});
        assert!(matches!(
            classify(map.as_object().unwrap(), "$").unwrap(),
            RawKind::Section
        ));
    }

    #[test]
    fn classify_unknown_kind_is_error() {
        let map = json!({"kind": "widget"});
        assert!(classify(map.as_object().unwrap(), "$").is_err());
    }

    #[test]
    fn rules_reject_inverted_bounds() {
        let rules = json!({"min": 3, "max": 1});
        assert!(parse_rules(Some(&rules), "$").is_err());
    }
}
