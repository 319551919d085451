//! Field addressing.
//!
//! Every leaf field of a node resolves to one canonical address:
//!
//! ```text
//! <nodePath>#<scope segments>[.<instanceId>].<field>.value
//! ```
//!
//! Nested sections dot-join their relative paths, and a collection instance
//! contributes its id as the segment right after the collection path, so
//! `chars` instance 2 field `name` is `node#chars.2.name.value`. Instance ids
//! never change on reorder, which keeps every descendant address stable.
//!
//! Resolution never guesses. A field whose identifier cannot be normalised
//! fails with [`AddressError::Unresolved`] and is reported, not indexed. A
//! second field landing on an address already taken is reported the same
//! way with [`AddressError::Collision`].

use crate::error::AddressError;
use crate::traverse::{self, FieldSite};
use crate::tree::{ContentTree, FieldIdent};
use formtree_types::{InstanceId, NodePath, SectionKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Terminal segment of every field address.
pub const VALUE_SEGMENT: &str = "value";

/// Separator between node path and field path.
pub const NODE_SEPARATOR: char = '#';

/// Checks one address segment: non-blank, no `.` and no `#`.
pub(crate) fn valid_segment(segment: &str) -> bool {
    !segment.trim().is_empty() && !segment.contains('.') && !segment.contains(NODE_SEPARATOR)
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Normalises a field's identifier candidates into one address segment.
///
/// Tries, in order: `ref`, `name`, `id`, then the last dot-segment of
/// `path`. The path candidate is rejected when it merely repeats the
/// enclosing section's own path. Candidates are trimmed; a candidate that
/// is blank or contains `.` / `#` is skipped.
pub fn normalize_field_id(
    ident: &FieldIdent,
    enclosing_path: Option<&str>,
) -> Result<String, AddressError> {
    let explicit = [&ident.field_ref, &ident.name, &ident.id]
        .into_iter()
        .flatten()
        .map(|c| c.trim())
        .find(|c| valid_segment(c));
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }

    if let Some(path) = ident.path.as_deref() {
        let candidate = last_segment(path.trim()).trim();
        let self_reference = enclosing_path.is_some_and(|enclosing| {
            let enclosing = enclosing.trim();
            candidate == enclosing || candidate == last_segment(enclosing)
        });
        if valid_segment(candidate) && !self_reference {
            return Ok(candidate.to_string());
        }
    }

    Err(AddressError::Unresolved {
        scope: enclosing_path.unwrap_or_default().to_string(),
        reason: describe_candidates(ident),
    })
}

fn describe_candidates(ident: &FieldIdent) -> String {
    let mut seen = Vec::new();
    for (key, value) in [
        ("ref", &ident.field_ref),
        ("name", &ident.name),
        ("id", &ident.id),
        ("path", &ident.path),
    ] {
        if let Some(v) = value {
            seen.push(format!("{key}={v:?}"));
        }
    }
    if seen.is_empty() {
        "no ref, name, id or path".to_string()
    } else {
        format!("no usable identifier among {}", seen.join(", "))
    }
}

/// A canonical field address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Composes an address from already-validated parts.
    pub(crate) fn compose(node: &NodePath, scope: &[String], field: &str) -> Self {
        let mut out = String::with_capacity(node.as_str().len() + 16);
        out.push_str(node.as_str());
        out.push(NODE_SEPARATOR);
        for segment in scope {
            out.push_str(segment);
            out.push('.');
        }
        out.push_str(field);
        out.push('.');
        out.push_str(VALUE_SEGMENT);
        Self(out)
    }

    /// Parses and validates an address string.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let malformed = |reason: &str| AddressError::Malformed {
            address: raw.to_string(),
            reason: reason.to_string(),
        };
        let (node, field_path) = raw
            .split_once(NODE_SEPARATOR)
            .ok_or_else(|| malformed("missing '#' separator"))?;
        if node.trim().is_empty() {
            return Err(malformed("empty node path"));
        }
        let segments: Vec<&str> = field_path.split('.').collect();
        if segments.len() < 2 || segments.last() != Some(&VALUE_SEGMENT) {
            return Err(malformed("field path must end in '.value'"));
        }
        if !segments.iter().all(|s| valid_segment(s)) {
            return Err(malformed("empty or invalid segment"));
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The node path before `#`.
    pub fn node_path(&self) -> &str {
        self.0
            .split_once(NODE_SEPARATOR)
            .map_or(self.0.as_str(), |(node, _)| node)
    }

    /// Field path segments between `#` and the terminal `value`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        let field_path = self
            .0
            .split_once(NODE_SEPARATOR)
            .map_or("", |(_, path)| path);
        let trimmed = field_path
            .strip_suffix(VALUE_SEGMENT)
            .and_then(|p| p.strip_suffix('.'))
            .unwrap_or(field_path);
        trimmed.split('.').filter(|s| !s.is_empty())
    }

    /// The top-level progressive section this address writes into.
    pub fn section_key(&self) -> Option<SectionKey> {
        self.segments()
            .next()
            .and_then(|s| SectionKey::new(s).ok())
    }

    /// Whether this address lies under `prefix`.
    pub fn starts_with(&self, prefix: &AddressPrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A scope filter over addresses.
///
/// Prefixes always end on a segment boundary, so the prefix for instance 1
/// (`node#chars.1.`) never matches instance 10.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressPrefix(String);

impl AddressPrefix {
    /// Every address of a node.
    pub fn node(node: &NodePath) -> Self {
        Self(format!("{node}{NODE_SEPARATOR}"))
    }

    /// Every address under a dotted scope, e.g. `chars.1` or `input`.
    pub fn scope(node: &NodePath, scope: &str) -> Result<Self, AddressError> {
        let segments = split_scope(scope)?;
        if segments.is_empty() {
            return Ok(Self::node(node));
        }
        Ok(Self(format!(
            "{node}{NODE_SEPARATOR}{}.",
            segments.join(".")
        )))
    }

    /// Every address under one collection instance.
    pub fn instance(
        node: &NodePath,
        collection_scope: &str,
        instance: InstanceId,
    ) -> Result<Self, AddressError> {
        let mut segments = split_scope(collection_scope)?;
        segments.push(instance.to_string());
        Self::scope(node, &segments.join("."))
    }

    /// Every address in one top-level section.
    pub fn section(node: &NodePath, section: &SectionKey) -> Self {
        Self(format!("{node}{NODE_SEPARATOR}{section}."))
    }

    /// Returns the prefix as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `address` lies under this prefix.
    pub fn matches(&self, address: &Address) -> bool {
        address.starts_with(self)
    }
}

impl fmt::Display for AddressPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn split_scope(scope: &str) -> Result<Vec<String>, AddressError> {
    let trimmed = scope.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('.')
        .map(|s| {
            if valid_segment(s) {
                Ok(s.trim().to_string())
            } else {
                Err(AddressError::Malformed {
                    address: scope.to_string(),
                    reason: "empty or invalid scope segment".to_string(),
                })
            }
        })
        .collect()
}

/// Maps `(node, sectionPath, instanceId?, fieldRef)` to its canonical address.
///
/// `section_path` is the dotted scope of the enclosing section or
/// collection, including the ids of any outer instances
/// (`chars.1.outfits`). `instance` is the id within that collection, if
/// the field lives inside one.
pub fn resolve_address(
    node: &NodePath,
    section_path: &str,
    instance: Option<InstanceId>,
    field_ref: &str,
) -> Result<Address, AddressError> {
    let mut scope = split_scope(section_path)?;
    if let Some(id) = instance {
        if scope.is_empty() {
            return Err(AddressError::Unresolved {
                scope: section_path.to_string(),
                reason: format!("instance {id} given without a collection path"),
            });
        }
        scope.push(id.to_string());
    }
    let field = field_ref.trim();
    if !valid_segment(field) {
        return Err(AddressError::Unresolved {
            scope: section_path.to_string(),
            reason: format!("field ref {field_ref:?} is not a usable segment"),
        });
    }
    Ok(Address::compose(node, &scope, field))
}

/// One field that resolved to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub address: Address,
    /// Dotted scope of the enclosing section. For a field sitting directly
    /// in a collection instance this is the collection path and the id is
    /// in `instance`; otherwise every instance id is part of the scope.
    pub scope: String,
    pub instance: Option<InstanceId>,
    pub field_ref: String,
    pub required: bool,
    pub editable: bool,
}

/// One field that could not be addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedField {
    pub scope: String,
    pub instance: Option<InstanceId>,
    pub error: AddressError,
}

/// All addresses of one node's content tree, with the inverse lookup.
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    by_address: BTreeMap<Address, ResolvedField>,
    order: Vec<Address>,
    unresolved: Vec<UnresolvedField>,
}

impl AddressMap {
    /// Resolves every field of `tree` under `node`.
    ///
    /// Unresolvable fields are collected, not fatal. When two fields
    /// produce the same address the first keeps it and the second is
    /// collected as unresolved with [`AddressError::Collision`], so the
    /// address space stays injective.
    pub fn build(node: &NodePath, tree: &ContentTree) -> Self {
        let mut map = Self::default();
        for site in traverse::field_sites(tree) {
            let error = match site_address(node, &site) {
                Ok(resolved) if !map.by_address.contains_key(&resolved.address) => {
                    map.order.push(resolved.address.clone());
                    map.by_address.insert(resolved.address.clone(), resolved);
                    continue;
                }
                Ok(resolved) => {
                    warn!(node = %node, address = %resolved.address, "duplicate field address");
                    AddressError::Collision {
                        address: resolved.address.to_string(),
                    }
                }
                Err(error) => {
                    debug!(node = %node, scope = %site.scope_string(), %error, "field left unresolved");
                    error
                }
            };
            map.unresolved.push(UnresolvedField {
                scope: site.scope_string(),
                instance: site.instance,
                error,
            });
        }
        debug!(
            node = %node,
            resolved = map.order.len(),
            unresolved = map.unresolved.len(),
            "address map built"
        );
        map
    }

    /// Inverse lookup: the field tuple an address was produced from.
    pub fn lookup(&self, address: &Address) -> Option<&ResolvedField> {
        self.by_address.get(address)
    }

    /// Whether the address belongs to a field of this tree.
    pub fn contains(&self, address: &Address) -> bool {
        self.by_address.contains_key(address)
    }

    /// Resolved fields in tree order.
    pub fn fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.order.iter().filter_map(|a| self.by_address.get(a))
    }

    /// Addresses in tree order.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.order.iter()
    }

    /// Resolved fields under a prefix.
    pub fn fields_under<'a>(
        &'a self,
        prefix: &'a AddressPrefix,
    ) -> impl Iterator<Item = &'a ResolvedField> + 'a {
        self.fields().filter(move |f| prefix.matches(&f.address))
    }

    /// Fields whose identifier could not be normalised or whose address
    /// was already taken.
    pub fn unresolved(&self) -> &[UnresolvedField] {
        &self.unresolved
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Resolves one traversal site.
pub(crate) fn site_address(
    node: &NodePath,
    site: &FieldSite<'_>,
) -> Result<ResolvedField, AddressError> {
    let field_ref = normalize_field_id(&site.item.ident, site.enclosing_path).map_err(|e| match e {
        AddressError::Unresolved { reason, .. } => AddressError::Unresolved {
            scope: site.scope_string(),
            reason,
        },
        other => other,
    })?;
    let address = Address::compose(node, &site.scope, &field_ref);
    let (scope, instance) = match site.direct_instance() {
        Some(id) => (
            site.scope[..site.scope.len().saturating_sub(1)].join("."),
            Some(id),
        ),
        None => (site.scope.join("."), None),
    };
    Ok(ResolvedField {
        address,
        scope,
        instance,
        field_ref,
        required: site.item.required,
        editable: site.item.editable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_segment_of_plain_path() {
        assert_eq!(last_segment("a.b.c"), "c");
        assert_eq!(last_segment("single"), "single");
    }

    #[test]
    fn valid_segment_rules() {
        assert!(valid_segment("name"));
        assert!(!valid_segment(" "));
        assert!(!valid_segment("a.b"));
        assert!(!valid_segment("a#b"));
    }
}
