//! The persisted representation of one node.
//!
//! Field values live in a JSON object keyed by address segments: the value
//! of `node#input.brief.title.value` is `data.input.brief.title`. The first
//! segment of every address is a top-level progressive section, which owns
//! a timestamp and a stale flag.

use crate::address::Address;
use crate::error::{ModelError, ModelResult};
use crate::traverse::{ValueSource, has_content};
use formtree_types::{NodeId, NodePath, SectionKey, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// One write to a document: set a value, or remove it when `value` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub address: Address,
    pub value: Option<Value>,
}

/// A batch of writes sent to the document store.
///
/// Section data in `cleared_sections` is dropped first, then `ops` apply in
/// order, then the section metadata is replaced when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatch {
    pub ops: Vec<PatchOp>,
    #[serde(default)]
    pub cleared_sections: BTreeSet<SectionKey>,
    #[serde(default)]
    pub section_timestamps: Option<BTreeMap<SectionKey, Timestamp>>,
    #[serde(default)]
    pub stale_sections: Option<BTreeSet<SectionKey>>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
            && self.cleared_sections.is_empty()
            && self.section_timestamps.is_none()
            && self.stale_sections.is_none()
    }

    /// Addresses written by this patch.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.ops.iter().map(|op| &op.address)
    }

    /// Sections this patch writes to where every op landed in `rejected`.
    pub fn unwritten_sections(&self, rejected: &BTreeMap<Address, String>) -> BTreeSet<SectionKey> {
        let mut written = BTreeSet::new();
        let mut refused = BTreeSet::new();
        for op in &self.ops {
            let Some(section) = op.address.section_key() else {
                continue;
            };
            if rejected.contains_key(&op.address) {
                refused.insert(section);
            } else {
                written.insert(section);
            }
        }
        refused.difference(&written).cloned().collect()
    }
}

/// A node's persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub node_id: NodeId,
    pub path: NodePath,
    #[serde(default = "empty_object")]
    data: Value,
    #[serde(default)]
    section_timestamps: BTreeMap<SectionKey, Timestamp>,
    #[serde(default)]
    stale_sections: BTreeSet<SectionKey>,
    /// Incremented by the store on every applied patch.
    #[serde(default)]
    pub revision: u64,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Escapes one segment for use in a JSON pointer.
fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

impl NodeDocument {
    pub fn new(node_id: NodeId, path: NodePath) -> Self {
        Self {
            node_id,
            path,
            data: empty_object(),
            section_timestamps: BTreeMap::new(),
            stale_sections: BTreeSet::new(),
            revision: 0,
        }
    }

    /// A document whose path is derived from its id.
    pub fn for_node(node_id: NodeId) -> Self {
        Self::new(node_id, NodePath::for_node(node_id))
    }

    /// Raw field data.
    pub fn data(&self) -> &Value {
        &self.data
    }

    fn segments<'a>(&self, address: &'a Address) -> ModelResult<Vec<&'a str>> {
        if address.node_path() != self.path.as_str() {
            return Err(ModelError::NodeMismatch {
                address_node: address.node_path().to_string(),
                document_node: self.path.clone(),
            });
        }
        Ok(address.segments().collect())
    }

    /// JSON pointer into `data` for an address of this node.
    pub fn pointer_for(&self, address: &Address) -> ModelResult<String> {
        let segments = self.segments(address)?;
        Ok(segments
            .iter()
            .map(|s| format!("/{}", escape_segment(s)))
            .collect())
    }

    /// The stored value at an address, if any.
    pub fn value_at(&self, address: &Address) -> Option<&Value> {
        let pointer = self.pointer_for(address).ok()?;
        self.data.pointer(&pointer)
    }

    /// Writes a value, creating intermediate objects. Returns the previous
    /// value.
    pub fn set_value(&mut self, address: &Address, value: Value) -> ModelResult<Option<Value>> {
        let segments = self.segments(address)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(ModelError::PathConflict {
                pointer: address.to_string(),
            });
        };
        let mut current = &mut self.data;
        for segment in parents {
            if current.is_null() {
                *current = empty_object();
            }
            let Value::Object(map) = current else {
                return Err(ModelError::PathConflict {
                    pointer: address.to_string(),
                });
            };
            current = map.entry((*segment).to_string()).or_insert(Value::Null);
        }
        if current.is_null() {
            *current = empty_object();
        }
        let Value::Object(map) = current else {
            return Err(ModelError::PathConflict {
                pointer: address.to_string(),
            });
        };
        Ok(map.insert((*last).to_string(), value))
    }

    /// Removes the value at an address. Returns the removed value.
    pub fn remove_value(&mut self, address: &Address) -> ModelResult<Option<Value>> {
        let segments = self.segments(address)?;
        let Some((last, parents)) = segments.split_last() else {
            return Ok(None);
        };
        let parent_pointer: String = parents
            .iter()
            .map(|s| format!("/{}", escape_segment(s)))
            .collect();
        Ok(self
            .data
            .pointer_mut(&parent_pointer)
            .and_then(Value::as_object_mut)
            .and_then(|map| map.remove(*last)))
    }

    /// Whether a top-level section holds any non-blank value.
    pub fn section_has_data(&self, section: &SectionKey) -> bool {
        self.data.get(section.as_str()).is_some_and(has_content)
    }

    /// Top-level sections present in `data`.
    pub fn sections_with_data(&self) -> Vec<SectionKey> {
        self.data
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(_, v)| has_content(v))
                    .filter_map(|(k, _)| SectionKey::new(k.as_str()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn section_timestamp(&self, section: &SectionKey) -> Option<Timestamp> {
        self.section_timestamps.get(section).copied()
    }

    pub fn section_timestamps(&self) -> &BTreeMap<SectionKey, Timestamp> {
        &self.section_timestamps
    }

    pub fn set_section_timestamp(&mut self, section: SectionKey, at: Timestamp) {
        self.section_timestamps.insert(section, at);
    }

    /// Records a write to a section: a fresh monotonic timestamp, and the
    /// section no longer carries a stale warning.
    pub fn touch_section(&mut self, section: &SectionKey) -> Timestamp {
        let at = Timestamp::after(self.section_timestamp(section));
        self.section_timestamps.insert(section.clone(), at);
        self.stale_sections.remove(section);
        at
    }

    /// Drops a section's data, timestamp and warning.
    pub fn clear_section(&mut self, section: &SectionKey) {
        if let Some(map) = self.data.as_object_mut() {
            map.remove(section.as_str());
        }
        self.section_timestamps.remove(section);
        self.stale_sections.remove(section);
    }

    pub fn mark_stale(&mut self, section: SectionKey) {
        self.stale_sections.insert(section);
    }

    pub fn clear_stale(&mut self, section: &SectionKey) -> bool {
        self.stale_sections.remove(section)
    }

    pub fn is_stale(&self, section: &SectionKey) -> bool {
        self.stale_sections.contains(section)
    }

    pub fn stale_sections(&self) -> &BTreeSet<SectionKey> {
        &self.stale_sections
    }

    /// Puts back a section's timestamp and warning as they were before a
    /// write that did not happen.
    pub fn restore_section_metadata(
        &mut self,
        section: &SectionKey,
        timestamp: Option<Timestamp>,
        stale: bool,
    ) {
        match timestamp {
            Some(at) => self.section_timestamps.insert(section.clone(), at),
            None => self.section_timestamps.remove(section),
        };
        if stale {
            self.stale_sections.insert(section.clone());
        } else {
            self.stale_sections.remove(section);
        }
    }

    /// Applies a patch in place, skipping the ops for which `skip` is true.
    pub fn apply_patch<F>(&mut self, patch: &DocumentPatch, skip: F) -> ModelResult<()>
    where
        F: Fn(&Address) -> bool,
    {
        for section in &patch.cleared_sections {
            self.clear_section(section);
        }
        for op in &patch.ops {
            if skip(&op.address) {
                continue;
            }
            match &op.value {
                Some(value) => {
                    self.set_value(&op.address, value.clone())?;
                }
                None => {
                    self.remove_value(&op.address)?;
                }
            }
        }
        if let Some(timestamps) = &patch.section_timestamps {
            self.section_timestamps = timestamps.clone();
        }
        if let Some(stale) = &patch.stale_sections {
            self.stale_sections = stale.clone();
        }
        Ok(())
    }

    /// The patch that turns an empty document's metadata into this one's.
    pub fn metadata_patch(&self) -> DocumentPatch {
        DocumentPatch {
            section_timestamps: Some(self.section_timestamps.clone()),
            stale_sections: Some(self.stale_sections.clone()),
            ..DocumentPatch::default()
        }
    }
}

impl ValueSource for NodeDocument {
    fn value(&self, address: &Address) -> Option<&Value> {
        self.value_at(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_handles_pointer_metacharacters() {
        assert_eq!(escape_segment("a/b~c"), "a~1b~0c");
    }

    #[test]
    fn section_is_unwritten_only_when_every_op_was_rejected() {
        let op = |a: &str| PatchOp {
            address: Address::parse(a).unwrap(),
            value: Some(Value::Null),
        };
        let patch = DocumentPatch {
            ops: vec![op("n#a.x.value"), op("n#a.y.value"), op("n#b.x.value")],
            ..DocumentPatch::default()
        };
        let rejected = BTreeMap::from([
            (Address::parse("n#a.x.value").unwrap(), "no".to_string()),
            (Address::parse("n#b.x.value").unwrap(), "no".to_string()),
        ]);
        let unwritten = patch.unwritten_sections(&rejected);
        assert_eq!(unwritten, BTreeSet::from([SectionKey::new("b").unwrap()]));
    }
}
