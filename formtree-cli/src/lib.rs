//! Reports behind the `formtree` command.

use anyhow::{Context, Result};
use formtree_edit::invalidation::stale_warnings;
use formtree_edit::{EditorConfig, SectionState, compute_affected_sections};
use formtree_model::{
    AddressMap, ContentTree, NodeDocument, collect_field_refs, structural_defects,
};
use formtree_types::{NodePath, SectionKey, Timestamp};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Every address of a tree, plus what could not be addressed.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AddressReport {
    pub node: String,
    pub addresses: Vec<String>,
    pub field_refs: Vec<String>,
    pub defects: Vec<String>,
}

/// Sections an edit would leave stale.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AffectedReport {
    pub section: String,
    pub affected: Vec<String>,
    pub stale: Vec<String>,
}

pub fn load_tree(path: &Path) -> Result<ContentTree> {
    let source =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    ContentTree::from_json_str(&source).with_context(|| format!("parsing {}", path.display()))
}

pub fn load_document(path: &Path) -> Result<NodeDocument> {
    let source =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("parsing {}", path.display()))
}

/// Resolves the addresses of `tree` under `node`.
///
/// Unresolvable fields and duplicate siblings are listed as defects; the
/// first of two fields sharing an address keeps it.
pub fn address_report(tree: &ContentTree, node: &NodePath) -> AddressReport {
    let map = AddressMap::build(node, tree);
    debug!(node = %node, fields = map.len(), "addresses resolved");
    AddressReport {
        node: node.to_string(),
        addresses: map.addresses().map(ToString::to_string).collect(),
        field_refs: collect_field_refs(tree),
        defects: structural_defects(tree)
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

/// Structural defects of a tree, one line each.
pub fn check_report(tree: &ContentTree) -> Vec<String> {
    structural_defects(tree)
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Sections affected by editing `section` of `document` now.
pub fn affected_report(
    document: &NodeDocument,
    section: &SectionKey,
    config: &EditorConfig,
) -> Result<AffectedReport> {
    let pipeline = config.pipeline()?;
    let edit_at = Timestamp::after(document.section_timestamp(section));
    let affected = compute_affected_sections(&pipeline, section, edit_at, |s| {
        SectionState::of(document, s)
    })?;
    Ok(AffectedReport {
        section: section.to_string(),
        affected: affected.iter().map(ToString::to_string).collect(),
        stale: stale_warnings(document)
            .iter()
            .map(|w| w.section.to_string())
            .collect(),
    })
}
