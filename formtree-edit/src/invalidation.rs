//! Edit-impact detection across progressive sections.
//!
//! Sections form a fixed pipeline (`input -> stage1 -> stage2 -> ...`) in
//! which every section is derived from the ones before it. Editing section
//! `S` may leave later sections stale. A later section `L` is affected when
//! it holds data and is not provably newer than the edit:
//!
//! - if `S` has no timestamp, every later section with data is affected
//! - otherwise `L` is affected unless its timestamp is strictly after the
//!   instant the edit is committed at
//!
//! The root section is compared against every other section.
//!
//! Callers commit edits at `Timestamp::after(S's timestamp)`, which is the
//! wall clock unless `S` is already dated later. Against that instant only
//! a section stamped in the future escapes, so in practice every later
//! section holding data is affected.
//!
//! Detection is side-effect free. Applying an [`EditPolicy`] mutates the
//! document and returns the patch that persists the change.

use crate::error::{EditError, EditResult};
use formtree_model::{DocumentPatch, NodeDocument};
use formtree_types::{SectionKey, Timestamp};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// The ordered progressive sections of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    root: SectionKey,
    order: Vec<SectionKey>,
}

impl Pipeline {
    /// Builds a pipeline. The root is placed first if `order` omits it.
    pub fn new(root: SectionKey, order: Vec<SectionKey>) -> EditResult<Self> {
        let mut seen = BTreeSet::new();
        for section in &order {
            if !seen.insert(section) {
                return Err(EditError::Config(format!(
                    "section '{section}' appears twice in the pipeline"
                )));
            }
        }
        let mut order = order;
        if !order.contains(&root) {
            order.insert(0, root.clone());
        }
        Ok(Self { root, order })
    }

    pub fn root(&self) -> &SectionKey {
        &self.root
    }

    pub fn sections(&self) -> &[SectionKey] {
        &self.order
    }

    pub fn position(&self, section: &SectionKey) -> Option<usize> {
        self.order.iter().position(|s| s == section)
    }

    /// Sections that may depend on `section`.
    pub fn downstream(&self, section: &SectionKey) -> EditResult<Vec<&SectionKey>> {
        if section == &self.root {
            return Ok(self.order.iter().filter(|s| *s != section).collect());
        }
        let position = self
            .position(section)
            .ok_or_else(|| EditError::UnknownSection(section.to_string()))?;
        Ok(self.order[position + 1..].iter().collect())
    }
}

/// What a section looked like when impact was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionState {
    pub has_data: bool,
    pub timestamp: Option<Timestamp>,
}

impl SectionState {
    pub fn of(document: &NodeDocument, section: &SectionKey) -> Self {
        Self {
            has_data: document.section_has_data(section),
            timestamp: document.section_timestamp(section),
        }
    }
}

/// Sections affected by editing `section` at `edit_at`.
///
/// Pure: the result depends only on the pipeline, the section states and
/// `edit_at`.
pub fn compute_affected_sections<F>(
    pipeline: &Pipeline,
    section: &SectionKey,
    edit_at: Timestamp,
    state_of: F,
) -> EditResult<Vec<SectionKey>>
where
    F: Fn(&SectionKey) -> SectionState,
{
    let edited = state_of(section);
    let affected: Vec<SectionKey> = pipeline
        .downstream(section)?
        .into_iter()
        .filter(|later| {
            let state = state_of(later);
            if !state.has_data {
                return false;
            }
            match (edited.timestamp, state.timestamp) {
                (None, _) | (Some(_), None) => true,
                (Some(_), Some(at)) => !at.is_after(&edit_at),
            }
        })
        .cloned()
        .collect();
    debug!(section = %section, affected = affected.len(), "computed affected sections");
    Ok(affected)
}

/// How to proceed with an edit that affects later sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPolicy {
    /// Abandon the edit.
    Discard,
    /// Clear the affected sections, then allow the edit.
    DeleteAndEdit,
    /// Allow the edit and flag the affected sections as possibly stale.
    Override,
}

/// Advisory badge on a section that may be inconsistent with upstream
/// edits. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaleWarning {
    pub section: SectionKey,
}

impl fmt::Display for StaleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "section '{}' may be inconsistent with upstream edits",
            self.section
        )
    }
}

/// Warnings for every stale section of a document, in key order.
pub fn stale_warnings(document: &NodeDocument) -> Vec<StaleWarning> {
    document
        .stale_sections()
        .iter()
        .map(|s| StaleWarning { section: s.clone() })
        .collect()
}

/// Applies a policy to the document. Returns the patch persisting the
/// change, or `None` when nothing is written.
pub fn apply_policy(
    document: &mut NodeDocument,
    affected: &[SectionKey],
    policy: EditPolicy,
) -> Option<DocumentPatch> {
    match policy {
        EditPolicy::Discard => None,
        EditPolicy::DeleteAndEdit => {
            for section in affected {
                document.clear_section(section);
            }
            info!(cleared = affected.len(), "affected sections cleared");
            Some(DocumentPatch {
                cleared_sections: affected.iter().cloned().collect(),
                ..document.metadata_patch()
            })
        }
        EditPolicy::Override => {
            for section in affected {
                document.mark_stale(section.clone());
            }
            info!(flagged = affected.len(), "affected sections flagged stale");
            Some(document.metadata_patch())
        }
    }
}

/// Records that a section was regenerated: fresh timestamp, warning
/// cleared.
pub fn mark_regenerated(document: &mut NodeDocument, section: &SectionKey) -> DocumentPatch {
    document.touch_section(section);
    document.metadata_patch()
}
