//! Document store collaborators for formtree.
//!
//! The editor never touches storage directly; it goes through
//! [`DocumentStore`]:
//! - `load(node)` returns the persisted [`NodeDocument`], if any
//! - `put(document)` creates or replaces a document
//! - `save(node, patch)` applies a [`DocumentPatch`] and reports which
//!   addresses were rejected
//!
//! A save either fails as a whole ([`StoreError`]) or succeeds with a
//! [`PatchOutcome`] listing per-address rejections, so callers can roll
//! back exactly the addresses that did not persist.
//!
//! Two implementations ship here: [`MemoryDocumentStore`] (with failure
//! injection for tests) and [`SqliteDocumentStore`].

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use async_trait::async_trait;
use formtree_model::{Address, DocumentPatch, NodeDocument};
use formtree_types::NodeId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of an applied patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Document revision after the patch.
    pub revision: u64,
    /// Addresses that were not written, with the reason.
    pub rejected: BTreeMap<Address, String>,
}

impl PatchOutcome {
    /// True if every op of the patch was written.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Persistence for node documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Loads a node's document.
    async fn load(&self, node_id: NodeId) -> StoreResult<Option<NodeDocument>>;

    /// Creates or replaces a document.
    async fn put(&self, document: NodeDocument) -> StoreResult<()>;

    /// Applies a patch to an existing document.
    async fn save(&self, node_id: NodeId, patch: &DocumentPatch) -> StoreResult<PatchOutcome>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn load(&self, node_id: NodeId) -> StoreResult<Option<NodeDocument>> {
        (**self).load(node_id).await
    }

    async fn put(&self, document: NodeDocument) -> StoreResult<()> {
        (**self).put(document).await
    }

    async fn save(&self, node_id: NodeId, patch: &DocumentPatch) -> StoreResult<PatchOutcome> {
        (**self).save(node_id, patch).await
    }
}

/// Applies a patch to a copy of `document`, rejecting ops that address
/// another node or that appear in `refused`. A section none of whose ops
/// were accepted keeps its stored timestamp and warning. The copy replaces
/// the original only if the whole patch applied.
pub(crate) fn apply_checked(
    document: &mut NodeDocument,
    patch: &DocumentPatch,
    refused: &BTreeMap<Address, String>,
) -> StoreResult<PatchOutcome> {
    let mut rejected = BTreeMap::new();
    for address in patch.addresses() {
        if address.node_path() != document.path.as_str() {
            rejected.insert(address.clone(), "address belongs to another node".to_string());
        } else if let Some(reason) = refused.get(address) {
            rejected.insert(address.clone(), reason.clone());
        }
    }

    let mut next = document.clone();
    next.apply_patch(patch, |a| rejected.contains_key(a))?;
    for section in patch.unwritten_sections(&rejected) {
        next.restore_section_metadata(
            &section,
            document.section_timestamp(&section),
            document.is_stale(&section),
        );
    }
    next.revision = document.revision.saturating_add(1);
    *document = next;

    Ok(PatchOutcome {
        revision: document.revision,
        rejected,
    })
}
