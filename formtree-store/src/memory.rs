use crate::{DocumentStore, PatchOutcome, StoreError, StoreResult, apply_checked};
use async_trait::async_trait;
use formtree_model::{Address, DocumentPatch, NodeDocument};
use formtree_types::NodeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Default)]
struct Inner {
    documents: HashMap<NodeId, NodeDocument>,
    history: Vec<(NodeId, DocumentPatch)>,
    fail_next: usize,
    refused: BTreeMap<Address, String>,
}

/// In-memory document store.
///
/// Failures can be injected: whole-batch failures for the next N saves,
/// and per-address rejections. Every applied patch is recorded so tests
/// can count persisted writes.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    save_delay: Mutex<Option<Duration>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding one document.
    pub fn with_document(document: NodeDocument) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            inner.documents.insert(document.node_id, document);
        }
        store
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Internal(format!("memory store lock poisoned: {e}")))
    }

    /// Makes the next `count` saves fail as a whole.
    pub fn fail_next_saves(&self, count: usize) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_next = count;
        }
    }

    /// Rejects every future write to `address`.
    pub fn refuse_address(&self, address: Address, reason: impl Into<String>) {
        if let Ok(mut inner) = self.lock() {
            inner.refused.insert(address, reason.into());
        }
    }

    /// Accepts writes to every address again.
    pub fn clear_refusals(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.refused.clear();
        }
    }

    /// Delays every save, simulating a slow network.
    pub fn set_save_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.save_delay.lock() {
            *slot = delay;
        }
    }

    /// Number of patches applied so far.
    pub fn save_count(&self) -> usize {
        self.lock().map(|inner| inner.history.len()).unwrap_or_default()
    }

    /// Patches applied so far, oldest first.
    pub fn patches(&self) -> Vec<DocumentPatch> {
        self.lock()
            .map(|inner| inner.history.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Current stored copy of a document.
    pub fn document(&self, node_id: NodeId) -> Option<NodeDocument> {
        self.lock()
            .ok()
            .and_then(|inner| inner.documents.get(&node_id).cloned())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self, node_id: NodeId) -> StoreResult<Option<NodeDocument>> {
        Ok(self.lock()?.documents.get(&node_id).cloned())
    }

    async fn put(&self, document: NodeDocument) -> StoreResult<()> {
        self.lock()?.documents.insert(document.node_id, document);
        Ok(())
    }

    async fn save(&self, node_id: NodeId, patch: &DocumentPatch) -> StoreResult<PatchOutcome> {
        let delay = self.save_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock()?;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            warn!(node = %node_id, "injected save failure");
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let refused = inner.refused.clone();
        let document = inner
            .documents
            .get_mut(&node_id)
            .ok_or(StoreError::NotFound(node_id))?;
        let outcome = apply_checked(document, patch, &refused)?;
        inner.history.push((node_id, patch.clone()));
        debug!(
            node = %node_id,
            revision = outcome.revision,
            rejected = outcome.rejected.len(),
            "patch applied"
        );
        Ok(outcome)
    }
}
