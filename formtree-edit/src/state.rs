//! Shared editor state.
//!
//! The session and the autosave worker share one [`EditorState`] behind a
//! synchronous mutex. The lock is never held across an await point: every
//! async step copies what it needs out, releases the lock, awaits, and
//! locks again to record the outcome.

use crate::draft::DraftStore;
use crate::error::{EditError, EditResult};
use crate::validation::ValidationMachine;
use formtree_model::{Address, AddressMap, ContentTree, FieldRegistry, NodeDocument};
use formtree_types::{NodeId, NodePath};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type SharedState = Arc<Mutex<EditorState>>;

pub(crate) struct EditorState {
    pub node_id: NodeId,
    pub path: NodePath,
    pub tree: ContentTree,
    pub map: AddressMap,
    pub document: NodeDocument,
    pub drafts: DraftStore,
    pub validation: ValidationMachine,
}

impl EditorState {
    /// Recomputes the address map after the tree changed shape.
    pub fn rebuild_map(&mut self) {
        self.map = AddressMap::build(&self.path, &self.tree);
    }

    /// Persisted value of every resolved field, falling back to the
    /// registry default. Fields with neither are left out.
    pub fn persisted_values(&self, registry: &dyn FieldRegistry) -> Vec<(Address, Value)> {
        self.map
            .fields()
            .filter_map(|field| {
                let value = self.document.value_at(&field.address).cloned().or_else(|| {
                    registry
                        .entry(&field.field_ref)
                        .ok()
                        .and_then(|entry| entry.default_value.clone())
                })?;
                Some((field.address.clone(), value))
            })
            .collect()
    }
}

/// Locks the shared state.
pub(crate) fn lock(state: &Mutex<EditorState>) -> EditResult<MutexGuard<'_, EditorState>> {
    state.lock().map_err(|_| EditError::Poisoned)
}
