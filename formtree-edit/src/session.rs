//! The editing session of one node.
//!
//! [`EditSession`] ties the pieces together for a UI layer: it loads the
//! node document, resolves every address of the content tree, seeds the
//! draft store and runs the autosave worker. UI code reads and writes
//! values through addresses only.

use crate::autosave::{AutosaveHandle, SaveReport};
use crate::config::EditorConfig;
use crate::draft::{ChangeBatch, DraftEntry, DraftStore};
use crate::error::{EditError, EditResult};
use crate::instances;
use crate::invalidation::{self, EditPolicy, Pipeline, SectionState, StaleWarning};
use crate::invoker::{InstanceHook, Invoker, LocalInstances, NoInvoker};
use crate::state::{EditorState, SharedState, lock};
use crate::validation::{ValidationMachine, ValidationResult, ValidationStatus, Verdict};
use formtree_model::address::VALUE_SEGMENT;
use formtree_model::render::{self, FieldRenderer, RenderNode};
use formtree_model::{
    Address, AddressError, AddressMap, AddressPrefix, ContentTree, DocumentPatch, FieldRegistry,
    FieldRules, ModelError, NodeDocument, PatchOp, resolve_address,
};
use formtree_store::DocumentStore;
use formtree_types::{InstanceId, LocalizedText, NodeId, NodePath, SectionKey, Timestamp};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DocumentStore>,
    pub registry: Arc<dyn FieldRegistry>,
    pub invoker: Arc<dyn Invoker>,
    pub instances: Arc<dyn InstanceHook>,
}

impl Collaborators {
    /// A store and a registry; no remote functions, instance changes kept
    /// local.
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<dyn FieldRegistry>) -> Self {
        Self {
            store,
            registry,
            invoker: Arc::new(NoInvoker),
            instances: Arc::new(LocalInstances),
        }
    }

    #[must_use]
    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = invoker;
        self
    }

    #[must_use]
    pub fn with_instance_hook(mut self, hook: Arc<dyn InstanceHook>) -> Self {
        self.instances = hook;
        self
    }
}

/// An open editing session.
pub struct EditSession {
    state: SharedState,
    collaborators: Collaborators,
    pipeline: Pipeline,
    autosave: AutosaveHandle,
}

impl EditSession {
    /// Opens a node for editing. A node without a persisted document gets
    /// an empty one.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn open(
        node_id: NodeId,
        path: NodePath,
        tree: ContentTree,
        collaborators: Collaborators,
        config: &EditorConfig,
    ) -> EditResult<Self> {
        let pipeline = config.pipeline()?;
        let document = match collaborators.store.load(node_id).await? {
            Some(document) => document,
            None => {
                let document = NodeDocument::new(node_id, path.clone());
                collaborators.store.put(document.clone()).await?;
                debug!(node = %path, "created empty document");
                document
            }
        };
        if document.path != path {
            return Err(ModelError::NodeMismatch {
                address_node: path.to_string(),
                document_node: document.path,
            }
            .into());
        }

        let map = AddressMap::build(&path, &tree);
        for unresolved in map.unresolved() {
            warn!(node = %path, scope = %unresolved.scope, error = %unresolved.error, "field address unresolved");
        }
        let validation = ValidationMachine::new(&path, config.validation_units())?;
        let mut state = EditorState {
            node_id,
            path,
            tree,
            map,
            document,
            drafts: DraftStore::new(),
            validation,
        };
        let seed = state.persisted_values(collaborators.registry.as_ref());
        state.drafts.seed(seed);
        info!(node = %state.path, fields = state.map.len(), "edit session opened");

        let state: SharedState = Arc::new(Mutex::new(state));
        let debounce = config.autosave.enabled.then(|| config.debounce());
        let autosave = AutosaveHandle::spawn(
            Arc::clone(&state),
            Arc::clone(&collaborators.store),
            debounce,
            config.max_pending_autosaves,
        );
        Ok(Self {
            state,
            collaborators,
            pipeline,
            autosave,
        })
    }

    fn lock(&self) -> EditResult<MutexGuard<'_, EditorState>> {
        lock(&self.state)
    }

    fn ensure_node(st: &EditorState, address: &Address) -> EditResult<()> {
        if address.node_path() != st.path.as_str() {
            return Err(AddressError::Malformed {
                address: address.to_string(),
                reason: format!("address does not belong to node '{}'", st.path),
            }
            .into());
        }
        Ok(())
    }

    // ── Addressing ──────────────────────────────────────────────

    pub fn node_path(&self) -> EditResult<NodePath> {
        Ok(self.lock()?.path.clone())
    }

    /// Canonical address of a field in this node.
    pub fn resolve_address(
        &self,
        section_path: &str,
        instance: Option<InstanceId>,
        field_ref: &str,
    ) -> EditResult<Address> {
        let st = self.lock()?;
        Ok(resolve_address(&st.path, section_path, instance, field_ref)?)
    }

    /// Every resolved address, in tree order.
    pub fn addresses(&self) -> EditResult<Vec<Address>> {
        Ok(self.lock()?.map.addresses().cloned().collect())
    }

    // ── Values ──────────────────────────────────────────────────

    /// Current value of an address: draft first, then persisted.
    pub fn get(&self, address: &Address) -> EditResult<Option<Value>> {
        Ok(self.lock()?.drafts.get(address).cloned())
    }

    /// Draft entry of an address, if it has unsaved state.
    pub fn entry(&self, address: &Address) -> EditResult<Option<DraftEntry>> {
        Ok(self.lock()?.drafts.entry(address).cloned())
    }

    /// Writes a value. Resets the validation of every unit covering the
    /// address and arms the autosave timer. Returns false if the value was
    /// already current.
    pub fn set(&self, address: &Address, value: Value) -> EditResult<bool> {
        let mut st = self.lock()?;
        Self::ensure_node(&st, address)?;
        if !st.map.contains(address) {
            debug!(%address, "writing address outside the content tree");
        }
        let changed = st.drafts.set(address.clone(), value);
        if changed {
            st.validation.content_changed([address]);
            drop(st);
            self.autosave.touched();
        }
        Ok(changed)
    }

    /// Writes several values with one change notification. Returns the
    /// addresses whose value changed.
    pub fn set_many(&self, values: BTreeMap<Address, Value>) -> EditResult<Vec<Address>> {
        let mut st = self.lock()?;
        for address in values.keys() {
            Self::ensure_node(&st, address)?;
        }
        let changed = st.drafts.set_many(values);
        if !changed.is_empty() {
            st.validation.content_changed(&changed);
            drop(st);
            self.autosave.touched();
        }
        Ok(changed)
    }

    /// Current `(address, value)` pairs, optionally scoped.
    pub fn entries(&self, prefix: Option<&AddressPrefix>) -> EditResult<Vec<(Address, Value)>> {
        Ok(self.lock()?.drafts.entries(prefix))
    }

    /// Addresses with unsaved edits.
    pub fn dirty_addresses(&self) -> EditResult<Vec<Address>> {
        Ok(self
            .lock()?
            .drafts
            .dirty(None)
            .into_iter()
            .map(|e| e.address.clone())
            .collect())
    }

    pub fn subscribe(&self) -> EditResult<broadcast::Receiver<ChangeBatch>> {
        Ok(self.lock()?.drafts.subscribe())
    }

    /// Saves every dirty draft now.
    ///
    /// Rejected with [`EditError::ValidationRequired`] unless every
    /// validation unit covering a dirty address is `valid`.
    pub async fn save_all(&self) -> EditResult<SaveReport> {
        {
            let st = self.lock()?;
            let dirty = st.drafts.dirty(None);
            st.validation.ensure_can_save(dirty.iter().map(|e| &e.address))?;
        }
        self.autosave.flush().await
    }

    /// Reverts drafts to the persisted values. Without a prefix the
    /// pending autosave is cancelled too.
    pub fn discard_all(&self, prefix: Option<&AddressPrefix>) -> EditResult<Vec<Address>> {
        let mut st = self.lock()?;
        let discarded = st.drafts.discard_all(prefix);
        st.validation.content_changed(&discarded);
        drop(st);
        if prefix.is_none() {
            self.autosave.cancel();
        }
        Ok(discarded)
    }

    /// Reloads the document from the store and re-seeds the drafts.
    /// Unsaved edits survive.
    pub async fn reload(&self) -> EditResult<()> {
        let node_id = self.lock()?.node_id;
        let Some(document) = self.collaborators.store.load(node_id).await? else {
            return Err(formtree_store::StoreError::NotFound(node_id).into());
        };
        let mut st = self.lock()?;
        st.document = document;
        let seed = st.persisted_values(self.collaborators.registry.as_ref());
        st.drafts.seed(seed);
        Ok(())
    }

    // ── Collections ─────────────────────────────────────────────

    /// Adds an instance to the collection at `scope`. Returns `None` when
    /// the collection is already at its maximum.
    pub async fn add_instance(&self, scope: &str) -> EditResult<Option<InstanceId>> {
        let added = instances::add_instance(
            &self.state,
            self.collaborators.instances.as_ref(),
            scope,
        )
        .await?;
        if let Some(id) = added {
            let mut st = self.lock()?;
            let prefix = AddressPrefix::instance(&st.path, scope, id)?;
            let registry = self.collaborators.registry.as_ref();
            let defaults: Vec<(Address, Value)> = st
                .map
                .fields_under(&prefix)
                .filter_map(|f| {
                    let entry = registry.entry(&f.field_ref).ok()?;
                    Some((f.address.clone(), entry.default_value.clone()?))
                })
                .collect();
            st.drafts.seed_missing(defaults);
        }
        Ok(added)
    }

    /// Removes an instance. Returns false when the collection is already
    /// at its minimum. The instance's drafts are dropped and its persisted
    /// values deleted, so a later instance reusing the id starts empty.
    /// If the deletion cannot be persisted the instance stays removed, its
    /// values are kept locally as the store still holds them, and the
    /// error is returned.
    pub async fn remove_instance(&self, scope: &str, id: InstanceId) -> EditResult<bool> {
        let Some(torn_down) = instances::remove_instance(
            &self.state,
            self.collaborators.instances.as_ref(),
            scope,
            id,
        )
        .await?
        else {
            return Ok(false);
        };

        let (patch, removed) = {
            let mut st = self.lock()?;
            let mut ops = Vec::new();
            let mut removed = Vec::new();
            for address in &torn_down {
                if let Some(prior) = st.document.remove_value(address)? {
                    ops.push(PatchOp {
                        address: address.clone(),
                        value: None,
                    });
                    removed.push((address.clone(), prior));
                }
            }
            let patch = DocumentPatch {
                ops,
                ..DocumentPatch::default()
            };
            (patch, removed)
        };
        if patch.ops.is_empty() {
            return Ok(true);
        }
        if let Err(e) = self.autosave.persist(patch).await {
            let mut st = self.lock()?;
            for (address, prior) in &removed {
                st.document.set_value(address, prior.clone())?;
            }
            st.drafts.seed_missing(removed);
            warn!(scope, instance = %id, "instance values not deleted: {e}");
            return Err(e);
        }
        Ok(true)
    }

    /// Moves an instance in display order (0-based positions).
    pub fn reorder_instance(&self, scope: &str, from: usize, to: usize) -> EditResult<()> {
        instances::reorder_instance(&self.state, scope, from, to)
    }

    /// Instance ids of a collection in display order.
    pub fn instance_ids(&self, scope: &str) -> EditResult<Vec<InstanceId>> {
        let st = self.lock()?;
        st.tree
            .find_collection(scope)
            .map(|c| c.instance_ids())
            .ok_or_else(|| EditError::UnknownCollection(scope.to_string()))
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validation_status(&self, unit: &str) -> EditResult<ValidationStatus> {
        self.lock()?.validation.status(unit)
    }

    pub fn validation_result(&self, unit: &str) -> EditResult<ValidationResult> {
        Ok(self.lock()?.validation.result(unit)?.clone())
    }

    /// Applies `edits`, then validates a unit.
    ///
    /// Local field rules run first; if any fails the unit is `invalid`
    /// without calling the remote validator. An `invalid` verdict is
    /// returned as [`EditError::ValidationRejected`]. A verdict arriving
    /// after the unit's content changed is dropped and the current result
    /// returned.
    pub async fn validate(
        &self,
        unit: &str,
        edits: BTreeMap<Address, Value>,
    ) -> EditResult<ValidationResult> {
        if !edits.is_empty() {
            self.set_many(edits)?;
        }

        let (ticket, local_reasons, function_ref, payload) = {
            let mut st = self.lock()?;
            let prefix = st.validation.prefix(unit)?.clone();
            let function_ref = st.validation.unit(unit)?.function_ref.clone();
            let registry = self.collaborators.registry.as_ref();
            let mut reasons = Vec::new();
            let mut values = Map::new();
            for field in st.map.fields_under(&prefix) {
                let value = st.drafts.get(&field.address);
                reasons.extend(local_check(registry, &field.field_ref, field.required, value));
                values.insert(
                    relative_key(&prefix, &field.address),
                    value.cloned().unwrap_or(Value::Null),
                );
            }
            let payload = json!({
                "unit": unit,
                "node": st.path.as_str(),
                "values": values,
            });
            let ticket = st.validation.begin(unit)?;
            (ticket, reasons, function_ref, payload)
        };

        let verdict = if !local_reasons.is_empty() {
            debug!(unit, reasons = local_reasons.len(), "local rules failed");
            Verdict::invalid(local_reasons)
        } else if let Some(function_ref) = function_ref {
            let response = self
                .collaborators
                .invoker
                .invoke(&function_ref, payload)
                .await
                .map_err(EditError::Invoker)
                .and_then(|response| Verdict::from_response(&response));
            match response {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(unit, "validator failed: {e}");
                    self.lock()?.validation.abort(&ticket)?;
                    return Err(e);
                }
            }
        } else {
            Verdict::valid()
        };

        let mut st = self.lock()?;
        st.validation.complete(&ticket, verdict)?;
        let result = st.validation.result(unit)?.clone();
        if result.status == ValidationStatus::Invalid {
            return Err(EditError::ValidationRejected {
                unit: unit.to_string(),
                reasons: result.reasons,
                suggested_fix: result.suggested_fix,
            });
        }
        Ok(result)
    }

    /// Writes an `invalid` unit's suggested fix into the drafts. Keys are
    /// field refs, paths relative to the unit's scope, or full addresses;
    /// keys that match no field are skipped. Returns the changed
    /// addresses.
    pub fn apply_suggested_fix(&self, unit: &str) -> EditResult<Vec<Address>> {
        let mut st = self.lock()?;
        let prefix = st.validation.prefix(unit)?.clone();
        let fix = st.validation.take_suggested_fix(unit)?;
        let mut values = BTreeMap::new();
        for (key, value) in fix {
            match fix_address(&st.map, &prefix, &key) {
                Some(address) => {
                    values.insert(address, value);
                }
                None => warn!(unit, key = %key, "suggested fix key matches no field"),
            }
        }
        let changed = st.drafts.set_many(values);
        st.validation.content_changed(&changed);
        drop(st);
        if !changed.is_empty() {
            self.autosave.touched();
        }
        Ok(changed)
    }

    // ── Invalidation ────────────────────────────────────────────

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Sections that editing `section` now would leave stale.
    pub fn compute_affected_sections(&self, section: &SectionKey) -> EditResult<Vec<SectionKey>> {
        let st = self.lock()?;
        let edit_at = Timestamp::after(st.document.section_timestamp(section));
        invalidation::compute_affected_sections(&self.pipeline, section, edit_at, |s| {
            SectionState::of(&st.document, s)
        })
    }

    /// Resolves an edit of `section` that affects later sections.
    ///
    /// `Discard` drops the drafts of `section`; `DeleteAndEdit` clears the
    /// affected sections; `Override` flags them stale. Returns the affected
    /// sections. If the change cannot be persisted, the document and drafts
    /// are left as they were.
    pub async fn apply_edit_policy(
        &self,
        section: &SectionKey,
        policy: EditPolicy,
    ) -> EditResult<Vec<SectionKey>> {
        let affected = self.compute_affected_sections(section)?;
        let (patch, backup) = {
            let mut st = self.lock()?;
            if policy == EditPolicy::Discard {
                let prefix = AddressPrefix::section(&st.path, section);
                let discarded = st.drafts.discard_all(Some(&prefix));
                st.validation.content_changed(&discarded);
                info!(section = %section, discarded = discarded.len(), "edit discarded");
                return Ok(affected);
            }
            let backup = st.document.clone();
            let Some(patch) = invalidation::apply_policy(&mut st.document, &affected, policy)
            else {
                return Ok(affected);
            };
            (patch, backup)
        };
        if let Err(e) = self.autosave.persist(patch).await {
            let mut st = self.lock()?;
            let revision = st.document.revision;
            st.document = backup;
            st.document.revision = revision;
            warn!(section = %section, "edit policy not persisted: {e}");
            return Err(e);
        }
        if policy == EditPolicy::DeleteAndEdit {
            let mut st = self.lock()?;
            for cleared in &affected {
                let prefix = AddressPrefix::section(&st.path, cleared);
                let removed = st.drafts.remove_scope(&prefix);
                st.validation.content_changed(&removed);
            }
        }
        Ok(affected)
    }

    /// Records that `section` was regenerated, clearing its stale flag.
    pub async fn mark_regenerated(&self, section: &SectionKey) -> EditResult<()> {
        let patch = {
            let mut st = self.lock()?;
            invalidation::mark_regenerated(&mut st.document, section)
        };
        self.autosave.persist(patch).await?;
        info!(section = %section, "section regenerated");
        Ok(())
    }

    /// Advisory warnings for sections flagged stale.
    pub fn stale_warnings(&self) -> EditResult<Vec<StaleWarning>> {
        Ok(invalidation::stale_warnings(&self.lock()?.document))
    }

    // ── Snapshots & rendering ───────────────────────────────────

    /// The local copy of the node document.
    pub fn document(&self) -> EditResult<NodeDocument> {
        Ok(self.lock()?.document.clone())
    }

    /// The current content tree, instances included.
    pub fn tree(&self) -> EditResult<ContentTree> {
        Ok(self.lock()?.tree.clone())
    }

    /// Render plan of the current tree. Views borrow the registry.
    pub fn plan(&self) -> EditResult<Vec<RenderNode<'_>>> {
        let st = self.lock()?;
        Ok(render::plan(
            &st.path,
            &st.tree,
            &st.map,
            self.collaborators.registry.as_ref(),
        ))
    }

    /// Renders every field of the current tree, depth-first.
    pub fn render<F: FieldRenderer + ?Sized>(&self, renderer: &mut F) -> EditResult<Vec<F::Output>> {
        let plan = self.plan()?;
        Ok(render::render_all(renderer, &plan))
    }

    /// Stops the autosave worker. Pending debounced edits are not saved.
    pub async fn close(self) {
        if let Ok(st) = self.lock() {
            info!(node = %st.path, dirty = st.drafts.dirty(None).len(), "edit session closed");
        }
        self.autosave.shutdown().await;
    }
}

/// Rule violations of one field.
fn local_check(
    registry: &dyn FieldRegistry,
    field_ref: &str,
    required_by_tree: bool,
    value: Option<&Value>,
) -> Vec<LocalizedText> {
    match registry.entry(field_ref) {
        Ok(entry) => {
            let mut rules = entry.rules.clone();
            rules.required |= required_by_tree;
            rules.check(field_ref, value)
        }
        Err(_) if required_by_tree => FieldRules {
            required: true,
            ..FieldRules::default()
        }
        .check(field_ref, value),
        Err(_) => Vec::new(),
    }
}

/// Address relative to a unit prefix, without the value segment:
/// `node#chars.1.name.value` under `node#chars.1.` is `name`.
fn relative_key(prefix: &AddressPrefix, address: &Address) -> String {
    let rest = address
        .as_str()
        .strip_prefix(prefix.as_str())
        .unwrap_or(address.as_str());
    rest.strip_suffix(VALUE_SEGMENT)
        .and_then(|r| r.strip_suffix('.'))
        .unwrap_or(rest)
        .to_string()
}

fn fix_address(map: &AddressMap, prefix: &AddressPrefix, key: &str) -> Option<Address> {
    if let Ok(address) = Address::parse(key) {
        if prefix.matches(&address) && map.contains(&address) {
            return Some(address);
        }
    }
    if let Ok(address) = Address::parse(&format!("{}{key}.{VALUE_SEGMENT}", prefix.as_str())) {
        if map.contains(&address) {
            return Some(address);
        }
    }
    let mut by_ref = map.fields_under(prefix).filter(|f| f.field_ref == key);
    match (by_ref.next(), by_ref.next()) {
        (Some(field), None) => Some(field.address.clone()),
        _ => None,
    }
}
