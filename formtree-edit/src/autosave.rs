//! Debounced autosave worker.
//!
//! The draft store never performs I/O. A background task owns the store
//! connection and reacts to [`AutosaveCommand`]s:
//!
//! ```text
//! set()      ──Touched──▶ (re)arm debounce timer ──fires──▶ save dirty drafts
//! save_all() ──Flush────▶ save dirty drafts now, reply with the report
//! policies   ──Persist──▶ write a metadata patch
//! discard    ──Cancel───▶ disarm the timer
//! ```
//!
//! A burst of edits inside the debounce window produces exactly one save.
//! Commands are handled one at a time, so saves never overlap.

use crate::error::{EditError, EditResult};
use crate::state::{SharedState, lock};
use formtree_model::{Address, DocumentPatch, PatchOp};
use formtree_store::DocumentStore;
use formtree_types::SectionKey;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// What a completed save wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveReport {
    /// Addresses persisted, in address order.
    pub saved: Vec<Address>,
    /// Sections whose timestamp was refreshed and warning cleared.
    pub sections: Vec<SectionKey>,
    /// Document revision after the save.
    pub revision: u64,
}

impl SaveReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

pub(crate) enum AutosaveCommand {
    Touched,
    Flush(oneshot::Sender<EditResult<SaveReport>>),
    Persist(DocumentPatch, oneshot::Sender<EditResult<u64>>),
    Cancel,
    Shutdown,
}

/// Handle to the worker task.
pub(crate) struct AutosaveHandle {
    tx: mpsc::Sender<AutosaveCommand>,
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    /// Spawns the worker. With `debounce` set to `None` only explicit
    /// flushes save.
    pub fn spawn(
        state: SharedState,
        store: Arc<dyn DocumentStore>,
        debounce: Option<Duration>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = AutosaveWorker {
            state,
            store,
            debounce,
            rx,
        };
        let task = tokio::spawn(worker.run());
        Self { tx, task }
    }

    /// Signals an edit. Never blocks; a full queue already holds a pending
    /// signal.
    pub fn touched(&self) {
        if let Err(e) = self.tx.try_send(AutosaveCommand::Touched) {
            debug!("autosave signal dropped: {e}");
        }
    }

    /// Disarms a pending autosave.
    pub fn cancel(&self) {
        if let Err(e) = self.tx.try_send(AutosaveCommand::Cancel) {
            debug!("autosave cancel dropped: {e}");
        }
    }

    /// Saves every dirty draft now.
    pub async fn flush(&self) -> EditResult<SaveReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AutosaveCommand::Flush(reply))
            .await
            .map_err(|_| EditError::ChannelClosed)?;
        rx.await.map_err(|_| EditError::ChannelClosed)?
    }

    /// Writes a patch through the worker, after any save already queued.
    /// Returns the new document revision.
    pub async fn persist(&self, patch: DocumentPatch) -> EditResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AutosaveCommand::Persist(patch, reply))
            .await
            .map_err(|_| EditError::ChannelClosed)?;
        rx.await.map_err(|_| EditError::ChannelClosed)?
    }

    /// Stops the worker without saving and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.tx.send(AutosaveCommand::Cancel).await;
        let _ = self.tx.send(AutosaveCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("autosave worker ended abnormally: {e}");
        }
    }
}

struct AutosaveWorker {
    state: SharedState,
    store: Arc<dyn DocumentStore>,
    debounce: Option<Duration>,
    rx: mpsc::Receiver<AutosaveCommand>,
}

impl AutosaveWorker {
    async fn run(mut self) {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    None | Some(AutosaveCommand::Shutdown) => break,
                    Some(AutosaveCommand::Touched) => {
                        if let Some(debounce) = self.debounce {
                            deadline = Some(Instant::now() + debounce);
                        }
                    }
                    Some(AutosaveCommand::Cancel) => deadline = None,
                    Some(AutosaveCommand::Flush(reply)) => {
                        deadline = None;
                        let result = save_pending(&self.state, self.store.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    Some(AutosaveCommand::Persist(patch, reply)) => {
                        let result = persist(&self.state, self.store.as_ref(), &patch).await;
                        let _ = reply.send(result);
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.autosave().await;
                }
            }
        }
        debug!("autosave worker stopped");
    }

    async fn autosave(&self) {
        let gate = match lock(&self.state) {
            Ok(state) => {
                let dirty = state.drafts.dirty(None);
                state.validation.ensure_can_save(dirty.iter().map(|e| &e.address))
            }
            Err(e) => Err(e),
        };
        if let Err(e) = gate {
            debug!("autosave skipped: {e}");
            return;
        }
        match save_pending(&self.state, self.store.as_ref()).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => debug!(saved = report.saved.len(), revision = report.revision, "autosaved"),
            Err(e) => warn!("autosave failed: {e}"),
        }
    }
}

/// Saves every dirty draft.
///
/// Values are merged into the local document before the store is called
/// and rolled back address by address if the store rejects them. Every
/// section written gets a fresh timestamp and loses its stale warning,
/// except a section whose values were all rejected. A failure of the whole
/// batch rolls back every value and the section metadata. Failed drafts
/// stay dirty and carry the error.
pub(crate) async fn save_pending(
    state: &SharedState,
    store: &dyn DocumentStore,
) -> EditResult<SaveReport> {
    let (node_id, batch, previous, prior_metadata, mut failed, sections, patch) = {
        let mut st = lock(state)?;
        let batch = st.drafts.begin_save();
        if batch.is_empty() {
            return Ok(SaveReport {
                revision: st.document.revision,
                ..SaveReport::default()
            });
        }
        let prior_metadata = st.document.metadata_patch();
        let mut previous: Vec<(Address, Option<Value>)> = Vec::new();
        let mut failed: BTreeMap<Address, String> = BTreeMap::new();
        let mut sections: BTreeSet<SectionKey> = BTreeSet::new();
        let mut ops = Vec::new();
        for (address, value) in batch.values() {
            match st.document.set_value(address, value.clone()) {
                Ok(prior) => {
                    previous.push((address.clone(), prior));
                    ops.push(PatchOp {
                        address: address.clone(),
                        value: Some(value.clone()),
                    });
                    sections.extend(address.section_key());
                }
                Err(e) => {
                    failed.insert(address.clone(), e.to_string());
                }
            }
        }
        for section in &sections {
            st.document.touch_section(section);
        }
        let patch = DocumentPatch {
            ops,
            ..st.document.metadata_patch()
        };
        (
            st.node_id,
            batch,
            previous,
            prior_metadata,
            failed,
            sections,
            patch,
        )
    };

    debug!(node = %node_id, ops = patch.ops.len(), "saving drafts");
    let outcome = if patch.ops.is_empty() {
        Err(formtree_store::StoreError::Internal(
            "no address could be written".to_string(),
        ))
    } else {
        store.save(node_id, &patch).await
    };

    let mut st = lock(state)?;
    match outcome {
        Ok(outcome) => {
            for (address, prior) in &previous {
                if outcome.rejected.contains_key(address) {
                    restore(&mut st.document, address, prior.clone());
                }
            }
            let unwritten = patch.unwritten_sections(&outcome.rejected);
            for section in &unwritten {
                let timestamp = prior_metadata
                    .section_timestamps
                    .as_ref()
                    .and_then(|m| m.get(section))
                    .copied();
                let stale = prior_metadata
                    .stale_sections
                    .as_ref()
                    .is_some_and(|set| set.contains(section));
                st.document.restore_section_metadata(section, timestamp, stale);
            }
            failed.extend(outcome.rejected);
            st.document.revision = outcome.revision;
            st.drafts.complete_save(&batch, &failed);
            if !failed.is_empty() {
                warn!(node = %node_id, failed = failed.len(), "save partially rejected");
                return Err(EditError::SaveFailed {
                    reason: "some addresses were rejected".to_string(),
                    failed,
                });
            }
            info!(node = %node_id, saved = batch.len(), revision = outcome.revision, "drafts saved");
            Ok(SaveReport {
                saved: batch.addresses().cloned().collect(),
                sections: sections.difference(&unwritten).cloned().collect(),
                revision: outcome.revision,
            })
        }
        Err(e) => {
            for (address, prior) in previous {
                restore(&mut st.document, &address, prior);
            }
            if let Err(err) = st.document.apply_patch(&prior_metadata, |_| false) {
                warn!("failed to restore section metadata: {err}");
            }
            let reason = e.to_string();
            st.drafts.fail_save(&batch, &reason);
            warn!(node = %node_id, "save failed: {reason}");
            let failed = batch
                .addresses()
                .map(|a| {
                    let why = failed.get(a).cloned().unwrap_or_else(|| reason.clone());
                    (a.clone(), why)
                })
                .collect();
            Err(EditError::SaveFailed { reason, failed })
        }
    }
}

fn restore(document: &mut formtree_model::NodeDocument, address: &Address, prior: Option<Value>) {
    let result = match prior {
        Some(value) => document.set_value(address, value).map(|_| ()),
        None => document.remove_value(address).map(|_| ()),
    };
    if let Err(e) = result {
        warn!(%address, "rollback failed: {e}");
    }
}

/// Writes a metadata or clearing patch.
async fn persist(
    state: &SharedState,
    store: &dyn DocumentStore,
    patch: &DocumentPatch,
) -> EditResult<u64> {
    let node_id = lock(state)?.node_id;
    let outcome = store.save(node_id, patch).await?;
    let mut st = lock(state)?;
    st.document.revision = outcome.revision;
    Ok(outcome.revision)
}
