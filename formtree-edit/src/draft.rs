//! The draft store: in-progress edits keyed by address.
//!
//! The store is a pure state machine; persistence is driven from outside
//! (see [`crate::autosave`]). It keeps two layers:
//! - a snapshot of the last persisted value of every known address
//! - draft entries for addresses that were written since
//!
//! A save takes a [`SaveBatch`] of the dirty entries with their revision.
//! When the save completes, an entry is cleaned only if it was not edited
//! again in the meantime, and an entry discarded while the save was in
//! flight is not brought back.
//!
//! Observers subscribe to [`ChangeBatch`] notifications. Every public
//! mutation sends at most one notification, however many addresses it
//! touched.

use formtree_model::{Address, AddressPrefix, ValueSource};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the change notification channel.
const NOTIFY_CAPACITY: usize = 64;

/// Draft state of one address.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftEntry {
    pub address: Address,
    pub value: Value,
    pub dirty: bool,
    /// A save carrying this entry is in flight.
    pub loading: bool,
    /// Error from the last failed save of this entry.
    pub error: Option<String>,
    revision: u64,
}

impl DraftEntry {
    /// Write counter; increases on every `set`.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Why observers are being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Seeded,
    Edited,
    Discarded,
    Saved,
    SaveFailed,
    Removed,
}

/// One notification, covering every address changed by one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub kind: ChangeKind,
    pub addresses: Vec<Address>,
}

/// Dirty entries captured for one save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveBatch {
    items: Vec<(Address, Value, u64)>,
}

impl SaveBatch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `(address, value)` pairs in address order.
    pub fn values(&self) -> impl Iterator<Item = (&Address, &Value)> {
        self.items.iter().map(|(a, v, _)| (a, v))
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.items.iter().map(|(a, _, _)| a)
    }
}

/// Per-address draft cache with dirty tracking.
#[derive(Debug)]
pub struct DraftStore {
    entries: HashMap<Address, DraftEntry>,
    snapshot: HashMap<Address, Value>,
    next_revision: u64,
    notifier: broadcast::Sender<ChangeBatch>,
}

impl Default for DraftStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftStore {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            entries: HashMap::new(),
            snapshot: HashMap::new(),
            next_revision: 1,
            notifier,
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.notifier.subscribe()
    }

    fn notify(&self, kind: ChangeKind, mut addresses: Vec<Address>) {
        if addresses.is_empty() {
            return;
        }
        addresses.sort();
        addresses.dedup();
        // No receivers is fine.
        let _ = self.notifier.send(ChangeBatch { kind, addresses });
    }

    /// Replaces the persisted snapshot. Clean entries are dropped; dirty
    /// entries survive so a reload never loses unsaved edits.
    pub fn seed(&mut self, values: impl IntoIterator<Item = (Address, Value)>) {
        self.snapshot = values.into_iter().collect();
        self.entries.retain(|_, e| e.dirty);
        let mut changed: Vec<Address> = self.snapshot.keys().cloned().collect();
        changed.extend(self.entries.keys().cloned());
        debug!(
            snapshot = self.snapshot.len(),
            kept_dirty = self.entries.len(),
            "draft store seeded"
        );
        self.notify(ChangeKind::Seeded, changed);
    }

    /// Adds snapshot values for addresses not seen before, leaving every
    /// existing value alone. Used when a new collection instance appears.
    pub fn seed_missing(&mut self, values: impl IntoIterator<Item = (Address, Value)>) {
        let mut added = Vec::new();
        for (address, value) in values {
            if self.get(&address).is_none() {
                self.snapshot.insert(address.clone(), value);
                added.push(address);
            }
        }
        self.notify(ChangeKind::Seeded, added);
    }

    /// Current value: the draft if there is one, else the snapshot.
    pub fn get(&self, address: &Address) -> Option<&Value> {
        self.entries
            .get(address)
            .map(|e| &e.value)
            .or_else(|| self.snapshot.get(address))
    }

    /// Last persisted value.
    pub fn persisted(&self, address: &Address) -> Option<&Value> {
        self.snapshot.get(address)
    }

    /// Draft entry of an address, if one exists.
    pub fn entry(&self, address: &Address) -> Option<&DraftEntry> {
        self.entries.get(address)
    }

    fn write(&mut self, address: Address, value: Value) -> bool {
        if self.get(&address) == Some(&value) {
            return false;
        }
        let revision = self.next_revision;
        self.next_revision += 1;
        match self.entries.get_mut(&address) {
            Some(entry) => {
                entry.value = value;
                entry.dirty = true;
                entry.error = None;
                entry.revision = revision;
            }
            None => {
                self.entries.insert(
                    address.clone(),
                    DraftEntry {
                        address,
                        value,
                        dirty: true,
                        loading: false,
                        error: None,
                        revision,
                    },
                );
            }
        }
        true
    }

    /// Writes one value and marks it dirty. Returns false if the value was
    /// already current.
    pub fn set(&mut self, address: Address, value: Value) -> bool {
        let changed = self.write(address.clone(), value);
        if changed {
            self.notify(ChangeKind::Edited, vec![address]);
        }
        changed
    }

    /// Writes several values with a single notification. Returns the
    /// addresses whose value changed.
    pub fn set_many(&mut self, values: impl IntoIterator<Item = (Address, Value)>) -> Vec<Address> {
        let mut changed = Vec::new();
        for (address, value) in values {
            if self.write(address.clone(), value) {
                changed.push(address);
            }
        }
        self.notify(ChangeKind::Edited, changed.clone());
        changed
    }

    /// Current `(address, value)` pairs, optionally scoped, in address
    /// order.
    pub fn entries(&self, prefix: Option<&AddressPrefix>) -> Vec<(Address, Value)> {
        let in_scope = |a: &Address| prefix.is_none_or(|p| p.matches(a));
        let mut merged: BTreeMap<&Address, &Value> = self
            .snapshot
            .iter()
            .filter(|(a, _)| in_scope(a))
            .collect();
        for (address, entry) in &self.entries {
            if in_scope(address) {
                merged.insert(address, &entry.value);
            }
        }
        merged
            .into_iter()
            .map(|(a, v)| (a.clone(), v.clone()))
            .collect()
    }

    /// Dirty entries, optionally scoped, in address order.
    pub fn dirty(&self, prefix: Option<&AddressPrefix>) -> Vec<&DraftEntry> {
        let mut dirty: Vec<&DraftEntry> = self
            .entries
            .values()
            .filter(|e| e.dirty && prefix.is_none_or(|p| p.matches(&e.address)))
            .collect();
        dirty.sort_by(|a, b| a.address.cmp(&b.address));
        dirty
    }

    pub fn has_dirty(&self) -> bool {
        self.entries.values().any(|e| e.dirty)
    }

    /// Reverts in-scope entries to the snapshot. Returns the reverted
    /// addresses.
    pub fn discard_all(&mut self, prefix: Option<&AddressPrefix>) -> Vec<Address> {
        let discarded: Vec<Address> = self
            .entries
            .keys()
            .filter(|a| prefix.is_none_or(|p| p.matches(a)))
            .cloned()
            .collect();
        for address in &discarded {
            self.entries.remove(address);
        }
        debug!(count = discarded.len(), "drafts discarded");
        self.notify(ChangeKind::Discarded, discarded.clone());
        discarded
    }

    /// Forgets every address under `prefix`, drafts and snapshot alike.
    /// Used when a collection instance is removed.
    pub fn remove_scope(&mut self, prefix: &AddressPrefix) -> Vec<Address> {
        let mut removed: Vec<Address> = self
            .entries
            .keys()
            .chain(self.snapshot.keys())
            .filter(|a| prefix.matches(a))
            .cloned()
            .collect();
        removed.sort();
        removed.dedup();
        for address in &removed {
            self.entries.remove(address);
            self.snapshot.remove(address);
        }
        self.notify(ChangeKind::Removed, removed.clone());
        removed
    }

    /// Captures the dirty entries for a save and marks them loading.
    pub fn begin_save(&mut self) -> SaveBatch {
        let mut items: Vec<(Address, Value, u64)> = self
            .entries
            .values_mut()
            .filter(|e| e.dirty)
            .map(|e| {
                e.loading = true;
                (e.address.clone(), e.value.clone(), e.revision)
            })
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        SaveBatch { items }
    }

    /// Records the result of a save.
    ///
    /// Addresses in `failed` stay dirty and carry the error. Every other
    /// address becomes the new snapshot value; its entry is cleared unless
    /// it was edited again during the save. Entries discarded during the
    /// save are not recreated and the snapshot keeps its old value.
    pub fn complete_save(&mut self, batch: &SaveBatch, failed: &BTreeMap<Address, String>) {
        let mut changed = Vec::new();
        for (address, value, revision) in &batch.items {
            let Some(entry) = self.entries.get_mut(address) else {
                continue;
            };
            entry.loading = false;
            if let Some(reason) = failed.get(address) {
                entry.error = Some(reason.clone());
                changed.push(address.clone());
                continue;
            }
            self.snapshot.insert(address.clone(), value.clone());
            if entry.revision == *revision {
                self.entries.remove(address);
            }
            changed.push(address.clone());
        }
        let kind = if failed.is_empty() {
            ChangeKind::Saved
        } else {
            ChangeKind::SaveFailed
        };
        self.notify(kind, changed);
    }

    /// Records a failure of the whole batch.
    pub fn fail_save(&mut self, batch: &SaveBatch, reason: &str) {
        let mut changed = Vec::new();
        for address in batch.addresses() {
            if let Some(entry) = self.entries.get_mut(address) {
                entry.loading = false;
                entry.error = Some(reason.to_string());
                changed.push(address.clone());
            }
        }
        self.notify(ChangeKind::SaveFailed, changed);
    }
}

impl ValueSource for DraftStore {
    fn value(&self, address: &Address) -> Option<&Value> {
        self.get(address)
    }
}
