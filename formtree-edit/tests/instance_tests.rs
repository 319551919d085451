use async_trait::async_trait;
use formtree_edit::instances::{reorder, try_add, try_remove};
use formtree_edit::{Collaborators, EditError, EditSession, EditorConfig, InstanceHook};
use formtree_model::{
    Address, CollectionRules, CollectionSectionItem, ContentTree, FieldEntry, FieldItem,
    MemoryRegistry,
};
use formtree_store::MemoryDocumentStore;
use formtree_types::{InstanceId, NodeId, NodePath};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn id(n: u32) -> InstanceId {
    InstanceId::new(n).unwrap()
}

fn chars(min: u32, max: u32, count: u32) -> CollectionSectionItem {
    CollectionSectionItem::new(
        "chars",
        CollectionRules::new(min, max),
        vec![FieldItem::new("name").into()],
        count,
    )
}

// ── Bounds ───────────────────────────────────────────────────────

#[test]
fn add_stops_at_max() {
    let mut c = chars(1, 3, 1);
    assert_eq!(try_add(&mut c), Some(id(2)));
    assert_eq!(try_add(&mut c), Some(id(3)));
    assert_eq!(try_add(&mut c), None);
    assert_eq!(c.instances.len(), 3);
}

#[test]
fn remove_stops_at_min() {
    let mut c = chars(1, 3, 1);
    assert_eq!(try_remove(&mut c, id(1)).unwrap(), None);
    assert_eq!(c.instance_ids(), vec![id(1)]);
}

#[test]
fn remove_unknown_instance_is_an_error() {
    let mut c = chars(0, 3, 2);
    let err = try_remove(&mut c, id(9)).unwrap_err();
    assert!(matches!(err, EditError::UnknownInstance { instance: 9, .. }));
}

#[test]
fn new_ids_follow_the_highest() {
    let mut c = chars(0, 5, 3);
    try_remove(&mut c, id(2)).unwrap();
    assert_eq!(try_add(&mut c), Some(id(4)));
    assert_eq!(c.instance_ids(), vec![id(1), id(3), id(4)]);
}

// ── Reorder ──────────────────────────────────────────────────────

#[test]
fn reorder_keeps_identity() {
    let mut c = chars(0, 5, 3);
    reorder(&mut c, 0, 2).unwrap();
    assert_eq!(c.instance_ids(), vec![id(2), id(3), id(1)]);
}

#[test]
fn reorder_out_of_range_is_rejected() {
    let mut c = chars(0, 5, 2);
    let err = reorder(&mut c, 0, 2).unwrap_err();
    assert!(matches!(err, EditError::InvalidReorder { len: 2, .. }));
    assert_eq!(c.instance_ids(), vec![id(1), id(2)]);
}

// ── Session with a persistence hook ──────────────────────────────

#[derive(Default)]
struct RecordingHook {
    fail: AtomicBool,
    calls: AtomicUsize,
    removed_positions: Mutex<Vec<usize>>,
}

#[async_trait]
impl InstanceHook for RecordingHook {
    async fn instance_added(&self, _: NodeId, _: &str, _: InstanceId) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("backend down".into());
        }
        Ok(())
    }

    async fn instance_removed(
        &self,
        _: NodeId,
        _: &str,
        _: InstanceId,
        position: usize,
    ) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("backend down".into());
        }
        self.removed_positions.lock().unwrap().push(position);
        Ok(())
    }
}

async fn session(
    rules: CollectionRules,
    count: u32,
    hook: Arc<RecordingHook>,
) -> (EditSession, Arc<MemoryDocumentStore>) {
    let tree = ContentTree::new(vec![
        CollectionSectionItem::new("chars", rules, vec![FieldItem::new("name").into()], count)
            .into(),
    ]);
    let registry = MemoryRegistry::new().with(FieldEntry::text("name").with_default(json!("")));
    let store = Arc::new(MemoryDocumentStore::new());
    let collaborators =
        Collaborators::new(store.clone(), Arc::new(registry)).with_instance_hook(hook);
    let mut config = EditorConfig::default();
    config.autosave.enabled = false;
    let session = EditSession::open(
        NodeId::new(),
        NodePath::new("job/1").unwrap(),
        tree,
        collaborators,
        &config,
    )
    .await
    .unwrap();
    (session, store)
}

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

#[tokio::test]
async fn bounded_add_and_remove_through_session() {
    let hook = Arc::new(RecordingHook::default());
    let (session, _) = session(CollectionRules::new(1, 3), 1, hook.clone()).await;

    assert!(!session.remove_instance("chars", id(1)).await.unwrap());
    assert_eq!(session.add_instance("chars").await.unwrap(), Some(id(2)));
    assert_eq!(session.add_instance("chars").await.unwrap(), Some(id(3)));
    assert_eq!(session.add_instance("chars").await.unwrap(), None);
    assert_eq!(session.instance_ids("chars").unwrap(), vec![id(1), id(2), id(3)]);
    // Bound checks never reach the hook.
    assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
    session.close().await;
}

#[tokio::test]
async fn new_instance_gets_addresses_and_defaults() {
    let hook = Arc::new(RecordingHook::default());
    let (session, _) = session(CollectionRules::new(0, 3), 1, hook).await;
    session.add_instance("chars").await.unwrap();
    let a = addr("job/1#chars.2.name.value");
    assert!(session.addresses().unwrap().contains(&a));
    assert_eq!(session.get(&a).unwrap(), Some(json!("")));
    session.close().await;
}

#[tokio::test]
async fn failed_add_is_reverted() {
    let hook = Arc::new(RecordingHook::default());
    hook.fail.store(true, Ordering::SeqCst);
    let (session, _) = session(CollectionRules::new(0, 3), 1, hook).await;
    let err = session.add_instance("chars").await.unwrap_err();
    assert!(matches!(err, EditError::InstanceHook(_)));
    assert_eq!(session.instance_ids("chars").unwrap(), vec![id(1)]);
    assert!(!session.addresses().unwrap().contains(&addr("job/1#chars.2.name.value")));
    session.close().await;
}

#[tokio::test]
async fn failed_remove_restores_position() {
    let hook = Arc::new(RecordingHook::default());
    let (session, _) = session(CollectionRules::new(0, 5), 3, hook.clone()).await;
    hook.fail.store(true, Ordering::SeqCst);
    let err = session.remove_instance("chars", id(2)).await.unwrap_err();
    assert!(matches!(err, EditError::InstanceHook(_)));
    assert_eq!(session.instance_ids("chars").unwrap(), vec![id(1), id(2), id(3)]);
    session.close().await;
}

#[tokio::test]
async fn remove_passes_one_based_position_and_tears_down_drafts() {
    let hook = Arc::new(RecordingHook::default());
    let (session, _) = session(CollectionRules::new(0, 5), 3, hook.clone()).await;
    let doomed = addr("job/1#chars.2.name.value");
    let kept = addr("job/1#chars.3.name.value");
    session.set(&doomed, json!("Grace")).unwrap();
    session.set(&kept, json!("Ada")).unwrap();

    assert!(session.remove_instance("chars", id(2)).await.unwrap());
    assert_eq!(*hook.removed_positions.lock().unwrap(), vec![2]);
    assert_eq!(session.get(&doomed).unwrap(), None);
    assert_eq!(session.get(&kept).unwrap(), Some(json!("Ada")));
    assert_eq!(session.dirty_addresses().unwrap(), vec![kept]);
    session.close().await;
}

#[tokio::test]
async fn unpersisted_removal_keeps_saved_values() {
    let hook = Arc::new(RecordingHook::default());
    let (session, store) = session(CollectionRules::new(0, 5), 3, hook).await;
    let doomed = addr("job/1#chars.2.name.value");
    session.set(&doomed, json!("Grace")).unwrap();
    session.save_all().await.unwrap();
    let node_id = session.document().unwrap().node_id;

    store.fail_next_saves(1);
    assert!(session.remove_instance("chars", id(2)).await.is_err());
    assert_eq!(session.instance_ids("chars").unwrap(), vec![id(1), id(3)]);
    // The store still holds the value, so the local copies keep it too.
    assert_eq!(
        store.document(node_id).unwrap().value_at(&doomed),
        Some(&json!("Grace"))
    );
    assert_eq!(session.document().unwrap().value_at(&doomed), Some(&json!("Grace")));
    assert_eq!(session.get(&doomed).unwrap(), Some(json!("Grace")));
    assert!(session.dirty_addresses().unwrap().is_empty());
    session.close().await;
}

#[tokio::test]
async fn reorder_keeps_draft_addresses() {
    let hook = Arc::new(RecordingHook::default());
    let (session, _) = session(CollectionRules::new(0, 5), 2, hook).await;
    let first = addr("job/1#chars.1.name.value");
    session.set(&first, json!("Ada")).unwrap();
    session.reorder_instance("chars", 0, 1).unwrap();
    assert_eq!(session.instance_ids("chars").unwrap(), vec![id(2), id(1)]);
    assert_eq!(session.get(&first).unwrap(), Some(json!("Ada")));
    assert!(session.addresses().unwrap().contains(&first));
    session.close().await;
}
