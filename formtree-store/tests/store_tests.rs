use formtree_model::{Address, DocumentPatch, NodeDocument, PatchOp};
use formtree_store::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore, StoreError};
use formtree_types::{NodeId, NodePath, SectionKey, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn document() -> NodeDocument {
    NodeDocument::new(NodeId::new(), NodePath::new("job/1").unwrap())
}

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

fn set(address: &str, value: serde_json::Value) -> PatchOp {
    PatchOp {
        address: addr(address),
        value: Some(value),
    }
}

fn patch(ops: Vec<PatchOp>) -> DocumentPatch {
    DocumentPatch {
        ops,
        ..DocumentPatch::default()
    }
}

// ── Memory store ─────────────────────────────────────────────────

#[tokio::test]
async fn memory_put_load_save() {
    let doc = document();
    let id = doc.node_id;
    let store = MemoryDocumentStore::new();
    assert!(store.load(id).await.unwrap().is_none());

    store.put(doc).await.unwrap();
    let outcome = store
        .save(id, &patch(vec![set("job/1#input.title.value", json!("hi"))]))
        .await
        .unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.revision, 1);

    let loaded = store.load(id).await.unwrap().unwrap();
    assert_eq!(loaded.value_at(&addr("job/1#input.title.value")), Some(&json!("hi")));
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn memory_save_unknown_node() {
    let store = MemoryDocumentStore::new();
    let err = store.save(NodeId::new(), &DocumentPatch::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn memory_injected_failure_leaves_document_untouched() {
    let doc = document();
    let id = doc.node_id;
    let store = MemoryDocumentStore::with_document(doc);
    store.fail_next_saves(1);

    let p = patch(vec![set("job/1#input.title.value", json!("hi"))]);
    assert!(matches!(
        store.save(id, &p).await.unwrap_err(),
        StoreError::Unavailable(_)
    ));
    assert_eq!(store.document(id).unwrap().revision, 0);
    assert_eq!(store.save_count(), 0);

    store.save(id, &p).await.unwrap();
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn memory_refused_address_is_reported() {
    let doc = document();
    let id = doc.node_id;
    let store = MemoryDocumentStore::with_document(doc);
    store.refuse_address(addr("job/1#input.b.value"), "quota");

    let outcome = store
        .save(
            id,
            &patch(vec![
                set("job/1#input.a.value", json!(1)),
                set("job/1#input.b.value", json!(2)),
                set("job/9#input.c.value", json!(3)),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(outcome.rejected.len(), 2);
    assert_eq!(outcome.rejected[&addr("job/1#input.b.value")], "quota");

    let stored = store.document(id).unwrap();
    assert_eq!(stored.data(), &json!({"input": {"a": 1}}));
}

#[tokio::test]
async fn memory_refused_section_keeps_stored_metadata() {
    let mut doc = document();
    let id = doc.node_id;
    let stage = SectionKey::new("stage").unwrap();
    let input = SectionKey::new("input").unwrap();
    doc.set_section_timestamp(stage.clone(), Timestamp::from_millis(1_000));
    doc.mark_stale(stage.clone());
    let store = MemoryDocumentStore::with_document(doc);
    store.refuse_address(addr("job/1#stage.script.value"), "locked");

    let mut write = patch(vec![
        set("job/1#input.a.value", json!(1)),
        set("job/1#stage.script.value", json!("x")),
    ]);
    write.section_timestamps = Some(BTreeMap::from([
        (input.clone(), Timestamp::from_millis(5_000)),
        (stage.clone(), Timestamp::from_millis(5_000)),
    ]));
    write.stale_sections = Some(Default::default());
    let outcome = store.save(id, &write).await.unwrap();
    assert_eq!(outcome.rejected.len(), 1);

    let stored = store.document(id).unwrap();
    assert_eq!(stored.section_timestamp(&stage), Some(Timestamp::from_millis(1_000)));
    assert!(stored.is_stale(&stage));
    assert_eq!(stored.section_timestamp(&input), Some(Timestamp::from_millis(5_000)));
}

#[tokio::test]
async fn memory_conflicting_patch_is_atomic() {
    let doc = document();
    let id = doc.node_id;
    let store = MemoryDocumentStore::with_document(doc);
    store
        .save(id, &patch(vec![set("job/1#input.value", json!("flat"))]))
        .await
        .unwrap();

    let err = store
        .save(
            id,
            &patch(vec![
                set("job/1#other.a.value", json!(1)),
                set("job/1#input.title.value", json!("x")),
            ]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Model(_)));
    assert_eq!(store.document(id).unwrap().data(), &json!({"input": "flat"}));
}

#[tokio::test]
async fn arc_store_is_a_store() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let doc = document();
    let id = doc.node_id;
    store.put(doc).await.unwrap();
    assert!(store.load(id).await.unwrap().is_some());
}

// ── SQLite store ─────────────────────────────────────────────────

#[tokio::test]
async fn sqlite_round_trip_with_metadata() {
    let store = SqliteDocumentStore::open_in_memory().unwrap();
    let doc = document();
    let id = doc.node_id;
    store.put(doc).await.unwrap();

    let input = SectionKey::new("input").unwrap();
    let mut timestamps = BTreeMap::new();
    timestamps.insert(input.clone(), Timestamp::new(42, 1));
    let p = DocumentPatch {
        ops: vec![set("job/1#input.title.value", json!("t"))],
        section_timestamps: Some(timestamps),
        ..DocumentPatch::default()
    };
    let outcome = store.save(id, &p).await.unwrap();
    assert_eq!(outcome.revision, 1);

    let loaded = store.load(id).await.unwrap().unwrap();
    assert_eq!(loaded.value_at(&addr("job/1#input.title.value")), Some(&json!("t")));
    assert_eq!(loaded.section_timestamp(&input), Some(Timestamp::new(42, 1)));
    assert_eq!(loaded.revision, 1);
}

#[tokio::test]
async fn sqlite_save_unknown_node() {
    let store = SqliteDocumentStore::open_in_memory().unwrap();
    let err = store.save(NodeId::new(), &DocumentPatch::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docs.db");
    let doc = document();
    let id = doc.node_id;
    {
        let store = SqliteDocumentStore::open(&path).unwrap();
        store.put(doc).await.unwrap();
        store
            .save(id, &patch(vec![set("job/1#stage1.x.value", json!([1, 2]))]))
            .await
            .unwrap();
    }
    let reopened = SqliteDocumentStore::open(&path).unwrap();
    let loaded = reopened.load(id).await.unwrap().unwrap();
    assert_eq!(loaded.value_at(&addr("job/1#stage1.x.value")), Some(&json!([1, 2])));
}

#[tokio::test]
async fn sqlite_rejects_foreign_addresses() {
    let store = SqliteDocumentStore::open_in_memory().unwrap();
    let doc = document();
    let id = doc.node_id;
    store.put(doc).await.unwrap();
    let outcome = store
        .save(id, &patch(vec![set("job/2#input.a.value", json!(1))]))
        .await
        .unwrap();
    assert_eq!(outcome.rejected.len(), 1);
}
