//! SQLite-backed document store.
//!
//! One row per node; the document body is stored as JSON. Patches are
//! applied inside a transaction with the same semantics as the in-memory
//! store.

use crate::{DocumentStore, PatchOutcome, StoreError, StoreResult, apply_checked};
use async_trait::async_trait;
use formtree_model::{DocumentPatch, NodeDocument};
use formtree_types::{NodeId, Timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Persistent store for node documents backed by SQLite.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        info!(path = %path.display(), "document store opened");
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                node_id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                body TEXT NOT NULL,
                revision INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(path);
            ",
        )?;
        Ok(())
    }

    /// Runs a blocking closure against the connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("store task failed: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::Internal(format!("connection lock poisoned: {e}")))
}

fn read_document(conn: &Connection, node_id: NodeId) -> StoreResult<Option<NodeDocument>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE node_id = ?1",
            params![node_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
        .transpose()
}

fn write_document(conn: &Connection, document: &NodeDocument) -> StoreResult<()> {
    let body = serde_json::to_string(document)?;
    let revision = i64::try_from(document.revision)
        .map_err(|_| StoreError::Internal("revision out of range".to_string()))?;
    let updated_at = i64::try_from(Timestamp::now().wall_time()).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT OR REPLACE INTO documents (node_id, path, body, revision, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            document.node_id.to_string(),
            document.path.as_str(),
            body,
            revision,
            updated_at,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load(&self, node_id: NodeId) -> StoreResult<Option<NodeDocument>> {
        self.with_conn(move |conn| read_document(conn, node_id)).await
    }

    async fn put(&self, document: NodeDocument) -> StoreResult<()> {
        self.with_conn(move |conn| write_document(conn, &document))
            .await
    }

    async fn save(&self, node_id: NodeId, patch: &DocumentPatch) -> StoreResult<PatchOutcome> {
        let patch = patch.clone();
        let outcome = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut document =
                    read_document(&tx, node_id)?.ok_or(StoreError::NotFound(node_id))?;
                let outcome = apply_checked(&mut document, &patch, &BTreeMap::new())?;
                write_document(&tx, &document)?;
                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        debug!(node = %node_id, revision = outcome.revision, "patch persisted");
        Ok(outcome)
    }
}
