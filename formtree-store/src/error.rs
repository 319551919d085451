//! Error types for document stores.

use formtree_types::NodeId;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
///
/// Every variant is recoverable from the editor's point of view: a failed
/// save leaves drafts dirty and may be retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No document exists for the node.
    #[error("document not found: {0}")]
    NotFound(NodeId),

    /// The store refused the whole batch (network or storage failure).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A patch could not be applied to the stored document.
    #[error("patch rejected: {0}")]
    Model(#[from] formtree_model::ModelError),

    /// A lock was poisoned or a blocking task panicked.
    #[error("internal store error: {0}")]
    Internal(String),
}
