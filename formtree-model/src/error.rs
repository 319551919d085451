//! Error types for the content model.

use formtree_types::NodePath;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building trees or editing node documents.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A raw tree item could not be classified or is missing a required key.
    #[error("invalid content item at {location}: {reason}")]
    InvalidItem { location: String, reason: String },

    /// An address was applied to a document of another node.
    #[error("address belongs to node {address_node}, document is {document_node}")]
    NodeMismatch {
        address_node: String,
        document_node: NodePath,
    },

    /// A value cannot be written because an ancestor is not an object.
    #[error("path conflict at {pointer}: ancestor is not an object")]
    PathConflict { pointer: String },

    /// Core type validation failed.
    #[error(transparent)]
    Types(#[from] formtree_types::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Field addressing failures.
///
/// `Unresolved` is the `FieldAddressUnresolved` condition: the field must be
/// rendered as an explicit placeholder, never under a guessed address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("field address unresolved in scope '{scope}': {reason}")]
    Unresolved { scope: String, reason: String },

    #[error("address collision: {address} is produced by more than one field")]
    Collision { address: String },

    #[error("malformed address {address:?}: {reason}")]
    Malformed { address: String, reason: String },
}

/// Field registry lookup failures (`FieldEntryNotFound`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("field entry not found: {0}")]
    NotFound(String),

    #[error("invalid field entry {id}: {reason}")]
    InvalidEntry { id: String, reason: String },
}
