//! Core type definitions for formtree.
//!
//! This crate defines the small, domain-agnostic types every other formtree
//! crate depends on:
//! - Node identifiers (UUID v7) and node paths used as address prefixes
//! - Progressive section keys and 1-based collection instance ids
//! - Hybrid timestamps recording when a section was last written
//! - Localized text carried by validation reasons
//!
//! Content trees, addresses and drafts live in `formtree-model` and
//! `formtree-edit`, not here.

mod ids;
mod text;
mod timestamp;

pub use ids::{InstanceId, NodeId, NodePath, SectionKey};
pub use text::LocalizedText;
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when constructing core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid node path: {0:?}")]
    InvalidNodePath(String),

    #[error("invalid section key: {0:?}")]
    InvalidSectionKey(String),

    #[error("invalid instance id: {0} (instance ids start at 1)")]
    InvalidInstanceId(i64),
}
