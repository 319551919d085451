//! Error types for the editing engine.

use crate::validation::ValidationStatus;
use formtree_model::{Address, AddressError, ModelError};
use formtree_store::StoreError;
use formtree_types::LocalizedText;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for editing operations.
pub type EditResult<T> = Result<T, EditError>;

/// Errors surfaced to the UI action that triggered them.
///
/// None of these leave the draft store inconsistent: a failed save keeps
/// its drafts dirty, a rejected validation keeps its reasons.
#[derive(Debug, Error)]
pub enum EditError {
    /// Address could not be resolved or parsed.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Document or tree error.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Store error outside of a save batch.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Save attempted while a configured validator is not `valid`.
    #[error("validation required for '{unit}' (status: {status})")]
    ValidationRequired {
        unit: String,
        status: ValidationStatus,
    },

    /// A validator rejected the content.
    #[error("validation rejected for '{unit}'")]
    ValidationRejected {
        unit: String,
        reasons: Vec<LocalizedText>,
        suggested_fix: Option<BTreeMap<String, Value>>,
    },

    /// Persisting failed; the listed addresses stay dirty.
    #[error("save failed for {count} address(es): {reason}", count = .failed.len())]
    SaveFailed {
        reason: String,
        failed: BTreeMap<Address, String>,
    },

    /// The instance persistence hook rejected an add or remove.
    #[error("instance hook failed: {0}")]
    InstanceHook(String),

    /// No collection at the given scope.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// No instance with the given id.
    #[error("unknown instance {instance} in {scope}")]
    UnknownInstance { scope: String, instance: u32 },

    /// Reorder positions out of range.
    #[error("invalid reorder {from} -> {to} for {len} instance(s)")]
    InvalidReorder { from: usize, to: usize, len: usize },

    /// No validation unit with the given key.
    #[error("unknown validation unit: {0}")]
    UnknownUnit(String),

    /// Section missing from the configured pipeline.
    #[error("section '{0}' is not part of the pipeline")]
    UnknownSection(String),

    /// The generation/validation invoker failed.
    #[error("invoker error: {0}")]
    Invoker(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The autosave worker has shut down.
    #[error("autosave worker stopped")]
    ChannelClosed,

    /// A lock was poisoned.
    #[error("editor state lock poisoned")]
    Poisoned,
}
