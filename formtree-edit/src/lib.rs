//! Editing engine for formtree.
//!
//! Everything that changes while a node is being edited lives here:
//! - [`DraftStore`]: per-address drafts over the persisted snapshot
//! - the autosave worker: a debounced, serialized save loop
//! - instance management: bounded add/remove/reorder of collection
//!   instances with rollback when the [`InstanceHook`] fails
//! - [`ValidationMachine`]: per-unit validation gating saves
//! - invalidation: which progressive sections an edit leaves stale
//!
//! [`EditSession`] is the façade UI layers talk to.

mod autosave;
pub mod config;
mod draft;
mod error;
pub mod instances;
pub mod invalidation;
mod invoker;
mod session;
mod state;
pub mod validation;

pub use autosave::SaveReport;
pub use config::EditorConfig;
pub use draft::{ChangeBatch, ChangeKind, DraftEntry, DraftStore, SaveBatch};
pub use error::{EditError, EditResult};
pub use invalidation::{
    EditPolicy, Pipeline, SectionState, StaleWarning, compute_affected_sections,
};
pub use invoker::{FnInvoker, InstanceHook, Invoker, LocalInstances, NoInvoker};
pub use session::{Collaborators, EditSession};
pub use validation::{
    ValidationMachine, ValidationResult, ValidationStatus, ValidationTicket, ValidationUnit,
    Verdict,
};
