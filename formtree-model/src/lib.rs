//! Hierarchical content model for formtree.
//!
//! Defines the data every editing surface works on:
//! - [`ContentTree`]: fields, sections and repeatable collections as a
//!   closed [`ContentItem`] enum, parsed from loosely shaped JSON
//! - [`Address`] / [`AddressMap`]: the canonical, injective address of
//!   every field, with inverse lookup and collision detection
//! - [`FieldRegistry`] / [`FieldEntry`]: read-only field descriptions and
//!   their locally checked rules
//! - [`render::plan`] / [`FieldRenderer`]: exhaustive widget dispatch with
//!   explicit placeholders for unresolved fields and missing entries
//! - [`NodeDocument`]: the persisted values, per-section timestamps and
//!   stale flags of one node
//!
//! Drafts, autosave, validation and invalidation live in `formtree-edit`.

pub mod address;
mod document;
mod error;
mod registry;
pub mod render;
pub mod traverse;
mod tree;

pub use address::{
    Address, AddressMap, AddressPrefix, ResolvedField, UnresolvedField, normalize_field_id,
    resolve_address,
};
pub use document::{DocumentPatch, NodeDocument, PatchOp};
pub use error::{AddressError, ModelError, ModelResult, RegistryError};
pub use registry::{Datatype, FieldEntry, FieldRegistry, FieldRules, MemoryRegistry};
pub use render::{FieldRenderer, FieldView, RenderNode, WidgetKind, WidgetView};
pub use traverse::{
    StructuralDefect, ValueSource, collect_field_refs, is_blank, is_empty, structural_defects,
};
pub use tree::{
    CollectionRules, CollectionSectionItem, ContentItem, ContentTree, FieldIdent, FieldItem,
    Instance, SectionItem,
};
