//! Schema tree for aerofle
//!
//! Schemas declare a document's fields, their types and which of them are
//! encrypted. Declarations are validated eagerly; a built `SchemaNode` is
//! immutable and can be shared between parents, models and overlays.
//!
//! # Design Principles
//!
//! - Every intent is checked against the schema's encryption mode at declaration
//! - A sub-schema's mode must match its parent's
//! - Field order is declaration order
//! - Nodes are shared by `Arc` and never mutated after `build()`

mod builder;
mod intent;
mod loader;
mod types;

pub use builder::{FieldType, SchemaBuilder};
pub use intent::{
    Algorithm, EncryptOptions, EncryptTarget, EncryptionIntent, EncryptionMode, KeyId, KeyIdSpec,
    QueryOptions, QueryType, ResolvedQueries,
};
pub use loader::{SchemaDefinition, SchemaLoader};
pub use types::{
    ElementKind, FieldKind, FieldSpec, SchemaNode, SchemaOptions, StrictMode,
    DEFAULT_DISCRIMINATOR_KEY,
};
