//! aerofle - Schema-driven field-level encryption for aerodb models
//!
//! Compiles encryption intents declared on schemas into the descriptors a
//! client's automatic encryption consumes, and casts documents between
//! application values and wire values on either side of that machinery.

pub mod binding;
pub mod caster;
pub mod compiler;
pub mod errors;
pub mod observability;
pub mod schema;
pub mod types;

pub use binding::{
    AutoEncryptionOptions, Connection, ConnectionEncryptionConfig, Connector, Model, OpenOptions,
};
pub use caster::{cast_for_read, cast_for_write};
pub use compiler::{compile, DescriptorSet, DiscriminatorOverlay};
pub use errors::{CastDetails, FleError, FleErrorCode, FleResult};
pub use schema::{EncryptOptions, EncryptionMode, SchemaBuilder, SchemaLoader, SchemaNode};
pub use types::{Bson, Document, TypeKind, Value, WireDocument};
