//! Collection and connection binding
//!
//! Models bind schemas to collections; a connection merges every model's
//! compiled descriptors into the auto-encryption options handed to the
//! client connector.
//!
//! # Guarantees
//!
//! - Bindings on distinct collections never interact
//! - Merging is deterministic: namespaces are ordered
//! - A connection that fails to open caches nothing

mod collection;
mod config;
mod connection;
mod model;

pub use collection::{
    bind_collection, merge_for_connection, CollectionBinding, ConnectionEncryptionConfig,
};
pub use config::{
    validate_namespace, AutoEncryptionOptions, ExtraOptions, CRYPT_SHARED_LIB_PATH_ENV,
};
pub use connection::{ClientOptions, Connection, Connector, OpenOptions};
pub use model::{pluralize, Model};
