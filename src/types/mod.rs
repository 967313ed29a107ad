//! Type registry for aerofle
//!
//! Canonical description of every supported value kind and its two
//! representations: the application value a model works with and the wire
//! value the encryption machinery sees.
//!
//! # Guarantees
//!
//! - `decode(T, encode(T, v)) == v` for every `v` in `T`'s domain
//! - Byte sequences compare by content
//! - Big integers and decimals never pass through a float
//! - Dates keep millisecond-resolution instants
//! - `int32` and `double` stay distinct kinds

mod registry;
mod value;
mod wire;

pub use bson::oid::ObjectId;
pub use bson::spec::BinarySubtype;
pub use bson::{Binary, Bson, Decimal128};
pub use registry::{decode, encode, TypeDescriptor, TypeKind};
pub use value::{Document, Value};
pub use wire::{bson_type, WireDocument};
