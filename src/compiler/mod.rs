//! Encryption descriptor compiler
//!
//! Turns frozen schema trees into the per-mode descriptors the external
//! encryption machinery consumes.
//!
//! # Guarantees
//!
//! - One descriptor per mode present; an absent mode yields none
//! - Paths are fully-qualified and dotted, without array indexes
//! - Entry order is pre-order traversal order
//! - Compilation is pure and may run concurrently for independent connections

mod compile;
mod descriptor;

pub use compile::{compile, DiscriminatorOverlay};
pub use descriptor::{CompiledDescriptor, DescriptorEntry, DescriptorSet};

pub(crate) use descriptor::Conflict;
