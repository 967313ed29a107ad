//! Observable events
//!
//! Events are explicit and typed. Payloads never carry key material or
//! document values; key ids are reported as counts only.

use std::fmt;

/// Observable events in aerofle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Schema declaration
    /// Schema node frozen by a builder
    SchemaDeclared,
    /// Schema definition loaded from disk
    SchemaLoaded,

    // Compilation
    /// Descriptors compiled for one collection
    DescriptorsCompiled,
    /// Model bound to a collection namespace
    CollectionBound,
    /// Discriminator overlay attached to a model
    DiscriminatorBound,

    // Connection
    /// Auto-encryption options assembled
    ConnectionConfigBuilt,
    /// Connection open requested
    ConnectionOpenStart,
    /// Connection open handed off successfully
    ConnectionOpenComplete,
    /// Connection open failed
    ConnectionOpenFailed,

    // Casting
    /// Document rejected by the caster
    CastRejected,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::SchemaDeclared => "SCHEMA_DECLARED",
            Event::SchemaLoaded => "SCHEMA_LOADED",

            Event::DescriptorsCompiled => "DESCRIPTORS_COMPILED",
            Event::CollectionBound => "COLLECTION_BOUND",
            Event::DiscriminatorBound => "DISCRIMINATOR_BOUND",

            Event::ConnectionConfigBuilt => "CONNECTION_CONFIG_BUILT",
            Event::ConnectionOpenStart => "CONNECTION_OPEN_START",
            Event::ConnectionOpenComplete => "CONNECTION_OPEN_COMPLETE",
            Event::ConnectionOpenFailed => "CONNECTION_OPEN_FAILED",

            Event::CastRejected => "CAST_REJECTED",
        }
    }

    /// Returns true if this event indicates a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::ConnectionOpenFailed | Event::CastRejected)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
