//! Value caster
//!
//! Converts documents between application values and the wire values the
//! encryption machinery encrypts on write and returns on read. Encryption
//! itself never happens here.
//!
//! # Guarantees
//!
//! - Pure functions of (schema, document); no I/O, no shared state
//! - Missing fields stay absent; nulls pass through
//! - Failures name the offending path (`a.b`, `xs[2]`), the expected type
//!   and the observed kind

mod cast;

pub use cast::{
    cast_for_read, cast_for_read_with_overlay, cast_for_write, cast_for_write_with_overlay,
};
