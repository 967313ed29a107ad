//! Error types for the encryption compiler and value caster
//!
//! Error codes:
//! - AERO_FLE_TYPE_MISMATCH (REJECT)
//! - AERO_FLE_CAST_FAILED (REJECT)
//! - AERO_FLE_SCHEMA_CONFLICT (FATAL)
//! - AERO_FLE_COLLECTION_CONFLICT (FATAL)
//! - AERO_FLE_INTENT_INVALID (FATAL)
//! - AERO_FLE_DUPLICATE_MODEL (FATAL)
//! - AERO_FLE_CONFIG_ERROR (FATAL)
//! - AERO_FLE_CONNECTION_FAILED (FATAL)
//!
//! REJECT errors abort the single document operation in progress.
//! FATAL errors abort schema construction or connection-open.

use std::fmt;

use thiserror::Error;

/// Severity levels for encryption errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Single document operation rejected
    Reject,
    /// Declaration, compilation or connection-open aborted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleErrorCode {
    AeroFleTypeMismatch,
    AeroFleCastFailed,
    AeroFleSchemaConflict,
    AeroFleCollectionConflict,
    AeroFleIntentInvalid,
    AeroFleDuplicateModel,
    AeroFleConfigError,
    AeroFleConnectionFailed,
}

impl FleErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            FleErrorCode::AeroFleTypeMismatch => "AERO_FLE_TYPE_MISMATCH",
            FleErrorCode::AeroFleCastFailed => "AERO_FLE_CAST_FAILED",
            FleErrorCode::AeroFleSchemaConflict => "AERO_FLE_SCHEMA_CONFLICT",
            FleErrorCode::AeroFleCollectionConflict => "AERO_FLE_COLLECTION_CONFLICT",
            FleErrorCode::AeroFleIntentInvalid => "AERO_FLE_INTENT_INVALID",
            FleErrorCode::AeroFleDuplicateModel => "AERO_FLE_DUPLICATE_MODEL",
            FleErrorCode::AeroFleConfigError => "AERO_FLE_CONFIG_ERROR",
            FleErrorCode::AeroFleConnectionFailed => "AERO_FLE_CONNECTION_FAILED",
        }
    }

    /// Returns the severity level for this code
    pub fn severity(&self) -> Severity {
        match self {
            FleErrorCode::AeroFleTypeMismatch | FleErrorCode::AeroFleCastFailed => {
                Severity::Reject
            }
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for FleErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Location and shape of a failed cast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastDetails {
    /// Field path (e.g., "a.b.c" or "tags[2]")
    pub path: String,
    /// Declared type name
    pub expected: String,
    /// Observed value kind
    pub actual: String,
}

impl CastDetails {
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn undeclared_field(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected: "no undeclared fields".into(),
            actual: "undeclared field present".into(),
        }
    }
}

impl fmt::Display for CastDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}': expected {}, got {}",
            self.path, self.expected, self.actual
        )
    }
}

/// Errors raised by declaration, compilation, binding and casting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FleError {
    /// A value does not conform to a type descriptor
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A document does not conform to its schema
    #[error("cast failed: {0}")]
    Cast(CastDetails),

    /// An encrypted path is redeclared incompatibly within one compiled tree
    #[error("schema conflict at '{path}': {reason}")]
    SchemaConflict { path: String, reason: String },

    /// Independently bound schemas disagree on a collection's encryption
    #[error("collection conflict in '{collection}' at '{path}': {reason}")]
    CollectionConflict {
        collection: String,
        path: String,
        reason: String,
    },

    /// An encryption intent is malformed for its declared mode
    #[error("invalid encryption intent at '{path}': {reason}")]
    IntentValidation { path: String, reason: String },

    /// A model name is registered twice on one connection
    #[error("model '{0}' is already registered")]
    DuplicateModel(String),

    /// Malformed auto-encryption options or schema definition file
    #[error("configuration error: {0}")]
    Config(String),

    /// Reported by the external connection collaborator
    #[error("connection failed: {0}")]
    Connection(String),
}

impl FleError {
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        FleError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn cast(details: CastDetails) -> Self {
        FleError::Cast(details)
    }

    pub fn schema_conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FleError::SchemaConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn collection_conflict(
        collection: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        FleError::CollectionConflict {
            collection: collection.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn intent(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FleError::IntentValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FleError::Config(msg.into())
    }

    /// Attaches a field path to a type mismatch, turning it into a cast error.
    ///
    /// Other error kinds are returned unchanged.
    pub fn at_path(self, path: &str) -> Self {
        match self {
            FleError::TypeMismatch { expected, actual } => {
                FleError::Cast(CastDetails::new(path, expected, actual))
            }
            other => other,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> FleErrorCode {
        match self {
            FleError::TypeMismatch { .. } => FleErrorCode::AeroFleTypeMismatch,
            FleError::Cast(_) => FleErrorCode::AeroFleCastFailed,
            FleError::SchemaConflict { .. } => FleErrorCode::AeroFleSchemaConflict,
            FleError::CollectionConflict { .. } => FleErrorCode::AeroFleCollectionConflict,
            FleError::IntentValidation { .. } => FleErrorCode::AeroFleIntentInvalid,
            FleError::DuplicateModel(_) => FleErrorCode::AeroFleDuplicateModel,
            FleError::Config(_) => FleErrorCode::AeroFleConfigError,
            FleError::Connection(_) => FleErrorCode::AeroFleConnectionFailed,
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code().severity()
    }

    /// Returns whether this error aborts declaration or connection-open
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns cast details if applicable
    pub fn details(&self) -> Option<&CastDetails> {
        match self {
            FleError::Cast(details) => Some(details),
            _ => None,
        }
    }
}

/// Result type for encryption operations
pub type FleResult<T> = Result<T, FleError>;
