//! Encryption intents
//!
//! A field declares loose `EncryptOptions` (key id or ids, optional
//! algorithm, optional queries). At declaration time the options are resolved
//! against the schema's encryption mode into a typed `EncryptionIntent`;
//! every shape error surfaces there, never later at compile time.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{FleError, FleResult};
use crate::types::{self, Binary, BinarySubtype, Bson, TypeKind, Value};

/// Encryption mode of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EncryptionMode {
    /// Client-side field-level encryption
    #[serde(rename = "csfle")]
    Csfle,
    /// Server-assisted queryable encryption
    #[serde(rename = "queryableEncryption")]
    QueryableEncryption,
}

impl EncryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::Csfle => "csfle",
            EncryptionMode::QueryableEncryption => "queryableEncryption",
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = FleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csfle" => Ok(EncryptionMode::Csfle),
            "queryableEncryption" | "qe" => Ok(EncryptionMode::QueryableEncryption),
            other => Err(FleError::config(format!(
                "unknown encryption type '{}', expected 'csfle' or 'queryableEncryption'",
                other
            ))),
        }
    }
}

/// CSFLE encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Random,
    Deterministic,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Random => "AEAD_AES_256_CBC_HMAC_SHA_512-Random",
            Algorithm::Deterministic => "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        [Algorithm::Random, Algorithm::Deterministic]
            .into_iter()
            .find(|a| a.as_str() == name)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Byte length of a key-vault data key id (a UUID)
pub const KEY_ID_LEN: usize = 16;

/// Opaque data-encryption key handle issued by the key vault
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(Vec<u8>);

impl KeyId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> FleResult<Self> {
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(|e| FleError::config(format!("invalid base64 key id '{}': {}", encoded, e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wire form used in descriptors
    pub fn to_wire(&self) -> Bson {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: self.0.clone(),
        })
    }
}

impl From<Uuid> for KeyId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.as_bytes().to_vec())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD.encode(&self.0))
    }
}

/// Key reference as declared: a single key or a list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIdSpec {
    One(KeyId),
    Many(Vec<KeyId>),
}

/// Queryable encryption query kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Equality,
    Range,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Equality => "equality",
            QueryType::Range => "range",
        }
    }
}

/// Declared query support for a queryable-encryption field
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub query_type: QueryType,
    pub contention: Option<u64>,
    pub sparsity: Option<u32>,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl QueryOptions {
    pub fn equality() -> Self {
        Self {
            query_type: QueryType::Equality,
            contention: None,
            sparsity: None,
            min: None,
            max: None,
        }
    }

    pub fn range(min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Self {
            query_type: QueryType::Range,
            contention: None,
            sparsity: None,
            min: Some(min.into()),
            max: Some(max.into()),
        }
    }

    pub fn contention(mut self, contention: u64) -> Self {
        self.contention = Some(contention);
        self
    }

    pub fn sparsity(mut self, sparsity: u32) -> Self {
        self.sparsity = Some(sparsity);
        self
    }
}

/// Query support resolved against the field's type; bounds are wire-typed
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQueries {
    pub query_type: QueryType,
    pub contention: Option<u64>,
    pub sparsity: Option<u32>,
    pub min: Option<Bson>,
    pub max: Option<Bson>,
}

/// Encryption options as declared on a field
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptOptions {
    pub key_id: KeyIdSpec,
    pub algorithm: Option<String>,
    pub queries: Option<QueryOptions>,
}

impl EncryptOptions {
    /// Options with a list of keys (CSFLE shape)
    pub fn key_ids(key_ids: impl IntoIterator<Item = KeyId>) -> Self {
        Self {
            key_id: KeyIdSpec::Many(key_ids.into_iter().collect()),
            algorithm: None,
            queries: None,
        }
    }

    /// Options with a single key (QE shape)
    pub fn key_id(key_id: KeyId) -> Self {
        Self {
            key_id: KeyIdSpec::One(key_id),
            algorithm: None,
            queries: None,
        }
    }

    pub fn algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn queries(mut self, queries: QueryOptions) -> Self {
        self.queries = Some(queries);
        self
    }

    /// Resolves the declared options for a field of the given shape.
    pub fn resolve(
        self,
        mode: Option<EncryptionMode>,
        path: &str,
        target: EncryptTarget,
    ) -> FleResult<EncryptionIntent> {
        let mode = mode.ok_or_else(|| {
            FleError::intent(path, "encrypt declared on a schema without an encryption type")
        })?;

        match mode {
            EncryptionMode::Csfle => self.resolve_csfle(path, target),
            EncryptionMode::QueryableEncryption => self.resolve_queryable(path, target),
        }
    }

    fn resolve_csfle(self, path: &str, target: EncryptTarget) -> FleResult<EncryptionIntent> {
        let key_ids = match self.key_id {
            KeyIdSpec::Many(ids) if !ids.is_empty() => ids,
            KeyIdSpec::Many(_) => {
                return Err(FleError::intent(path, "csfle requires at least one key id"))
            }
            KeyIdSpec::One(_) => {
                return Err(FleError::intent(path, "csfle requires an array of key ids"))
            }
        };
        check_key_ids(path, &key_ids)?;

        let name = self
            .algorithm
            .ok_or_else(|| FleError::intent(path, "csfle requires an algorithm"))?;
        let algorithm = Algorithm::parse(&name)
            .ok_or_else(|| FleError::intent(path, format!("unknown algorithm '{}'", name)))?;

        if self.queries.is_some() {
            return Err(FleError::intent(
                path,
                "queries are only supported by queryable encryption",
            ));
        }

        if algorithm == Algorithm::Deterministic && !target.supports_deterministic() {
            return Err(FleError::intent(
                path,
                format!(
                    "deterministic encryption is not supported for bsonType '{}'",
                    target.bson_type()
                ),
            ));
        }

        Ok(EncryptionIntent::Csfle { key_ids, algorithm })
    }

    fn resolve_queryable(self, path: &str, target: EncryptTarget) -> FleResult<EncryptionIntent> {
        if self.algorithm.is_some() {
            return Err(FleError::intent(
                path,
                "queryable encryption does not accept an algorithm",
            ));
        }

        let key_id = match self.key_id {
            KeyIdSpec::One(id) => id,
            KeyIdSpec::Many(_) => {
                return Err(FleError::intent(
                    path,
                    "queryable encryption requires a single key id",
                ))
            }
        };
        check_key_ids(path, std::slice::from_ref(&key_id))?;

        let queries = match self.queries {
            Some(q) => Some(resolve_queries(q, path, target)?),
            None => None,
        };

        Ok(EncryptionIntent::Queryable { key_id, queries })
    }
}

/// Data keys are UUIDs; anything else cannot be rendered as one.
fn check_key_ids(path: &str, key_ids: &[KeyId]) -> FleResult<()> {
    match key_ids.iter().find(|k| k.as_bytes().len() != KEY_ID_LEN) {
        Some(bad) => Err(FleError::intent(
            path,
            format!(
                "key id '{}' is {} bytes, expected a {}-byte UUID",
                bad,
                bad.as_bytes().len(),
                KEY_ID_LEN
            ),
        )),
        None => Ok(()),
    }
}

fn resolve_queries(
    queries: QueryOptions,
    path: &str,
    target: EncryptTarget,
) -> FleResult<ResolvedQueries> {
    let bound = |value: Option<Value>| -> FleResult<Option<Bson>> {
        match (value, target) {
            (None, _) => Ok(None),
            (Some(v), EncryptTarget::Leaf(kind)) => types::encode(kind, &v)
                .map(Some)
                .map_err(|e| FleError::intent(path, format!("invalid range bound: {}", e))),
            (Some(_), _) => Err(FleError::intent(path, "range bounds require a scalar field")),
        }
    };

    match queries.query_type {
        QueryType::Equality => {
            if queries.min.is_some() || queries.max.is_some() {
                return Err(FleError::intent(path, "equality queries take no bounds"));
            }
        }
        QueryType::Range => {
            if !target.supports_range() {
                return Err(FleError::intent(
                    path,
                    format!(
                        "range queries are not supported for bsonType '{}'",
                        target.bson_type()
                    ),
                ));
            }
        }
    }

    Ok(ResolvedQueries {
        query_type: queries.query_type,
        contention: queries.contention,
        sparsity: queries.sparsity,
        min: bound(queries.min)?,
        max: bound(queries.max)?,
    })
}

/// Shape of the value an intent will encrypt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptTarget {
    Leaf(TypeKind),
    /// Whole array as one encrypted unit
    Array,
    /// Whole sub-document as one encrypted unit
    Object,
}

impl EncryptTarget {
    pub fn bson_type(&self) -> &'static str {
        match self {
            EncryptTarget::Leaf(kind) => kind.bson_type(),
            EncryptTarget::Array => "array",
            EncryptTarget::Object => "object",
        }
    }

    fn supports_deterministic(&self) -> bool {
        match self {
            EncryptTarget::Leaf(kind) => kind.supports_deterministic(),
            _ => false,
        }
    }

    fn supports_range(&self) -> bool {
        match self {
            EncryptTarget::Leaf(kind) => kind.supports_range(),
            _ => false,
        }
    }
}

/// Validated per-field encryption
#[derive(Debug, Clone, PartialEq)]
pub enum EncryptionIntent {
    Csfle {
        key_ids: Vec<KeyId>,
        algorithm: Algorithm,
    },
    Queryable {
        key_id: KeyId,
        queries: Option<ResolvedQueries>,
    },
}

impl EncryptionIntent {
    pub fn mode(&self) -> EncryptionMode {
        match self {
            EncryptionIntent::Csfle { .. } => EncryptionMode::Csfle,
            EncryptionIntent::Queryable { .. } => EncryptionMode::QueryableEncryption,
        }
    }

    /// Keys referenced by this intent, in declaration order
    pub fn key_ids(&self) -> &[KeyId] {
        match self {
            EncryptionIntent::Csfle { key_ids, .. } => key_ids,
            EncryptionIntent::Queryable { key_id, .. } => std::slice::from_ref(key_id),
        }
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        match self {
            EncryptionIntent::Csfle { algorithm, .. } => Some(*algorithm),
            EncryptionIntent::Queryable { .. } => None,
        }
    }
}
