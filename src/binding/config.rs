//! Auto-encryption options
//!
//! Loaded from a JSON file and validated eagerly. The generated
//! `schema_map` and `encrypted_fields_map` are merged in at connection-open
//! time; everything else passes to the connector untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::{FleError, FleResult};

/// Overrides `extra_options.crypt_shared_lib_path` when loading from a file
pub const CRYPT_SHARED_LIB_PATH_ENV: &str = "AEROFLE_CRYPT_SHARED_LIB_PATH";

/// `db.collection`; the database part has no dots
const NAMESPACE_PATTERN: &str = r"^[^.\s$/\\]+\.[^\s$]+$";

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

/// Validates a `db.collection` namespace.
pub fn validate_namespace(namespace: &str) -> FleResult<()> {
    let pattern = Regex::new(NAMESPACE_PATTERN)
        .map_err(|e| FleError::config(format!("namespace pattern failed to compile: {}", e)))?;
    if pattern.is_match(namespace) {
        Ok(())
    } else {
        Err(FleError::config(format!(
            "invalid namespace '{}', expected 'db.collection'",
            namespace
        )))
    }
}

/// Options for the shared encryption library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraOptions {
    #[serde(default)]
    pub crypt_shared_lib_path: Option<String>,
    #[serde(default)]
    pub crypt_shared_lib_required: bool,
}

/// Driver-level auto-encryption options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoEncryptionOptions {
    /// Key vault collection, `db.collection`
    pub key_vault_namespace: String,

    /// KMS provider credentials; opaque here
    #[serde(default = "empty_object")]
    pub kms_providers: JsonValue,

    #[serde(default)]
    pub bypass_auto_encryption: bool,

    #[serde(default)]
    pub extra_options: ExtraOptions,

    /// CSFLE JSON schemas by namespace
    #[serde(default)]
    pub schema_map: BTreeMap<String, JsonValue>,

    /// QE encrypted fields by namespace
    #[serde(default)]
    pub encrypted_fields_map: BTreeMap<String, JsonValue>,
}

impl AutoEncryptionOptions {
    pub fn new(key_vault_namespace: impl Into<String>, kms_providers: JsonValue) -> Self {
        Self {
            key_vault_namespace: key_vault_namespace.into(),
            kms_providers,
            bypass_auto_encryption: false,
            extra_options: ExtraOptions::default(),
            schema_map: BTreeMap::new(),
            encrypted_fields_map: BTreeMap::new(),
        }
    }

    pub fn with_crypt_shared_lib(mut self, path: impl Into<String>, required: bool) -> Self {
        self.extra_options.crypt_shared_lib_path = Some(path.into());
        self.extra_options.crypt_shared_lib_required = required;
        self
    }

    /// Load options from a JSON file
    pub fn load(path: &Path) -> FleResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FleError::config(format!(
                "failed to read auto-encryption options {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut options: AutoEncryptionOptions = serde_json::from_str(&content).map_err(|e| {
            FleError::config(format!(
                "invalid auto-encryption options {}: {}",
                path.display(),
                e
            ))
        })?;

        if let Ok(lib_path) = std::env::var(CRYPT_SHARED_LIB_PATH_ENV) {
            if !lib_path.is_empty() {
                options.extra_options.crypt_shared_lib_path = Some(lib_path);
            }
        }

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> FleResult<()> {
        validate_namespace(&self.key_vault_namespace)
            .map_err(|e| FleError::config(format!("key_vault_namespace: {}", message(e))))?;

        if !self.kms_providers.is_object() {
            return Err(FleError::config("kms_providers must be an object"));
        }

        if self.extra_options.crypt_shared_lib_required
            && self.extra_options.crypt_shared_lib_path.is_none()
        {
            return Err(FleError::config(
                "crypt_shared_lib_required is set but no crypt_shared_lib_path was given",
            ));
        }

        for namespace in self.schema_map.keys().chain(self.encrypted_fields_map.keys()) {
            validate_namespace(namespace)?;
        }

        Ok(())
    }
}

fn message(err: FleError) -> String {
    match err {
        FleError::Config(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("auto_encryption.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_namespace_validation() {
        assert!(validate_namespace("keyvault.datakeys").is_ok());
        assert!(validate_namespace("db.a.b").is_ok());
        assert!(validate_namespace("keyvault").is_err());
        assert!(validate_namespace(".coll").is_err());
        assert!(validate_namespace("db.").is_err());
        assert!(validate_namespace("my db.coll").is_err());
    }

    #[test]
    fn test_load_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{ "key_vault_namespace": "keyvault.datakeys",
                 "kms_providers": { "local": { "key": "AAAA" } } }"#,
        );
        let options = AutoEncryptionOptions::load(&path).unwrap();
        assert_eq!(options.key_vault_namespace, "keyvault.datakeys");
        assert!(!options.bypass_auto_encryption);
        assert_eq!(options.kms_providers["local"]["key"], "AAAA");
        assert!(options.schema_map.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_namespace() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{ "key_vault_namespace": "datakeys" }"#);
        let err = AutoEncryptionOptions::load(&path).unwrap_err();
        assert_eq!(err.code().code(), "AERO_FLE_CONFIG_ERROR");
        assert!(err.to_string().contains("key_vault_namespace"));
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "{ not json");
        assert!(AutoEncryptionOptions::load(&path).is_err());
    }

    #[test]
    fn test_required_lib_without_path() {
        let mut options = AutoEncryptionOptions::new("kv.keys", json!({}));
        options.extra_options.crypt_shared_lib_required = true;
        assert!(options.validate().is_err());

        let options = options.with_crypt_shared_lib("/opt/lib/mongo_crypt_v1.so", true);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_kms_providers_must_be_object() {
        let options = AutoEncryptionOptions::new("kv.keys", json!("local"));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let options = AutoEncryptionOptions::new("kv.keys", json!({ "local": {} }));
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["key_vault_namespace"], "kv.keys");
        assert_eq!(value["extra_options"]["crypt_shared_lib_required"], false);
    }
}
