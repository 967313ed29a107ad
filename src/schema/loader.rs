//! Schema loader for declaration files on disk
//!
//! - Definitions are read from `<dir>/*.json`, one definition per file
//! - Every declaration goes through `SchemaBuilder`, so the same checks apply
//! - Sub-schema references resolve across files by definition name
//! - Errors name the file they came from

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::builder::{FieldType, SchemaBuilder};
use super::intent::{EncryptOptions, EncryptionMode, KeyId, KeyIdSpec, QueryOptions, QueryType};
use super::types::{SchemaNode, SchemaOptions, StrictMode, DEFAULT_DISCRIMINATOR_KEY};
use crate::errors::{FleError, FleResult};
use crate::observability::{log_event_with_fields, Event};
use crate::types::{TypeKind, Value};

fn default_id() -> bool {
    true
}

/// One schema declaration file
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub encryption_type: Option<EncryptionMode>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub discriminator_key: Option<String>,
    #[serde(default)]
    pub strict: StrictMode,
    #[serde(default = "default_id")]
    pub id: bool,
    /// Field declarations in file order
    pub fields: Map<String, JsonValue>,
}

impl SchemaDefinition {
    fn options(&self) -> SchemaOptions {
        SchemaOptions {
            encryption_type: self.encryption_type,
            strict: self.strict,
            discriminator_key: self
                .discriminator_key
                .clone()
                .unwrap_or_else(|| DEFAULT_DISCRIMINATOR_KEY.to_string()),
            collection: self.collection.clone(),
            id: self.id,
        }
    }
}

struct Source {
    origin: String,
    definition: SchemaDefinition,
}

/// Schema loader that reads declaration files and keeps the built nodes by name.
pub struct SchemaLoader {
    schema_dir: PathBuf,
    schemas: BTreeMap<String, Arc<SchemaNode>>,
}

impl SchemaLoader {
    pub fn new(schema_dir: &Path) -> Self {
        Self {
            schema_dir: schema_dir.to_path_buf(),
            schemas: BTreeMap::new(),
        }
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Loads every `*.json` definition in the schema directory.
    ///
    /// A missing directory loads nothing.
    pub fn load_all(&mut self) -> FleResult<()> {
        if !self.schema_dir.exists() {
            return Ok(());
        }

        let dir = self.schema_dir.display().to_string();
        let entries = fs::read_dir(&self.schema_dir)
            .map_err(|e| FleError::config(format!("{}: failed to read directory: {}", dir, e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                FleError::config(format!("{}: failed to read directory entry: {}", dir, e))
            })?;
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        let mut pending: HashMap<String, Source> = HashMap::new();
        for path in paths {
            let origin = path.display().to_string();
            let content = fs::read_to_string(&path)
                .map_err(|e| FleError::config(format!("{}: failed to read file: {}", origin, e)))?;
            let definition: SchemaDefinition = serde_json::from_str(&content)
                .map_err(|e| FleError::config(format!("{}: invalid JSON: {}", origin, e)))?;

            if pending.contains_key(&definition.name) || self.schemas.contains_key(&definition.name)
            {
                return Err(FleError::config(format!(
                    "{}: schema '{}' is defined more than once",
                    origin, definition.name
                )));
            }
            pending.insert(definition.name.clone(), Source { origin, definition });
        }

        let mut names: Vec<String> = pending.keys().cloned().collect();
        names.sort();
        for name in names {
            let mut stack = Vec::new();
            self.resolve(&name, &pending, &mut stack)?;
        }

        Ok(())
    }

    /// Registers an in-memory definition; its references must already be loaded.
    pub fn register(&mut self, definition: SchemaDefinition) -> FleResult<Arc<SchemaNode>> {
        if self.schemas.contains_key(&definition.name) {
            return Err(FleError::config(format!(
                "schema '{}' is defined more than once",
                definition.name
            )));
        }
        let name = definition.name.clone();
        let mut pending = HashMap::new();
        pending.insert(
            name.clone(),
            Source {
                origin: "<in-memory>".to_string(),
                definition,
            },
        );
        self.resolve(&name, &pending, &mut Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<Arc<SchemaNode>> {
        self.schemas.get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Loaded definition names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    fn resolve(
        &mut self,
        name: &str,
        pending: &HashMap<String, Source>,
        stack: &mut Vec<String>,
    ) -> FleResult<Arc<SchemaNode>> {
        if let Some(node) = self.schemas.get(name) {
            return Ok(Arc::clone(node));
        }
        if stack.iter().any(|n| n == name) {
            return Err(FleError::config(format!(
                "circular schema reference: {} -> {}",
                stack.join(" -> "),
                name
            )));
        }
        let source = pending
            .get(name)
            .ok_or_else(|| FleError::config(format!("unresolved schema reference '{}'", name)))?;

        stack.push(name.to_string());
        let options = source.definition.options();
        let mut builder = SchemaBuilder::with_options(options.clone());
        for (field, value) in &source.definition.fields {
            self.declare(&mut builder, &options, field, value, pending, stack)
                .map_err(|e| in_file(e, &source.origin))?;
        }
        stack.pop();

        let node = builder.build();
        log_event_with_fields(
            Event::SchemaLoaded,
            &[("schema", name), ("origin", source.origin.as_str())],
        );
        self.schemas.insert(name.to_string(), Arc::clone(&node));
        Ok(node)
    }

    fn declare(
        &mut self,
        builder: &mut SchemaBuilder,
        parent: &SchemaOptions,
        name: &str,
        value: &JsonValue,
        pending: &HashMap<String, Source>,
        stack: &mut Vec<String>,
    ) -> FleResult<()> {
        let map = match value {
            JsonValue::String(type_name) => {
                builder.define_field(name, parse_kind(name, type_name)?, None)?;
                return Ok(());
            }
            JsonValue::Object(map) => map,
            _ => return Err(FleError::intent(name, "invalid field definition")),
        };

        let encrypt = match map.get("encrypt") {
            Some(spec) => Some(parse_encrypt(name, spec)?),
            None => None,
        };

        if let Some(reference) = map.get("schema") {
            let reference = reference
                .as_str()
                .ok_or_else(|| FleError::intent(name, "schema reference must be a name"))?;
            let node = self.resolve(reference, pending, stack)?;
            match encrypt {
                Some(options) => builder.define_encrypted_object(name, node, options)?,
                None => builder.define_subschema(name, node)?,
            };
            return Ok(());
        }

        match map.get("type") {
            Some(JsonValue::String(type_name)) => {
                builder.define_field(name, parse_kind(name, type_name)?, encrypt)?;
            }
            Some(JsonValue::Array(items)) if items.len() == 1 => {
                let element = self.element(parent, name, &items[0], pending, stack)?;
                builder.define_array_field(name, element, encrypt)?;
            }
            Some(_) => {
                return Err(FleError::intent(
                    name,
                    "type must be a type name or a one-element array",
                ))
            }
            None => {
                if encrypt.is_some() {
                    return Err(FleError::intent(name, "encrypt requires a type or schema"));
                }
                let node = self.literal(parent, map, pending, stack)?;
                builder.define_subschema(name, node)?;
            }
        }
        Ok(())
    }

    fn element(
        &mut self,
        parent: &SchemaOptions,
        name: &str,
        value: &JsonValue,
        pending: &HashMap<String, Source>,
        stack: &mut Vec<String>,
    ) -> FleResult<FieldType> {
        match value {
            JsonValue::String(type_name) => Ok(FieldType::Type(parse_kind(name, type_name)?)),
            JsonValue::Object(map) => {
                if let Some(reference) = map.get("schema").and_then(JsonValue::as_str) {
                    return Ok(FieldType::Node(self.resolve(reference, pending, stack)?));
                }
                if let Some(JsonValue::String(type_name)) = map.get("type") {
                    return Ok(FieldType::Type(parse_kind(name, type_name)?));
                }
                Ok(FieldType::Node(self.literal(parent, map, pending, stack)?))
            }
            _ => Err(FleError::intent(name, "invalid array element definition")),
        }
    }

    /// Builds a nested object literal; it shares the parent's mode.
    fn literal(
        &mut self,
        parent: &SchemaOptions,
        fields: &Map<String, JsonValue>,
        pending: &HashMap<String, Source>,
        stack: &mut Vec<String>,
    ) -> FleResult<Arc<SchemaNode>> {
        let options = SchemaOptions {
            encryption_type: parent.encryption_type,
            strict: parent.strict,
            id: false,
            ..SchemaOptions::default()
        };
        let mut builder = SchemaBuilder::with_options(options.clone());
        for (field, value) in fields {
            self.declare(&mut builder, &options, field, value, pending, stack)?;
        }
        Ok(builder.build())
    }
}

fn parse_kind(path: &str, name: &str) -> FleResult<TypeKind> {
    TypeKind::from_name(name)
        .ok_or_else(|| FleError::intent(path, format!("unknown type '{}'", name)))
}

fn parse_key_id(path: &str, value: &JsonValue) -> FleResult<KeyId> {
    match value {
        JsonValue::String(encoded) => KeyId::from_base64(encoded),
        JsonValue::Object(map) => match map.get("$uuid").and_then(JsonValue::as_str) {
            Some(text) => Uuid::parse_str(text)
                .map(KeyId::from)
                .map_err(|e| FleError::config(format!("invalid key id uuid '{}': {}", text, e))),
            None => Err(FleError::intent(path, "key id object must be {\"$uuid\": ...}")),
        },
        _ => Err(FleError::intent(path, "key id must be a base64 string or $uuid")),
    }
}

fn parse_encrypt(path: &str, spec: &JsonValue) -> FleResult<EncryptOptions> {
    let map = spec
        .as_object()
        .ok_or_else(|| FleError::intent(path, "encrypt must be an object"))?;

    let key_id = match map.get("keyId") {
        Some(JsonValue::Array(items)) => KeyIdSpec::Many(
            items
                .iter()
                .map(|item| parse_key_id(path, item))
                .collect::<FleResult<Vec<_>>>()?,
        ),
        Some(single) => KeyIdSpec::One(parse_key_id(path, single)?),
        None => return Err(FleError::intent(path, "encrypt requires keyId")),
    };

    let algorithm = match map.get("algorithm") {
        Some(JsonValue::String(name)) => Some(name.clone()),
        Some(_) => return Err(FleError::intent(path, "algorithm must be a string")),
        None => None,
    };

    let queries = match map.get("queries") {
        Some(q) => Some(parse_queries(path, q)?),
        None => None,
    };

    Ok(EncryptOptions {
        key_id,
        algorithm,
        queries,
    })
}

fn parse_queries(path: &str, spec: &JsonValue) -> FleResult<QueryOptions> {
    let map = spec
        .as_object()
        .ok_or_else(|| FleError::intent(path, "queries must be an object"))?;

    let query_type = match map.get("queryType").and_then(JsonValue::as_str) {
        Some("equality") => QueryType::Equality,
        Some("range") => QueryType::Range,
        Some(other) => {
            return Err(FleError::intent(
                path,
                format!("unknown query type '{}'", other),
            ))
        }
        None => return Err(FleError::intent(path, "queries require queryType")),
    };

    let sparsity = match map.get("sparsity").and_then(JsonValue::as_u64) {
        Some(s) => Some(
            u32::try_from(s).map_err(|_| FleError::intent(path, "sparsity out of range"))?,
        ),
        None => None,
    };

    Ok(QueryOptions {
        query_type,
        contention: map.get("contention").and_then(JsonValue::as_u64),
        sparsity,
        min: map.get("min").map(Value::from_json),
        max: map.get("max").map(Value::from_json),
    })
}

/// Attaches the originating file to a declaration error.
fn in_file(err: FleError, origin: &str) -> FleError {
    match err {
        FleError::IntentValidation { path, reason } => FleError::IntentValidation {
            path,
            reason: format!("{} (in {})", reason, origin),
        },
        FleError::SchemaConflict { path, reason } => FleError::SchemaConflict {
            path,
            reason: format!("{} (in {})", reason, origin),
        },
        FleError::Config(msg) if !msg.starts_with(origin) => {
            FleError::Config(format!("{}: {}", origin, msg))
        }
        other => other,
    }
}
