//! Models
//!
//! A model binds a schema to a collection and carries the discriminator
//! overlays registered against it. The discriminator value stored in the
//! document selects which overlay a document is cast through.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::caster::{
    cast_for_read, cast_for_read_with_overlay, cast_for_write, cast_for_write_with_overlay,
};
use crate::compiler::{compile, DiscriminatorOverlay};
use crate::errors::{CastDetails, FleError, FleResult};
use crate::observability::{log_event_with_fields, Event};
use crate::schema::SchemaNode;
use crate::types::{bson_type, Bson, Document, Value, WireDocument};

use super::collection::{bind_collection, CollectionBinding};

/// A schema bound to a collection
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    collection: String,
    schema: Arc<SchemaNode>,
    discriminators: Vec<DiscriminatorOverlay>,
}

impl Model {
    /// Binds `schema` under `name`; the collection defaults to the pluralized name.
    pub fn new(name: impl Into<String>, schema: Arc<SchemaNode>) -> Self {
        let name = name.into();
        let collection = schema
            .collection()
            .map(str::to_string)
            .unwrap_or_else(|| pluralize(&name));
        Self {
            name,
            collection,
            schema,
            discriminators: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &Arc<SchemaNode> {
        &self.schema
    }

    pub fn discriminators(&self) -> &[DiscriminatorOverlay] {
        &self.discriminators
    }

    pub fn discriminator_key(&self) -> &str {
        self.schema.discriminator_key()
    }

    /// Registers a discriminator overlay.
    ///
    /// The overlay is compiled against the base and every overlay already
    /// registered; a conflict leaves the model unchanged.
    pub fn discriminator(
        &mut self,
        name: impl Into<String>,
        schema: Arc<SchemaNode>,
    ) -> FleResult<&mut Self> {
        let name = name.into();

        if name == self.name || self.discriminators.iter().any(|d| d.name == name) {
            return Err(FleError::DuplicateModel(name));
        }

        if let Some(mode) = schema.encryption_type() {
            if self.schema.encryption_type() != Some(mode) {
                let base = self
                    .schema
                    .encryption_type()
                    .map(|m| m.as_str())
                    .unwrap_or("none");
                return Err(FleError::intent(
                    "",
                    format!(
                        "discriminator '{}' uses encryption type {} but the base schema uses {}",
                        name, mode, base
                    ),
                ));
            }
        }

        let mut overlays = self.discriminators.clone();
        overlays.push(DiscriminatorOverlay::new(name.clone(), schema));
        compile(&self.schema, &overlays)?;

        self.discriminators = overlays;
        log_event_with_fields(
            Event::DiscriminatorBound,
            &[
                ("model", self.name.as_str()),
                ("discriminator", name.as_str()),
                ("collection", self.collection.as_str()),
            ],
        );
        Ok(self)
    }

    /// Compiles this model for connection-level merging.
    pub fn bind(&self) -> FleResult<CollectionBinding> {
        bind_collection(&self.collection, &self.schema, &self.discriminators)
    }

    /// Casts a document for writing.
    ///
    /// A discriminator value in the document selects its overlay, and the
    /// value is carried through to the wire document.
    pub fn cast_for_write(&self, document: &Document) -> FleResult<WireDocument> {
        let key = self.discriminator_key();
        match document.get(key) {
            None | Some(Value::Null) => cast_for_write(&self.schema, document),
            Some(Value::String(value)) => self.write_as(value, document),
            Some(other) => Err(FleError::cast(CastDetails::new(key, "string", other.kind()))),
        }
    }

    /// Casts a document for writing through a named discriminator.
    pub fn cast_for_write_as(
        &self,
        discriminator: &str,
        document: &Document,
    ) -> FleResult<WireDocument> {
        self.write_as(discriminator, document)
    }

    /// Casts a decrypted document for reading.
    pub fn cast_for_read(&self, document: &WireDocument) -> FleResult<Document> {
        let key = self.discriminator_key();
        let value = match document.get(key) {
            None | Some(Bson::Null) => return cast_for_read(&self.schema, document),
            Some(Bson::String(value)) => value,
            Some(other) => {
                return Err(FleError::cast(CastDetails::new(key, "string", bson_type(other))))
            }
        };

        let overlay = self.overlay(value)?;
        let mut stripped = document.clone();
        stripped.remove(key);
        let mut cast = cast_for_read_with_overlay(&self.schema, &overlay.node, &stripped)?;
        cast.insert(key.to_string(), Value::String(overlay.name.clone()));
        Ok(cast)
    }

    /// Casts each document independently; one failure never affects the rest.
    pub fn cast_many_for_write(&self, documents: &[Document]) -> Vec<FleResult<WireDocument>> {
        documents.iter().map(|d| self.cast_for_write(d)).collect()
    }

    pub fn cast_many_for_read(&self, documents: &[WireDocument]) -> Vec<FleResult<Document>> {
        documents.iter().map(|d| self.cast_for_read(d)).collect()
    }

    fn write_as(&self, discriminator: &str, document: &Document) -> FleResult<WireDocument> {
        let key = self.discriminator_key();
        let overlay = self.overlay(discriminator)?;
        let mut stripped = document.clone();
        stripped.remove(key);
        let mut cast = cast_for_write_with_overlay(&self.schema, &overlay.node, &stripped)?;
        cast.insert(key, overlay.name.as_str());
        Ok(cast)
    }

    fn overlay(&self, value: &str) -> FleResult<&DiscriminatorOverlay> {
        self.discriminators
            .iter()
            .find(|d| d.name == value)
            .ok_or_else(|| {
                FleError::cast(CastDetails::new(
                    self.discriminator_key(),
                    "registered discriminator",
                    format!("'{}'", value),
                ))
            })
    }
}

const UNCOUNTABLES: &[&str] = &[
    "advice",
    "energy",
    "excretion",
    "digestion",
    "cooperation",
    "health",
    "justice",
    "labour",
    "machinery",
    "equipment",
    "information",
    "pollution",
    "sewage",
    "paper",
    "money",
    "species",
    "series",
    "rain",
    "rice",
    "fish",
    "sheep",
    "moose",
    "deer",
    "news",
    "expertise",
    "status",
    "media",
];

/// First matching rule wins
const PLURAL_RULES: &[(&str, &str)] = &[
    ("(m)an$", "${1}en"),
    ("(pe)rson$", "${1}ople"),
    ("(child)$", "${1}ren"),
    ("^(ox)$", "${1}en"),
    ("(ax|test)is$", "${1}es"),
    ("(octop|vir)us$", "${1}i"),
    ("(alias|status)$", "${1}es"),
    ("(bu)s$", "${1}ses"),
    ("(buffal|tomat|potat)o$", "${1}oes"),
    ("([ti])um$", "${1}a"),
    ("sis$", "ses"),
    ("(?:([^f])fe|([lr])f)$", "${1}${2}ves"),
    ("(hi|ti)ve$", "${1}ves"),
    ("([^aeiouy]|qu)y$", "${1}ies"),
    ("(x|ch|ss|sh)$", "${1}es"),
    ("(matr|vert|ind)ix|ex$", "${1}ices"),
    ("([m|l])ouse$", "${1}ice"),
    ("(kn|w|l)ife$", "${1}ives"),
    ("(quiz)$", "${1}zes"),
    ("s$", "s"),
    ("([^a-z])$", "${1}"),
    ("$", "s"),
];

fn plural_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        PLURAL_RULES
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect()
    })
}

/// Default collection name for a model: lowercased and pluralized.
///
/// `Category` becomes `categories`; a name ending in a non-letter such as
/// `Model1` is only lowercased.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if UNCOUNTABLES.contains(&lower.as_str()) {
        return lower;
    }
    plural_rules()
        .iter()
        .find(|(re, _)| re.is_match(&lower))
        .map(|(re, replacement)| re.replace(&lower, *replacement).into_owned())
        .unwrap_or(lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EncryptOptions, EncryptionMode, KeyId, SchemaBuilder};
    use crate::types::TypeKind;

    const RANDOM: &str = "AEAD_AES_256_CBC_HMAC_SHA_512-Random";

    fn csfle(b: u8) -> Option<EncryptOptions> {
        Some(EncryptOptions::key_ids([KeyId::from_bytes(vec![b; 16])]).algorithm(RANDOM))
    }

    fn base() -> Arc<SchemaNode> {
        let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
        builder
            .define_field("name", TypeKind::String, csfle(1))
            .unwrap();
        builder.build()
    }

    fn overlay(field: &str, kind: TypeKind) -> Arc<SchemaNode> {
        let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle).without_id();
        builder.define_field(field, kind, csfle(2)).unwrap();
        builder.build()
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("Schema"), "schemas");
        assert_eq!(pluralize("Model1"), "model1");
        assert_eq!(pluralize("Category"), "categories");
        assert_eq!(pluralize("User"), "users");
        assert_eq!(pluralize("Person"), "people");
        assert_eq!(pluralize("Box"), "boxes");
        assert_eq!(pluralize("Address"), "addresses");
        assert_eq!(pluralize("Sheep"), "sheep");
        assert_eq!(pluralize("Status"), "status");
    }

    #[test]
    fn test_collection_defaults() {
        let model = Model::new("Schema", base());
        assert_eq!(model.collection(), "schemas");

        let named = SchemaBuilder::new().collection("people_v2").build();
        let model = Model::new("Person", named);
        assert_eq!(model.collection(), "people_v2");
    }

    #[test]
    fn test_discriminator_registration() {
        let mut model = Model::new("Schema", base());
        model
            .discriminator("Test", overlay("age", TypeKind::Int32))
            .unwrap();
        assert_eq!(model.discriminators().len(), 1);

        let binding = model.bind().unwrap();
        assert_eq!(binding.descriptors().path_count(), 2);
    }

    #[test]
    fn test_duplicate_discriminator_rejected() {
        let mut model = Model::new("Schema", base());
        model
            .discriminator("Test", overlay("age", TypeKind::Int32))
            .unwrap();
        let err = model
            .discriminator("Test", overlay("score", TypeKind::Double))
            .unwrap_err();
        assert_eq!(err, FleError::DuplicateModel("Test".to_string()));
    }

    #[test]
    fn test_conflicting_discriminator_leaves_model_unchanged() {
        let mut model = Model::new("Schema", base());
        let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle).without_id();
        builder
            .define_field("name", TypeKind::Int32, csfle(1))
            .unwrap();
        let err = model.discriminator("Test", builder.build()).unwrap_err();
        assert_eq!(err.code().code(), "AERO_FLE_SCHEMA_CONFLICT");
        assert!(model.discriminators().is_empty());
    }

    #[test]
    fn test_mode_mismatch_rejected() {
        let mut model = Model::new("Schema", base());
        let mut builder =
            SchemaBuilder::with_encryption(EncryptionMode::QueryableEncryption).without_id();
        builder
            .define_field(
                "age",
                TypeKind::Int32,
                Some(EncryptOptions::key_id(KeyId::from_bytes(vec![3; 16]))),
            )
            .unwrap();
        let err = model.discriminator("Test", builder.build()).unwrap_err();
        assert_eq!(err.code().code(), "AERO_FLE_INTENT_INVALID");
    }

    #[test]
    fn test_write_stamps_discriminator() {
        let mut model = Model::new("Schema", base());
        model
            .discriminator("Test", overlay("age", TypeKind::Int32))
            .unwrap();

        let mut doc = Document::new();
        doc.insert("name".to_string(), Value::from("ada"));
        doc.insert("age".to_string(), Value::Int32(36));

        let wire = model.cast_for_write_as("Test", &doc).unwrap();
        assert_eq!(wire.get("__t"), Some(&Bson::String("Test".to_string())));
        assert_eq!(wire.get("age"), Some(&Bson::Int32(36)));

        let back = model.cast_for_read(&wire).unwrap();
        assert_eq!(back, {
            let mut expected = doc.clone();
            expected.insert("__t".to_string(), Value::from("Test"));
            expected
        });
    }

    #[test]
    fn test_unknown_discriminator_value_rejected() {
        let model = Model::new("Schema", base());
        let mut doc = Document::new();
        doc.insert("__t".to_string(), Value::from("Missing"));
        let err = model.cast_for_write(&doc).unwrap_err();
        assert_eq!(err.details().unwrap().path, "__t");
    }

    #[test]
    fn test_batch_cast_isolates_failures() {
        let model = Model::new("Schema", base());
        let mut good = Document::new();
        good.insert("name".to_string(), Value::from("ada"));
        let mut bad = Document::new();
        bad.insert("name".to_string(), Value::Int32(7));

        let results = model.cast_many_for_write(&[good.clone(), bad, good]);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
