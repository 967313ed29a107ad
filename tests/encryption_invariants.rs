//! Encryption Invariant Tests
//!
//! Compilation invariants for schema-declared encryption:
//! - Declaration errors surface before any compilation
//! - Compiling the same tree twice yields equal descriptors
//! - Paths are fully-qualified and carry no array index
//! - Discriminator overlays merge by path
//! - Independent bindings on one collection must agree

use std::sync::Arc;

use aerofle::binding::{bind_collection, merge_for_connection};
use aerofle::compiler::{compile, DiscriminatorOverlay};
use aerofle::errors::FleError;
use aerofle::schema::{
    EncryptOptions, EncryptionMode, KeyId, QueryOptions, SchemaBuilder, SchemaNode,
};
use aerofle::types::TypeKind;
use serde_json::json;

const RANDOM: &str = "AEAD_AES_256_CBC_HMAC_SHA_512-Random";
const DETERMINISTIC: &str = "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic";

// =============================================================================
// Helper Functions
// =============================================================================

fn key(b: u8) -> KeyId {
    KeyId::from_bytes(vec![b; 16])
}

fn csfle(b: u8) -> Option<EncryptOptions> {
    Some(EncryptOptions::key_ids([key(b)]).algorithm(RANDOM))
}

fn qe(b: u8) -> Option<EncryptOptions> {
    Some(EncryptOptions::key_id(key(b)))
}

fn csfle_single(path: &str, kind: TypeKind, b: u8) -> Arc<SchemaNode> {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    builder.define_field(path, kind, csfle(b)).unwrap();
    builder.build()
}

fn overlay_single(path: &str, kind: TypeKind, b: u8) -> Arc<SchemaNode> {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle).without_id();
    builder.define_field(path, kind, csfle(b)).unwrap();
    builder.build()
}

// =============================================================================
// Scenario Tests
// =============================================================================

/// CSFLE field compiles with its key list, algorithm and BSON type.
#[test]
fn test_csfle_field_descriptor() {
    let schema = csfle_single("field", TypeKind::String, 1);
    let set = compile(&schema, &[]).unwrap();

    let descriptor = set.csfle().unwrap();
    let entry = descriptor.get("field").unwrap();
    assert_eq!(entry.bson_type, "string");
    assert_eq!(entry.intent.key_ids(), &[key(1)]);
    assert_eq!(entry.intent.algorithm().unwrap().as_str(), RANDOM);
    assert!(set.queryable().is_none());

    let rendered = descriptor.render();
    let encrypt = &rendered["properties"]["field"]["encrypt"];
    assert_eq!(encrypt["bsonType"], "string");
    assert_eq!(encrypt["algorithm"], RANDOM);
    assert_eq!(encrypt["keyId"].as_array().unwrap().len(), 1);
}

/// QE field compiles with a single key and no algorithm.
#[test]
fn test_queryable_field_descriptor() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::QueryableEncryption);
    builder.define_field("field", TypeKind::String, qe(1)).unwrap();
    let schema = builder.build();

    let set = compile(&schema, &[]).unwrap();
    let descriptor = set.queryable().unwrap();
    let entry = descriptor.get("field").unwrap();
    assert_eq!(entry.intent.key_ids(), &[key(1)]);
    assert!(entry.intent.algorithm().is_none());

    let rendered = descriptor.render();
    let field = &rendered["fields"][0];
    assert_eq!(field["path"], "field");
    assert_eq!(field["bsonType"], "string");
    assert!(field.get("algorithm").is_none());
    assert!(field["keyId"].get("$binary").is_some());
}

/// Base plus two sibling overlays yields all three paths.
#[test]
fn test_discriminator_overlays_merge() {
    let base = csfle_single("name", TypeKind::String, 1);
    let overlays = [
        DiscriminatorOverlay::new("Test", overlay_single("age", TypeKind::Int32, 2)),
        DiscriminatorOverlay::new("Test2", overlay_single("dob", TypeKind::Date, 3)),
    ];

    let set = compile(&base, &overlays).unwrap();
    let descriptor = set.csfle().unwrap();
    let paths: Vec<&str> = descriptor.paths().collect();
    assert_eq!(paths, vec!["name", "age", "dob"]);
    assert_eq!(set.path_count(), 3);
}

/// CSFLE without an algorithm fails at declaration.
#[test]
fn test_csfle_without_algorithm_fails_at_declaration() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    let err = builder
        .define_field(
            "field",
            TypeKind::String,
            Some(EncryptOptions::key_ids([key(1)])),
        )
        .unwrap_err();
    assert!(matches!(err, FleError::IntentValidation { ref path, .. } if path == "field"));
}

// =============================================================================
// Intent Validation Tests
// =============================================================================

/// QE rejects an algorithm.
#[test]
fn test_queryable_rejects_algorithm() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::QueryableEncryption);
    let err = builder
        .define_field(
            "field",
            TypeKind::String,
            Some(EncryptOptions::key_id(key(1)).algorithm(RANDOM)),
        )
        .unwrap_err();
    assert_eq!(err.code().code(), "AERO_FLE_INTENT_INVALID");
}

/// Encrypt without an encryption type is rejected.
#[test]
fn test_encrypt_requires_encryption_type() {
    let mut builder = SchemaBuilder::new();
    assert!(builder
        .define_field("field", TypeKind::String, csfle(1))
        .is_err());
}

/// Deterministic encryption is rejected for doubles.
#[test]
fn test_deterministic_double_rejected() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    let err = builder
        .define_field(
            "score",
            TypeKind::Double,
            Some(EncryptOptions::key_ids([key(1)]).algorithm(DETERMINISTIC)),
        )
        .unwrap_err();
    assert_eq!(err.code().code(), "AERO_FLE_INTENT_INVALID");
}

/// A nested schema cannot carry a leaf intent.
#[test]
fn test_nested_schema_with_intent_rejected() {
    let inner = {
        let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle).without_id();
        builder.define_field("x", TypeKind::String, None).unwrap();
        builder.build()
    };
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    assert!(builder.define_field("nested", inner, csfle(1)).is_err());
}

/// Range queries are rejected on strings.
#[test]
fn test_range_on_string_rejected() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::QueryableEncryption);
    let err = builder
        .define_field(
            "name",
            TypeKind::String,
            Some(EncryptOptions::key_id(key(1)).queries(QueryOptions::range(0, 10))),
        )
        .unwrap_err();
    assert_eq!(err.code().code(), "AERO_FLE_INTENT_INVALID");
}

// =============================================================================
// Determinism Tests
// =============================================================================

/// Compiling the same tree twice yields equal descriptors.
#[test]
fn test_compile_is_idempotent() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    builder
        .define_field("a", TypeKind::String, csfle(1))
        .unwrap()
        .define_field("b.c", TypeKind::Int32, csfle(2))
        .unwrap()
        .define_field("d", TypeKind::Boolean, None)
        .unwrap();
    let schema = builder.build();

    let first = compile(&schema, &[]).unwrap();
    let second = compile(&schema, &[]).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.csfle().unwrap().render(),
        second.csfle().unwrap().render()
    );
}

/// Compilation runs concurrently over a shared tree without interference.
#[test]
fn test_concurrent_compilation() {
    let schema = csfle_single("ssn", TypeKind::String, 1);
    let expected = compile(&schema, &[]).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let schema = Arc::clone(&schema);
            std::thread::spawn(move || compile(&schema, &[]).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

// =============================================================================
// Path Shape Tests
// =============================================================================

/// A field three levels deep is keyed by its dotted path.
#[test]
fn test_three_level_path() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    builder
        .define_field("a.b.c", TypeKind::String, csfle(1))
        .unwrap();
    let set = compile(&builder.build(), &[]).unwrap();

    let descriptor = set.csfle().unwrap();
    assert!(descriptor.contains("a.b.c"));
    assert_eq!(descriptor.len(), 1);

    let rendered = descriptor.render();
    assert_eq!(
        rendered["properties"]["a"]["properties"]["b"]["properties"]["c"]["encrypt"]["bsonType"],
        json!("string")
    );
}

/// An encrypted array is keyed at its own path.
#[test]
fn test_encrypted_array_path() {
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    builder
        .define_array_field("tags", TypeKind::String, csfle(1))
        .unwrap();
    let set = compile(&builder.build(), &[]).unwrap();

    let entry = set.entry("tags").unwrap();
    assert_eq!(entry.bson_type, "array");
    assert_eq!(set.path_count(), 1);
}

/// Fields inside document arrays carry no element index.
#[test]
fn test_document_array_paths() {
    let element = {
        let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle).without_id();
        builder.define_field("ssn", TypeKind::String, csfle(1)).unwrap();
        builder.build()
    };
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    builder
        .define_array_field("people", element, None)
        .unwrap();
    let set = compile(&builder.build(), &[]).unwrap();

    let descriptor = set.csfle().unwrap();
    assert!(descriptor.contains("people.ssn"));
    let rendered = descriptor.render();
    assert_eq!(rendered["properties"]["people"]["bsonType"], "array");
    assert!(rendered["properties"]["people"]["items"]["properties"]["ssn"]["encrypt"].is_object());
}

// =============================================================================
// Conflict Tests
// =============================================================================

/// A shared sub-schema under two parents compiles to two paths.
#[test]
fn test_shared_subschema() {
    let address = {
        let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle).without_id();
        builder.define_field("zip", TypeKind::String, csfle(1)).unwrap();
        builder.build()
    };
    let mut builder = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    builder
        .define_subschema("home", Arc::clone(&address))
        .unwrap()
        .define_subschema("work", address)
        .unwrap();
    let set = compile(&builder.build(), &[]).unwrap();
    assert!(set.entry("home.zip").is_some());
    assert!(set.entry("work.zip").is_some());
}

/// An overlay redeclaring a base path with other keys conflicts.
#[test]
fn test_overlay_key_conflict() {
    let base = csfle_single("name", TypeKind::String, 1);
    let overlay = DiscriminatorOverlay::new("Test", overlay_single("name", TypeKind::String, 9));
    let err = compile(&base, &[overlay]).unwrap_err();
    assert!(matches!(err, FleError::SchemaConflict { ref path, .. } if path == "name"));
}

/// An overlay redeclaring a base path identically is accepted.
#[test]
fn test_overlay_identical_redeclaration() {
    let base = csfle_single("name", TypeKind::String, 1);
    let overlay = DiscriminatorOverlay::new("Test", overlay_single("name", TypeKind::String, 1));
    let set = compile(&base, &[overlay]).unwrap();
    assert_eq!(set.path_count(), 1);
}

/// An overlay scalar cannot sit above an encrypted base path.
#[test]
fn test_overlay_scalar_shadows_encrypted_descendant() {
    let base = csfle_single("a.b.c", TypeKind::String, 1);
    let mut plain = SchemaBuilder::new().without_id();
    plain.define_field("a", TypeKind::String, None).unwrap();
    let overlay = DiscriminatorOverlay::new("Sub", plain.build());
    let err = compile(&base, &[overlay]).unwrap_err();
    assert!(matches!(err, FleError::SchemaConflict { ref path, .. } if path == "a"));
}

/// An overlay cannot encrypt below a field the base declares as a scalar.
#[test]
fn test_overlay_encrypts_below_base_scalar() {
    let mut base = SchemaBuilder::with_encryption(EncryptionMode::Csfle);
    base.define_field("a", TypeKind::String, None).unwrap();
    let overlay = DiscriminatorOverlay::new("Sub", overlay_single("a.b.c", TypeKind::String, 1));
    let err = compile(&base.build(), &[overlay]).unwrap_err();
    assert!(matches!(err, FleError::SchemaConflict { ref path, .. } if path == "a"));
}

/// Two bindings on one collection must agree.
#[test]
fn test_collection_conflict() {
    let a = bind_collection("users", &csfle_single("ssn", TypeKind::String, 1), &[]).unwrap();
    let b = bind_collection("users", &csfle_single("ssn", TypeKind::String, 2), &[]).unwrap();
    let err = merge_for_connection(vec![a, b]).unwrap_err();
    assert!(matches!(
        err,
        FleError::CollectionConflict { ref collection, ref path, .. }
            if collection == "users" && path == "ssn"
    ));
}

/// Identical bindings on one collection merge.
#[test]
fn test_collection_identical_bindings() {
    let a = bind_collection("users", &csfle_single("ssn", TypeKind::String, 1), &[]).unwrap();
    let b = bind_collection("users", &csfle_single("ssn", TypeKind::String, 1), &[]).unwrap();
    let config = merge_for_connection(vec![a, b]).unwrap();
    assert_eq!(config.collection("users").unwrap().path_count(), 1);
}

/// The same collection cannot hold one path under both modes.
#[test]
fn test_mixed_modes_on_one_collection() {
    let queryable = {
        let mut builder = SchemaBuilder::with_encryption(EncryptionMode::QueryableEncryption);
        builder.define_field("ssn", TypeKind::String, qe(1)).unwrap();
        builder.build()
    };
    let a = bind_collection("users", &csfle_single("ssn", TypeKind::String, 1), &[]).unwrap();
    let b = bind_collection("users", &queryable, &[]).unwrap();
    let err = merge_for_connection(vec![a, b]).unwrap_err();
    assert_eq!(err.code().code(), "AERO_FLE_COLLECTION_CONFLICT");
}
