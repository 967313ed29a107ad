//! Collection binding and connection-level merging
//!
//! Each model compiles its schema (with discriminator overlays) into a
//! `CollectionBinding`. At connection-open time all bindings are folded into
//! one `ConnectionEncryptionConfig`, keyed by collection. Two models on the
//! same collection must agree on every encrypted path they both declare.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::compiler::{compile, Conflict, DescriptorSet, DiscriminatorOverlay};
use crate::errors::{FleError, FleResult};
use crate::observability::{log_event_with_fields, Event};
use crate::schema::SchemaNode;

use super::config::{validate_namespace, AutoEncryptionOptions};

/// Compiled descriptors for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionBinding {
    collection: String,
    descriptors: DescriptorSet,
}

impl CollectionBinding {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }
}

/// Compiles `base` plus its overlays for `collection`.
pub fn bind_collection(
    collection: &str,
    base: &SchemaNode,
    overlays: &[DiscriminatorOverlay],
) -> FleResult<CollectionBinding> {
    let descriptors = compile(base, overlays)?;

    let paths = descriptors.path_count().to_string();
    log_event_with_fields(
        Event::CollectionBound,
        &[("collection", collection), ("encrypted_paths", paths.as_str())],
    );

    Ok(CollectionBinding {
        collection: collection.to_string(),
        descriptors,
    })
}

/// Folds bindings into one per-collection map.
///
/// Bindings on distinct collections never interact. Bindings on the same
/// collection are merged; identical declarations are accepted once and any
/// disagreement is a `CollectionConflict`.
pub fn merge_for_connection(
    bindings: Vec<CollectionBinding>,
) -> FleResult<ConnectionEncryptionConfig> {
    let mut collections: BTreeMap<String, DescriptorSet> = BTreeMap::new();

    for binding in bindings {
        let merged = collections.entry(binding.collection.clone()).or_default();
        merged
            .absorb(&binding.descriptors)
            .map_err(|Conflict { path, reason }| {
                FleError::collection_conflict(&binding.collection, path, reason)
            })?;
    }

    // Collections without any encrypted path contribute nothing
    collections.retain(|_, set| !set.is_empty());

    Ok(ConnectionEncryptionConfig { collections })
}

/// Encryption configuration for every collection on one connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionEncryptionConfig {
    collections: BTreeMap<String, DescriptorSet>,
}

impl ConnectionEncryptionConfig {
    pub fn collection(&self, name: &str) -> Option<&DescriptorSet> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> impl Iterator<Item = (&str, &DescriptorSet)> {
        self.collections.iter().map(|(name, set)| (name.as_str(), set))
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// CSFLE JSON schemas keyed by `db.collection`
    pub fn schema_map(&self, db: &str) -> BTreeMap<String, JsonValue> {
        self.collections
            .iter()
            .filter_map(|(name, set)| {
                set.csfle()
                    .map(|d| (format!("{}.{}", db, name), d.render()))
            })
            .collect()
    }

    /// QE encrypted-fields documents keyed by `db.collection`
    pub fn encrypted_fields_map(&self, db: &str) -> BTreeMap<String, JsonValue> {
        self.collections
            .iter()
            .filter_map(|(name, set)| {
                set.queryable()
                    .map(|d| (format!("{}.{}", db, name), d.render()))
            })
            .collect()
    }

    /// Merges the generated maps into user-supplied options.
    ///
    /// User entries for namespaces this connection does not generate are
    /// kept. A user entry for a generated namespace is a conflict.
    pub fn into_auto_encryption(
        &self,
        db: &str,
        mut options: AutoEncryptionOptions,
    ) -> FleResult<AutoEncryptionOptions> {
        options.validate()?;

        for (namespace, schema) in self.schema_map(db) {
            validate_namespace(&namespace)?;
            if options.schema_map.contains_key(&namespace) {
                return Err(user_entry_conflict(db, &namespace, "schema_map"));
            }
            options.schema_map.insert(namespace, schema);
        }

        for (namespace, fields) in self.encrypted_fields_map(db) {
            validate_namespace(&namespace)?;
            if options.encrypted_fields_map.contains_key(&namespace) {
                return Err(user_entry_conflict(db, &namespace, "encrypted_fields_map"));
            }
            options.encrypted_fields_map.insert(namespace, fields);
        }

        let csfle = options.schema_map.len().to_string();
        let qe = options.encrypted_fields_map.len().to_string();
        log_event_with_fields(
            Event::ConnectionConfigBuilt,
            &[
                ("db", db),
                ("schema_map", csfle.as_str()),
                ("encrypted_fields_map", qe.as_str()),
            ],
        );

        Ok(options)
    }
}

fn user_entry_conflict(db: &str, namespace: &str, map: &str) -> FleError {
    let collection = namespace
        .strip_prefix(db)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(namespace);
    FleError::collection_conflict(
        collection,
        "",
        format!("{} already holds a user-supplied entry for '{}'", map, namespace),
    )
}
