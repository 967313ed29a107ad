//! Compiled encryption descriptors
//!
//! A `CompiledDescriptor` maps fully-qualified field paths to resolved
//! intents for one encryption mode. Entries keep first-visited order, so
//! compiling the same declaration twice yields equal descriptors.

use std::collections::BTreeSet;

use bson::{doc, Bson, Document};
use serde_json::Value as JsonValue;

use crate::schema::{EncryptionIntent, EncryptionMode, KeyId, ResolvedQueries};

/// One encrypted path
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorEntry {
    pub path: String,
    pub bson_type: &'static str,
    pub intent: EncryptionIntent,
}

impl DescriptorEntry {
    fn render_csfle(&self) -> Document {
        let key_ids: Vec<Bson> = self.intent.key_ids().iter().map(KeyId::to_wire).collect();
        let mut encrypt = doc! {
            "keyId": key_ids,
            "bsonType": self.bson_type,
        };
        if let Some(algorithm) = self.intent.algorithm() {
            encrypt.insert("algorithm", algorithm.as_str());
        }
        doc! { "encrypt": encrypt }
    }

    fn render_queryable(&self) -> Document {
        let mut field = doc! { "path": self.path.as_str() };
        if let Some(key_id) = self.intent.key_ids().first() {
            field.insert("keyId", key_id.to_wire());
        }
        field.insert("bsonType", self.bson_type);
        if let EncryptionIntent::Queryable {
            queries: Some(queries),
            ..
        } = &self.intent
        {
            field.insert("queries", render_queries(queries));
        }
        field
    }
}

fn render_queries(queries: &ResolvedQueries) -> Document {
    let mut out = doc! { "queryType": queries.query_type.as_str() };
    if let Some(contention) = queries.contention {
        out.insert("contention", i64::try_from(contention).unwrap_or(i64::MAX));
    }
    if let Some(sparsity) = queries.sparsity {
        out.insert("sparsity", i64::from(sparsity));
    }
    if let Some(min) = &queries.min {
        out.insert("min", min.clone());
    }
    if let Some(max) = &queries.max {
        out.insert("max", max.clone());
    }
    out
}

/// A path collision found while recording or merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Conflict {
    pub path: String,
    pub reason: String,
}

impl Conflict {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// `a.b` and `a.b.c` overlap; `a.b` and `a.bc` do not
fn overlaps(a: &str, b: &str) -> bool {
    let nested = |long: &str, short: &str| {
        long.len() > short.len()
            && long.starts_with(short)
            && long.as_bytes()[short.len()] == b'.'
    };
    nested(a, b) || nested(b, a)
}

/// Encrypted paths for one mode
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDescriptor {
    mode: EncryptionMode,
    entries: Vec<DescriptorEntry>,
    /// Paths of document arrays that contain encrypted leaves
    array_parents: BTreeSet<String>,
}

impl CompiledDescriptor {
    fn new(mode: EncryptionMode) -> Self {
        Self {
            mode,
            entries: Vec::new(),
            array_parents: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Entries in pre-order traversal order
    pub fn entries(&self) -> &[DescriptorEntry] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&DescriptorEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Referenced keys, deduplicated, in first-seen order
    pub fn key_ids(&self) -> Vec<&KeyId> {
        let mut seen: Vec<&KeyId> = Vec::new();
        for entry in &self.entries {
            for key in entry.intent.key_ids() {
                if !seen.contains(&key) {
                    seen.push(key);
                }
            }
        }
        seen
    }

    /// Builds the artifact consumed by the encryption machinery.
    ///
    /// CSFLE builds a JSON schema; QE builds an encrypted fields document.
    pub fn to_document(&self) -> Document {
        match self.mode {
            EncryptionMode::Csfle => {
                let mut properties = Document::new();
                for entry in &self.entries {
                    let segments: Vec<&str> = entry.path.split('.').collect();
                    self.insert_schema(&mut properties, &segments, "", entry);
                }
                doc! { "bsonType": "object", "properties": properties }
            }
            EncryptionMode::QueryableEncryption => {
                let fields: Vec<Document> = self
                    .entries
                    .iter()
                    .map(DescriptorEntry::render_queryable)
                    .collect();
                doc! { "fields": fields }
            }
        }
    }

    /// Canonical extended JSON of `to_document`
    pub fn render(&self) -> JsonValue {
        Bson::Document(self.to_document()).into_canonical_extjson()
    }

    fn insert_schema(
        &self,
        properties: &mut Document,
        segments: &[&str],
        prefix: &str,
        entry: &DescriptorEntry,
    ) {
        let (first, rest) = match segments.split_first() {
            Some(split) => split,
            None => return,
        };
        if rest.is_empty() {
            properties.insert(*first, entry.render_csfle());
            return;
        }

        let path = join(prefix, first);
        let is_array = self.array_parents.contains(&path);
        if !properties.contains_key(*first) {
            let slot = if is_array {
                doc! { "bsonType": "array", "items": { "bsonType": "object", "properties": {} } }
            } else {
                doc! { "bsonType": "object", "properties": {} }
            };
            properties.insert(*first, slot);
        }
        let child = properties.get_document_mut(*first).ok().and_then(|slot| {
            if is_array {
                slot.get_document_mut("items")
                    .ok()
                    .and_then(|items| items.get_document_mut("properties").ok())
            } else {
                slot.get_document_mut("properties").ok()
            }
        });
        if let Some(child) = child {
            self.insert_schema(child, rest, &path, entry);
        }
    }
}

pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Per-mode descriptors for one collection; absent modes stay `None`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorSet {
    csfle: Option<CompiledDescriptor>,
    queryable: Option<CompiledDescriptor>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mode: EncryptionMode) -> Option<&CompiledDescriptor> {
        match mode {
            EncryptionMode::Csfle => self.csfle.as_ref(),
            EncryptionMode::QueryableEncryption => self.queryable.as_ref(),
        }
    }

    pub fn csfle(&self) -> Option<&CompiledDescriptor> {
        self.csfle.as_ref()
    }

    pub fn queryable(&self) -> Option<&CompiledDescriptor> {
        self.queryable.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.csfle.is_none() && self.queryable.is_none()
    }

    /// Present descriptors, CSFLE first
    pub fn iter(&self) -> impl Iterator<Item = &CompiledDescriptor> {
        self.csfle.iter().chain(self.queryable.iter())
    }

    /// Finds the entry for a path in any mode
    pub fn entry(&self, path: &str) -> Option<&DescriptorEntry> {
        self.iter().find_map(|d| d.get(path))
    }

    pub fn path_count(&self) -> usize {
        self.iter().map(CompiledDescriptor::len).sum()
    }

    fn slot(&mut self, mode: EncryptionMode) -> &mut CompiledDescriptor {
        let slot = match mode {
            EncryptionMode::Csfle => &mut self.csfle,
            EncryptionMode::QueryableEncryption => &mut self.queryable,
        };
        slot.get_or_insert_with(|| CompiledDescriptor::new(mode))
    }

    /// Records an encrypted path.
    ///
    /// An identical entry already present is accepted; any other entry at the
    /// same or an overlapping path is a conflict.
    pub(crate) fn record(&mut self, entry: DescriptorEntry) -> Result<(), Conflict> {
        for existing in self.iter().flat_map(|d| d.entries.iter()) {
            if existing.path == entry.path {
                if existing == &entry {
                    return Ok(());
                }
                return Err(Conflict::new(&entry.path, describe_difference(existing, &entry)));
            }
            if overlaps(&existing.path, &entry.path) {
                return Err(Conflict::new(
                    &entry.path,
                    format!("overlaps encrypted path '{}'", existing.path),
                ));
            }
        }
        self.slot(entry.intent.mode()).entries.push(entry);
        Ok(())
    }

    /// Marks `path` as a document array in every descriptor holding paths below it.
    pub(crate) fn mark_array(&mut self, path: &str) {
        let prefix = format!("{}.", path);
        for descriptor in [self.csfle.as_mut(), self.queryable.as_mut()]
            .into_iter()
            .flatten()
        {
            if descriptor.entries.iter().any(|e| e.path.starts_with(&prefix)) {
                descriptor.array_parents.insert(path.to_string());
            }
        }
    }

    /// Folds another set into this one under the same rules as `record`.
    pub(crate) fn absorb(&mut self, other: &DescriptorSet) -> Result<(), Conflict> {
        for descriptor in other.iter() {
            for entry in &descriptor.entries {
                self.record(entry.clone())?;
            }
            for path in &descriptor.array_parents {
                self.mark_array(path);
            }
        }
        Ok(())
    }
}

fn describe_difference(existing: &DescriptorEntry, entry: &DescriptorEntry) -> String {
    if existing.intent.mode() != entry.intent.mode() {
        format!(
            "declared under both {} and {}",
            existing.intent.mode(),
            entry.intent.mode()
        )
    } else if existing.bson_type != entry.bson_type {
        format!(
            "declared with bsonType '{}' and '{}'",
            existing.bson_type, entry.bson_type
        )
    } else if existing.intent.key_ids() != entry.intent.key_ids() {
        "declared with different key ids".to_string()
    } else if existing.intent.algorithm() != entry.intent.algorithm() {
        "declared with different algorithms".to_string()
    } else {
        "declared with different query options".to_string()
    }
}
