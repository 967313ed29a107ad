//! Document casting
//!
//! Walks a schema in lock-step with a document. Leaves dispatch to the type
//! registry; nested objects and arrays recurse. A discriminated document is
//! cast against layers: the base node first, the overlay's fields shadowing
//! or extending it.

use crate::errors::{CastDetails, FleError, FleResult};
use crate::observability::{log_event_with_fields, Event};
use crate::schema::{ElementKind, FieldKind, FieldSpec, SchemaNode, StrictMode};
use crate::types::{self, bson_type, Binary, BinarySubtype, Bson, Document, Value, WireDocument};

use chrono::{TimeZone, Utc};
use uuid::Uuid;

/// Casts an application document to its wire form.
pub fn cast_for_write(node: &SchemaNode, document: &Document) -> FleResult<WireDocument> {
    rejected(write_layers(&[node], document, ""))
}

/// Casts a decrypted wire document back to application values.
pub fn cast_for_read(node: &SchemaNode, document: &WireDocument) -> FleResult<Document> {
    rejected(read_layers(&[node], document, ""))
}

/// Casts against a base node with a discriminator overlay applied.
pub fn cast_for_write_with_overlay(
    base: &SchemaNode,
    overlay: &SchemaNode,
    document: &Document,
) -> FleResult<WireDocument> {
    rejected(write_layers(&[base, overlay], document, ""))
}

/// Read counterpart of `cast_for_write_with_overlay`.
pub fn cast_for_read_with_overlay(
    base: &SchemaNode,
    overlay: &SchemaNode,
    document: &WireDocument,
) -> FleResult<Document> {
    rejected(read_layers(&[base, overlay], document, ""))
}

fn rejected<T>(result: FleResult<T>) -> FleResult<T> {
    if let Err(FleError::Cast(details)) = &result {
        log_event_with_fields(
            Event::CastRejected,
            &[
                ("path", details.path.as_str()),
                ("expected", details.expected.as_str()),
                ("actual", details.actual.as_str()),
            ],
        );
    }
    result
}

/// A field as seen through every layer that declares it
struct MergedField<'a> {
    spec: &'a FieldSpec,
    /// Nested object nodes to merge when the effective field is an object
    layers: Vec<&'a SchemaNode>,
}

/// Fields in base order, overlay-only fields appended; later layers shadow.
fn merged_fields<'a>(layers: &[&'a SchemaNode]) -> Vec<MergedField<'a>> {
    let mut merged: Vec<MergedField<'a>> = Vec::new();
    for node in layers {
        for spec in node.fields() {
            let nested = match &spec.kind {
                FieldKind::Object(child) => Some(child.as_ref()),
                _ => None,
            };
            match merged.iter_mut().find(|m| m.spec.name == spec.name) {
                Some(existing) => {
                    existing.spec = spec;
                    match nested {
                        Some(child) => existing.layers.push(child),
                        None => existing.layers.clear(),
                    }
                }
                None => merged.push(MergedField {
                    spec,
                    layers: nested.into_iter().collect(),
                }),
            }
        }
    }
    merged
}

fn strict_of(layers: &[&SchemaNode]) -> StrictMode {
    layers.first().map_or(StrictMode::default(), |n| n.strict())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn mismatch(path: &str, expected: impl Into<String>, actual: &str) -> FleError {
    FleError::cast(CastDetails::new(path, expected, actual))
}

// =============================================================================
// Write direction
// =============================================================================

fn write_layers(
    layers: &[&SchemaNode],
    document: &Document,
    prefix: &str,
) -> FleResult<WireDocument> {
    let fields = merged_fields(layers);
    let mut out = WireDocument::new();

    for field in &fields {
        if let Some(value) = document.get(&field.spec.name) {
            let path = join(prefix, &field.spec.name);
            out.insert(field.spec.name.clone(), write_field(field, value, &path)?);
        }
    }

    for (name, value) in document {
        if fields.iter().any(|f| &f.spec.name == name) {
            continue;
        }
        let path = join(prefix, name);
        match strict_of(layers) {
            StrictMode::Ignore => {}
            StrictMode::Throw => {
                return Err(FleError::cast(CastDetails::undeclared_field(path)));
            }
            StrictMode::Passthrough => {
                out.insert(name.clone(), passthrough_write(value, &path)?);
            }
        }
    }

    Ok(out)
}

fn write_field(field: &MergedField<'_>, value: &Value, path: &str) -> FleResult<Bson> {
    if value.is_null() {
        return Ok(Bson::Null);
    }
    match &field.spec.kind {
        FieldKind::Leaf(kind) => types::encode(*kind, value).map_err(|e| e.at_path(path)),
        FieldKind::Object(_) => match value {
            Value::Object(doc) => Ok(Bson::Document(write_layers(&field.layers, doc, path)?)),
            other => Err(mismatch(path, "object", other.kind())),
        },
        FieldKind::EncryptedObject(child) => match value {
            Value::Object(doc) => Ok(Bson::Document(write_layers(&[child.as_ref()], doc, path)?)),
            other => Err(mismatch(path, "object", other.kind())),
        },
        FieldKind::Array(element) => match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| write_element(element, item, &format!("{}[{}]", path, i)))
                .collect::<FleResult<Vec<_>>>()
                .map(Bson::Array),
            other => Err(mismatch(path, field.spec.kind.type_name(), other.kind())),
        },
    }
}

fn write_element(element: &ElementKind, value: &Value, path: &str) -> FleResult<Bson> {
    if value.is_null() {
        return Ok(Bson::Null);
    }
    match element {
        ElementKind::Leaf(kind) => types::encode(*kind, value).map_err(|e| e.at_path(path)),
        ElementKind::Object(child) => match value {
            Value::Object(doc) => Ok(Bson::Document(write_layers(&[child.as_ref()], doc, path)?)),
            other => Err(mismatch(path, "object", other.kind())),
        },
    }
}

/// Natural wire form of an undeclared value
fn passthrough_write(value: &Value, path: &str) -> FleResult<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::String(s) => Bson::String(s.clone()),
        Value::Boolean(b) => Bson::Boolean(*b),
        Value::Buffer(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        Value::Date(d) => Bson::DateTime(bson::DateTime::from_chrono(*d)),
        Value::ObjectId(oid) => Bson::ObjectId(*oid),
        Value::BigInt(i) => Bson::Int64(
            i64::try_from(*i).map_err(|_| mismatch(path, "bigint within int64", "bigint"))?,
        ),
        Value::Decimal128(d) => Bson::Decimal128(*d),
        Value::Int32(i) => Bson::Int32(*i),
        Value::Int64(i) => Bson::Int64(*i),
        Value::Double(f) => Bson::Double(*f),
        Value::Uuid(u) => Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: u.as_bytes().to_vec(),
        }),
        Value::Array(items) => Bson::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| passthrough_write(item, &format!("{}[{}]", path, i)))
                .collect::<FleResult<Vec<_>>>()?,
        ),
        Value::Object(doc) => Bson::Document(
            doc.iter()
                .map(|(k, v)| Ok((k.clone(), passthrough_write(v, &join(path, k))?)))
                .collect::<FleResult<WireDocument>>()?,
        ),
    })
}

// =============================================================================
// Read direction
// =============================================================================

fn read_layers(
    layers: &[&SchemaNode],
    document: &WireDocument,
    prefix: &str,
) -> FleResult<Document> {
    let fields = merged_fields(layers);
    let mut out = Document::new();

    for field in &fields {
        if let Some(wire) = document.get(&field.spec.name) {
            let path = join(prefix, &field.spec.name);
            out.insert(field.spec.name.clone(), read_field(field, wire, &path)?);
        }
    }

    for (name, wire) in document {
        if fields.iter().any(|f| &f.spec.name == name) {
            continue;
        }
        match strict_of(layers) {
            StrictMode::Ignore => {}
            StrictMode::Throw => {
                return Err(FleError::cast(CastDetails::undeclared_field(join(
                    prefix, name,
                ))));
            }
            StrictMode::Passthrough => {
                out.insert(name.clone(), passthrough_read(wire));
            }
        }
    }

    Ok(out)
}

fn read_field(field: &MergedField<'_>, wire: &Bson, path: &str) -> FleResult<Value> {
    if *wire == Bson::Null {
        return Ok(Value::Null);
    }
    match &field.spec.kind {
        FieldKind::Leaf(kind) => types::decode(*kind, wire).map_err(|e| e.at_path(path)),
        FieldKind::Object(_) => match wire {
            Bson::Document(doc) => Ok(Value::Object(read_layers(&field.layers, doc, path)?)),
            other => Err(mismatch(path, "object", bson_type(other))),
        },
        FieldKind::EncryptedObject(child) => match wire {
            Bson::Document(doc) => Ok(Value::Object(read_layers(&[child.as_ref()], doc, path)?)),
            other => Err(mismatch(path, "object", bson_type(other))),
        },
        FieldKind::Array(element) => match wire {
            Bson::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| read_element(element, item, &format!("{}[{}]", path, i)))
                .collect::<FleResult<Vec<_>>>()
                .map(Value::Array),
            other => Err(mismatch(path, field.spec.kind.type_name(), bson_type(other))),
        },
    }
}

fn read_element(element: &ElementKind, wire: &Bson, path: &str) -> FleResult<Value> {
    if *wire == Bson::Null {
        return Ok(Value::Null);
    }
    match element {
        ElementKind::Leaf(kind) => types::decode(*kind, wire).map_err(|e| e.at_path(path)),
        ElementKind::Object(child) => match wire {
            Bson::Document(doc) => Ok(Value::Object(read_layers(&[child.as_ref()], doc, path)?)),
            other => Err(mismatch(path, "object", bson_type(other))),
        },
    }
}

/// Natural application form of an undeclared wire value
fn passthrough_read(wire: &Bson) -> Value {
    match wire {
        Bson::Null => Value::Null,
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Boolean(*b),
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => {
            match Uuid::from_slice(&binary.bytes) {
                Ok(u) => Value::Uuid(u),
                Err(_) => Value::Buffer(binary.bytes.clone()),
            }
        }
        Bson::Binary(binary) => Value::Buffer(binary.bytes.clone()),
        Bson::DateTime(dt) => match Utc.timestamp_millis_opt(dt.timestamp_millis()).single() {
            Some(d) => Value::Date(d),
            None => Value::Int64(dt.timestamp_millis()),
        },
        Bson::ObjectId(id) => Value::ObjectId(*id),
        Bson::Int64(i) => Value::Int64(*i),
        Bson::Decimal128(d) => Value::Decimal128(*d),
        Bson::Int32(i) => Value::Int32(*i),
        Bson::Double(f) => Value::Double(*f),
        Bson::Array(items) => Value::Array(items.iter().map(passthrough_read).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), passthrough_read(v)))
                .collect(),
        ),
        // Legacy and server-internal kinds have no application form
        other => Value::String(other.to_string()),
    }
}
