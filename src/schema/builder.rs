//! Schema declaration
//!
//! `SchemaBuilder` accepts field declarations in any order, validates each
//! one eagerly and produces an immutable `SchemaNode`. Dotted paths create
//! intermediate nested objects, so `define_field("a.b.c", ...)` declares
//! `c` inside `b` inside `a`.

use std::sync::Arc;

use super::intent::{EncryptOptions, EncryptTarget, EncryptionMode};
use super::types::{ElementKind, FieldKind, FieldSpec, SchemaNode, SchemaOptions, StrictMode};
use crate::errors::{FleError, FleResult};
use crate::observability::{Event, Logger};
use crate::types::TypeKind;

/// A field's declared type: a leaf kind or a schema node
#[derive(Debug, Clone)]
pub enum FieldType {
    Type(TypeKind),
    Node(Arc<SchemaNode>),
}

impl From<TypeKind> for FieldType {
    fn from(kind: TypeKind) -> Self {
        FieldType::Type(kind)
    }
}

impl From<Arc<SchemaNode>> for FieldType {
    fn from(node: Arc<SchemaNode>) -> Self {
        FieldType::Node(node)
    }
}

#[derive(Debug)]
enum Pending {
    Nested(PendingNode),
    Field(FieldSpec),
}

#[derive(Debug, Default)]
struct PendingNode {
    fields: Vec<(String, Pending)>,
}

impl PendingNode {
    fn get_mut(&mut self, name: &str) -> Option<&mut Pending> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }
}

/// Builder producing a frozen `SchemaNode`
#[derive(Debug)]
pub struct SchemaBuilder {
    root: PendingNode,
    options: SchemaOptions,
}

impl SchemaBuilder {
    /// A schema without encryption
    pub fn new() -> Self {
        Self::with_options(SchemaOptions::default())
    }

    /// A schema whose encrypted fields use the given mode
    pub fn with_encryption(mode: EncryptionMode) -> Self {
        Self::with_options(SchemaOptions {
            encryption_type: Some(mode),
            ..SchemaOptions::default()
        })
    }

    pub fn with_options(options: SchemaOptions) -> Self {
        Self {
            root: PendingNode::default(),
            options,
        }
    }

    pub fn strict(mut self, strict: StrictMode) -> Self {
        self.options.strict = strict;
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.options.collection = Some(collection.into());
        self
    }

    pub fn discriminator_key(mut self, key: impl Into<String>) -> Self {
        self.options.discriminator_key = key.into();
        self
    }

    /// Omits the implicit `_id` field
    pub fn without_id(mut self) -> Self {
        self.options.id = false;
        self
    }

    /// Declares a leaf field, or a nested node without encryption.
    ///
    /// Encryption on a node-typed field must go through
    /// `define_encrypted_object`.
    pub fn define_field(
        &mut self,
        path: &str,
        field_type: impl Into<FieldType>,
        encrypt: Option<EncryptOptions>,
    ) -> FleResult<&mut Self> {
        match field_type.into() {
            FieldType::Type(kind) => {
                let intent = self.resolve(encrypt, path, EncryptTarget::Leaf(kind))?;
                self.insert(path, FieldKind::Leaf(kind), intent)?;
                Ok(self)
            }
            FieldType::Node(node) => {
                if encrypt.is_some() {
                    return Err(FleError::intent(
                        path,
                        "encryption cannot be attached to a nested schema field; \
                         declare the whole object as an encrypted leaf instead",
                    ));
                }
                self.define_subschema(path, node)
            }
        }
    }

    /// Declares a nested sub-schema shared by reference.
    pub fn define_subschema(&mut self, path: &str, node: Arc<SchemaNode>) -> FleResult<&mut Self> {
        self.check_mode_compatible(path, &node)?;
        self.insert(path, FieldKind::Object(node), None)?;
        Ok(self)
    }

    /// Declares a homogeneous array of leaves or sub-documents.
    ///
    /// An intent on the array encrypts the whole array as one unit.
    pub fn define_array_field(
        &mut self,
        path: &str,
        element: impl Into<FieldType>,
        encrypt: Option<EncryptOptions>,
    ) -> FleResult<&mut Self> {
        let element = match element.into() {
            FieldType::Type(kind) => ElementKind::Leaf(kind),
            FieldType::Node(node) => {
                self.check_mode_compatible(path, &node)?;
                if encrypt.is_some() && node.has_encrypted_fields() {
                    return Err(FleError::intent(
                        path,
                        "an encrypted array cannot contain encrypted fields",
                    ));
                }
                ElementKind::Object(node)
            }
        };
        let intent = self.resolve(encrypt, path, EncryptTarget::Array)?;
        self.insert(path, FieldKind::Array(element), intent)?;
        Ok(self)
    }

    /// Declares a nested object stored as one encrypted value.
    pub fn define_encrypted_object(
        &mut self,
        path: &str,
        node: Arc<SchemaNode>,
        encrypt: EncryptOptions,
    ) -> FleResult<&mut Self> {
        if node.has_encrypted_fields() {
            return Err(FleError::intent(
                path,
                "an encrypted object cannot contain encrypted fields",
            ));
        }
        let intent = self.resolve(Some(encrypt), path, EncryptTarget::Object)?;
        self.insert(path, FieldKind::EncryptedObject(node), intent)?;
        Ok(self)
    }

    /// Freezes the declaration.
    pub fn build(self) -> Arc<SchemaNode> {
        let mut fields = freeze(self.root, &self.options);
        if self.options.id && !fields.iter().any(|f| f.name == "_id") {
            fields.insert(
                0,
                FieldSpec {
                    name: "_id".to_string(),
                    kind: FieldKind::Leaf(TypeKind::ObjectId),
                    intent: None,
                },
            );
        }

        let node = SchemaNode {
            fields,
            options: self.options,
        };

        let field_count = node.fields.len().to_string();
        let mode = node
            .encryption_type()
            .map(|m| m.as_str())
            .unwrap_or("none");
        Logger::trace(
            Event::SchemaDeclared.as_str(),
            &[("fields", field_count.as_str()), ("encryption_type", mode)],
        );

        Arc::new(node)
    }

    fn resolve(
        &self,
        encrypt: Option<EncryptOptions>,
        path: &str,
        target: EncryptTarget,
    ) -> FleResult<Option<super::intent::EncryptionIntent>> {
        match encrypt {
            Some(options) => options
                .resolve(self.options.encryption_type, path, target)
                .map(Some),
            None => Ok(None),
        }
    }

    fn check_mode_compatible(&self, path: &str, node: &SchemaNode) -> FleResult<()> {
        if !node.has_encrypted_fields() {
            return Ok(());
        }
        if node.encryption_type() != self.options.encryption_type {
            return Err(FleError::intent(
                path,
                format!(
                    "nested schema encryption type '{}' does not match parent '{}'",
                    mode_name(node.encryption_type()),
                    mode_name(self.options.encryption_type)
                ),
            ));
        }
        Ok(())
    }

    fn insert(
        &mut self,
        path: &str,
        kind: FieldKind,
        intent: Option<super::intent::EncryptionIntent>,
    ) -> FleResult<()> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FleError::intent(path, "invalid field path"));
        }

        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(FleError::intent(path, "invalid field path")),
        };

        let mut node = &mut self.root;
        for segment in parents {
            if !node.contains(segment) {
                node.fields
                    .push((segment.to_string(), Pending::Nested(PendingNode::default())));
            }
            node = match node.get_mut(segment) {
                Some(Pending::Nested(child)) => child,
                _ => {
                    return Err(FleError::schema_conflict(
                        path,
                        format!("'{}' is already declared as a non-object field", segment),
                    ))
                }
            };
        }

        if node.contains(last) {
            return Err(FleError::schema_conflict(path, "path is already declared"));
        }

        node.fields.push((
            last.to_string(),
            Pending::Field(FieldSpec {
                name: last.to_string(),
                kind,
                intent,
            }),
        ));
        Ok(())
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn mode_name(mode: Option<EncryptionMode>) -> &'static str {
    mode.map(|m| m.as_str()).unwrap_or("none")
}

/// Converts pending nodes; inline nested objects share the root's mode.
fn freeze(pending: PendingNode, root: &SchemaOptions) -> Vec<FieldSpec> {
    pending
        .fields
        .into_iter()
        .map(|(name, p)| match p {
            Pending::Field(spec) => spec,
            Pending::Nested(child) => {
                let options = SchemaOptions {
                    encryption_type: root.encryption_type,
                    strict: root.strict,
                    id: false,
                    ..SchemaOptions::default()
                };
                FieldSpec {
                    name,
                    kind: FieldKind::Object(Arc::new(SchemaNode {
                        fields: freeze(child, root),
                        options,
                    })),
                    intent: None,
                }
            }
        })
        .collect()
}
