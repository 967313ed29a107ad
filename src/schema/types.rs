//! Schema tree definitions
//!
//! A `SchemaNode` is an ordered list of `FieldSpec`s plus node options. Nodes
//! are immutable once built; nested and sub-schema nodes are shared through
//! `Arc`, so one sub-schema may sit under several parents and overlays.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::intent::{EncryptionIntent, EncryptionMode};
use crate::types::TypeKind;

/// Default discriminator field name
pub const DEFAULT_DISCRIMINATOR_KEY: &str = "__t";

/// Handling of document fields the schema does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrictMode {
    /// Drop undeclared fields
    #[default]
    Ignore,
    /// Reject documents carrying undeclared fields
    Throw,
    /// Copy undeclared fields through unchanged
    Passthrough,
}

/// Node-level options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Encryption mode for every intent declared in this node's subtree
    pub encryption_type: Option<EncryptionMode>,
    pub strict: StrictMode,
    pub discriminator_key: String,
    /// Explicit collection name; otherwise derived from the model name
    pub collection: Option<String>,
    /// Declare an implicit `_id: objectid` field
    pub id: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            encryption_type: None,
            strict: StrictMode::default(),
            discriminator_key: DEFAULT_DISCRIMINATOR_KEY.to_string(),
            collection: None,
            id: true,
        }
    }
}

/// Array element shape
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Leaf(TypeKind),
    Object(Arc<SchemaNode>),
}

/// Field shape
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Leaf(TypeKind),
    /// Nested object literal or sub-schema reference
    Object(Arc<SchemaNode>),
    /// Nested object encrypted as a single leaf
    EncryptedObject(Arc<SchemaNode>),
    /// Homogeneous array
    Array(ElementKind),
}

impl FieldKind {
    /// Type name for error messages
    pub fn type_name(&self) -> String {
        match self {
            FieldKind::Leaf(kind) => kind.name().to_string(),
            FieldKind::Object(_) | FieldKind::EncryptedObject(_) => "object".to_string(),
            FieldKind::Array(ElementKind::Leaf(kind)) => format!("array<{}>", kind.name()),
            FieldKind::Array(ElementKind::Object(_)) => "array<object>".to_string(),
        }
    }

    /// BSON type alias of the value as a whole
    pub fn bson_type(&self) -> &'static str {
        match self {
            FieldKind::Leaf(kind) => kind.bson_type(),
            FieldKind::Object(_) | FieldKind::EncryptedObject(_) => "object",
            FieldKind::Array(_) => "array",
        }
    }
}

/// One schema field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub intent: Option<EncryptionIntent>,
}

impl FieldSpec {
    pub fn is_encrypted(&self) -> bool {
        self.intent.is_some()
    }
}

/// Frozen schema node
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub(super) fields: Vec<FieldSpec>,
    pub(super) options: SchemaOptions,
}

impl SchemaNode {
    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolves a dotted path through nested objects and sub-schemas.
    pub fn path(&self, path: &str) -> Option<&FieldSpec> {
        let mut node = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let field = node.field(segment)?;
            if segments.peek().is_none() {
                return Some(field);
            }
            node = match &field.kind {
                FieldKind::Object(child) | FieldKind::EncryptedObject(child) => child,
                FieldKind::Array(ElementKind::Object(child)) => child,
                _ => return None,
            };
        }
        None
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    pub fn encryption_type(&self) -> Option<EncryptionMode> {
        self.options.encryption_type
    }

    pub fn strict(&self) -> StrictMode {
        self.options.strict
    }

    pub fn discriminator_key(&self) -> &str {
        &self.options.discriminator_key
    }

    pub fn collection(&self) -> Option<&str> {
        self.options.collection.as_deref()
    }

    /// Whether any field in this subtree carries an encryption intent
    pub fn has_encrypted_fields(&self) -> bool {
        self.fields.iter().any(|f| {
            f.is_encrypted()
                || match &f.kind {
                    FieldKind::Object(child) | FieldKind::EncryptedObject(child) => {
                        child.has_encrypted_fields()
                    }
                    FieldKind::Array(ElementKind::Object(child)) => child.has_encrypted_fields(),
                    _ => false,
                }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, kind: TypeKind) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            kind: FieldKind::Leaf(kind),
            intent: None,
        }
    }

    #[test]
    fn test_path_lookup_through_nesting() {
        let inner = Arc::new(SchemaNode {
            fields: vec![leaf("c", TypeKind::String)],
            options: SchemaOptions::default(),
        });
        let root = SchemaNode {
            fields: vec![FieldSpec {
                name: "a".into(),
                kind: FieldKind::Object(inner),
                intent: None,
            }],
            options: SchemaOptions::default(),
        };

        assert_eq!(root.path("a.c").unwrap().name, "c");
        assert!(root.path("a.d").is_none());
        assert!(root.path("a.c.e").is_none());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(FieldKind::Leaf(TypeKind::Int32).type_name(), "int32");
        assert_eq!(
            FieldKind::Array(ElementKind::Leaf(TypeKind::Int32)).type_name(),
            "array<int32>"
        );
        assert_eq!(FieldKind::Array(ElementKind::Leaf(TypeKind::Int32)).bson_type(), "array");
    }

    #[test]
    fn test_default_options() {
        let options = SchemaOptions::default();
        assert_eq!(options.discriminator_key, "__t");
        assert_eq!(options.strict, StrictMode::Ignore);
        assert!(options.id);
        assert!(options.encryption_type.is_none());
    }
}
