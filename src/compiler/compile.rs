//! Descriptor compilation
//!
//! Depth-first walk of a base node and its discriminator overlays. Every
//! field carrying an intent is recorded under its dotted path and the walk
//! does not descend below it; nested objects and document arrays are
//! descended without an index segment.

use std::sync::Arc;

use super::descriptor::{join, Conflict, DescriptorEntry, DescriptorSet};
use crate::errors::{FleError, FleResult};
use crate::observability::{log_event_with_fields, Event};
use crate::schema::{ElementKind, FieldKind, SchemaNode};

/// A sub-type schema layered onto a base schema in the same collection
#[derive(Debug, Clone)]
pub struct DiscriminatorOverlay {
    /// Discriminator value stored in documents of this sub-type
    pub name: String,
    pub node: Arc<SchemaNode>,
}

impl DiscriminatorOverlay {
    pub fn new(name: impl Into<String>, node: Arc<SchemaNode>) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }
}

/// Compiles a base node and its overlays into per-mode descriptors.
///
/// Overlay paths merge with the base's. Redeclaring a base path with a
/// different intent, or shadowing an encrypted path with a plain one (or the
/// reverse), is a `SchemaConflict`.
pub fn compile(root: &SchemaNode, overlays: &[DiscriminatorOverlay]) -> FleResult<DescriptorSet> {
    let mut set = collect(root).map_err(|c| FleError::schema_conflict(c.path, c.reason))?;

    for overlay in overlays {
        let overlay_set = collect(&overlay.node).map_err(|c| in_overlay(&overlay.name, c))?;
        check_shadowing(root, &set, overlay, &overlay_set)?;
        set.absorb(&overlay_set)
            .map_err(|c| in_overlay(&overlay.name, c))?;
    }

    let csfle_paths = set.csfle().map_or(0, |d| d.len()).to_string();
    let qe_paths = set.queryable().map_or(0, |d| d.len()).to_string();
    let key_count = set
        .iter()
        .map(|d| d.key_ids().len())
        .sum::<usize>()
        .to_string();
    let overlay_count = overlays.len().to_string();
    log_event_with_fields(
        Event::DescriptorsCompiled,
        &[
            ("csfle_paths", csfle_paths.as_str()),
            ("qe_paths", qe_paths.as_str()),
            ("key_ids", key_count.as_str()),
            ("overlays", overlay_count.as_str()),
        ],
    );

    Ok(set)
}

fn collect(node: &SchemaNode) -> Result<DescriptorSet, Conflict> {
    let mut set = DescriptorSet::new();
    walk(node, "", &mut set)?;
    Ok(set)
}

fn walk(node: &SchemaNode, prefix: &str, set: &mut DescriptorSet) -> Result<(), Conflict> {
    for field in node.fields() {
        let path = join(prefix, &field.name);

        if let Some(intent) = &field.intent {
            set.record(DescriptorEntry {
                path,
                bson_type: field.kind.bson_type(),
                intent: intent.clone(),
            })?;
            continue;
        }

        match &field.kind {
            FieldKind::Object(child) => walk(child, &path, set)?,
            FieldKind::Array(ElementKind::Object(child)) => {
                walk(child, &path, set)?;
                set.mark_array(&path);
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_shadowing(
    root: &SchemaNode,
    base: &DescriptorSet,
    overlay: &DiscriminatorOverlay,
    overlay_set: &DescriptorSet,
) -> FleResult<()> {
    let plain_in = |node: &SchemaNode, path: &str| {
        node.path(path)
            .map_or(false, |field| !field.is_encrypted())
    };
    let conflict = |path: &str, reason: String| {
        in_overlay(
            &overlay.name,
            Conflict {
                path: path.to_string(),
                reason,
            },
        )
    };

    for entry in base.iter().flat_map(|d| d.entries()) {
        if plain_in(overlay.node.as_ref(), &entry.path) {
            return Err(conflict(
                &entry.path,
                "redeclares an encrypted base field without encryption".to_string(),
            ));
        }
        if let Some(prefix) = scalar_prefix(overlay.node.as_ref(), &entry.path) {
            return Err(conflict(
                prefix,
                format!("declares a scalar above encrypted base field '{}'", entry.path),
            ));
        }
    }
    for entry in overlay_set.iter().flat_map(|d| d.entries()) {
        if plain_in(root, &entry.path) {
            return Err(conflict(
                &entry.path,
                "encrypts a field the base declares without encryption".to_string(),
            ));
        }
        if let Some(prefix) = scalar_prefix(root, &entry.path) {
            return Err(conflict(
                prefix,
                format!("encrypts '{}' below a field the base declares as a scalar", entry.path),
            ));
        }
    }
    Ok(())
}

/// Shortest proper prefix of `path` that `node` declares as a leaf or an
/// array of leaves.
fn scalar_prefix<'a>(node: &SchemaNode, path: &'a str) -> Option<&'a str> {
    path.match_indices('.')
        .map(|(i, _)| &path[..i])
        .find(|prefix| {
            node.path(prefix).map_or(false, |field| {
                matches!(
                    field.kind,
                    FieldKind::Leaf(_) | FieldKind::Array(ElementKind::Leaf(_))
                )
            })
        })
}

fn in_overlay(name: &str, conflict: Conflict) -> FleError {
    FleError::schema_conflict(
        conflict.path,
        format!("discriminator '{}' {}", name, conflict.reason),
    )
}
