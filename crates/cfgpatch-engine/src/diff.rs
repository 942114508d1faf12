//! Schema-driven comparison of two configuration trees
//!
//! The differ walks the schema, not the trees: fields are visited in
//! declaration order, so the output order only depends on the schema and on
//! the order of list items in the inputs.
//!
//! List sections are reconciled by their update key. Each target item is
//! matched against the first base item with the same key that wasn't matched
//! yet; matched pairs are compared field by field, unmatched target items are
//! reported as additions and leftover base items as removals, after every
//! target-driven change.

use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use cfgpatch_core::{ConfigTree, type_name};

use crate::error::{PatchError, Result};
use crate::patch::ConfigPatch;
use crate::policy::UpdatePolicy;
use crate::schema::{FieldKind, SchemaDescriptor, SchemaField};

/// One difference between the base and the target configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Sections leading to the changed field; list items appear as `Key[value]`
    pub path: Vec<String>,
    /// Data key of the changed field
    pub key: String,
    /// `None` when the field or list item is absent from the base
    pub old_value: Option<JsonValue>,
    /// `None` when the field or list item is absent from the target
    pub new_value: Option<JsonValue>,
    pub update_policy: Arc<UpdatePolicy>,
    /// Whether this change adds or removes a whole list item
    pub is_list: bool,
    /// Positions of the matched list items, one entry per `path` segment
    /// (`None` for plain sections)
    pub item_positions: Vec<Option<ItemPosition>>,
}

/// Indices of a matched list item in the base and target sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPosition {
    pub base: usize,
    pub target: usize,
}

impl Change {
    /// Dotted path of the enclosing section
    pub fn param_path(&self) -> String {
        self.path.join(".")
    }

    /// Item positions along `path` in the base configuration
    pub fn base_positions(&self) -> Vec<Option<usize>> {
        self.item_positions.iter().map(|p| p.map(|p| p.base)).collect()
    }

    /// Item positions along `path` in the target configuration
    pub fn target_positions(&self) -> Vec<Option<usize>> {
        self.item_positions.iter().map(|p| p.map(|p| p.target)).collect()
    }

    /// Full address of the changed field
    pub fn parameter(&self) -> String {
        ConfigPatch::build_param_path(&self.path, &self.key)
    }
}

/// Recursive comparison of configuration trees under a schema
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeDiffer;

impl TreeDiffer {
    pub fn new() -> Self {
        Self
    }

    /// Compute the ordered changes turning `base` into `target`
    pub fn diff(
        &self,
        base: &ConfigTree,
        target: &ConfigTree,
        schema: &SchemaDescriptor,
    ) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        let root = Location::default();
        self.diff_section(base.as_map(), target.as_map(), schema, &root, &mut changes)?;
        Ok(changes)
    }

    fn diff_section(
        &self,
        base: Option<&Map<String, JsonValue>>,
        target: Option<&Map<String, JsonValue>>,
        schema: &SchemaDescriptor,
        path: &Location,
        changes: &mut Vec<Change>,
    ) -> Result<()> {
        for field in schema.fields() {
            if !field.patchable {
                continue;
            }

            let old = base.and_then(|m| present(m.get(&field.data_key)));
            let new = target.and_then(|m| present(m.get(&field.data_key)));

            match &field.kind {
                FieldKind::Scalar => {
                    if !same_value(old, new) {
                        record(changes, path, field, old.cloned(), new.cloned(), false);
                    }
                }
                FieldKind::Nested(nested) => {
                    let old_section = as_section(old, &path.segments, field)?;
                    let new_section = as_section(new, &path.segments, field)?;

                    match (old_section, new_section) {
                        (None, None) => {}
                        (Some(_), Some(_)) => {
                            let path = path.child(field.data_key.clone(), None);
                            self.diff_section(old_section, new_section, nested, &path, changes)?;
                        }
                        // Ignored sections are traversed so that their fields
                        // keep their own policies
                        _ if field.update_policy.is_ignored() => {
                            let path = path.child(field.data_key.clone(), None);
                            self.diff_section(old_section, new_section, nested, &path, changes)?;
                        }
                        _ => record(
                            changes,
                            path,
                            field,
                            old_section.map(|m| JsonValue::Object(m.clone())),
                            new_section.map(|m| JsonValue::Object(m.clone())),
                            false,
                        ),
                    }
                }
                FieldKind::List(item_schema) => {
                    let old_items = as_items(old, &path.segments, field)?;
                    let new_items = as_items(new, &path.segments, field)?;
                    self.diff_list(&old_items, &new_items, field, item_schema, path, changes)?;
                }
            }
        }
        Ok(())
    }

    fn diff_list(
        &self,
        old_items: &[&Map<String, JsonValue>],
        new_items: &[&Map<String, JsonValue>],
        field: &SchemaField,
        item_schema: &SchemaDescriptor,
        path: &Location,
        changes: &mut Vec<Change>,
    ) -> Result<()> {
        let mut visited = HashSet::new();

        for (new_index, new_item) in new_items.iter().enumerate() {
            let new_key = present(new_item.get(&field.update_key));
            let matched = old_items.iter().enumerate().find(|(index, old_item)| {
                !visited.contains(index) && present(old_item.get(&field.update_key)) == new_key
            });

            match matched {
                Some((index, old_item)) => {
                    visited.insert(index);
                    let segment = format!("{}[{}]", field.data_key, item_key(new_key));
                    let position = ItemPosition {
                        base: index,
                        target: new_index,
                    };
                    let path = path.child(segment, Some(position));
                    self.diff_section(Some(old_item), Some(new_item), item_schema, &path, changes)?;
                }
                None => record(
                    changes,
                    path,
                    field,
                    None,
                    Some(JsonValue::Object((*new_item).clone())),
                    true,
                ),
            }
        }

        for (index, old_item) in old_items.iter().enumerate() {
            if !visited.contains(&index) {
                record(
                    changes,
                    path,
                    field,
                    Some(JsonValue::Object((*old_item).clone())),
                    None,
                    true,
                );
            }
        }
        Ok(())
    }
}

/// Text identifying a list item in change paths
///
/// Strings are used verbatim, other values as JSON, a missing key as `null`.
pub fn item_key(value: Option<&JsonValue>) -> String {
    match present(value) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}

/// Numbers compare by value, so `2` and `2.0` are the same
fn same_value(old: Option<&JsonValue>, new: Option<&JsonValue>) -> bool {
    match (old, new) {
        (Some(JsonValue::Number(a)), Some(JsonValue::Number(b))) => a.as_f64() == b.as_f64(),
        _ => old == new,
    }
}

fn present(value: Option<&JsonValue>) -> Option<&JsonValue> {
    value.filter(|v| !v.is_null())
}

/// Path of the section being compared, with the positions of list items
#[derive(Debug, Default)]
struct Location {
    segments: Vec<String>,
    positions: Vec<Option<ItemPosition>>,
}

impl Location {
    fn child(&self, segment: String, position: Option<ItemPosition>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        let mut positions = self.positions.clone();
        positions.push(position);
        Self {
            segments,
            positions,
        }
    }
}

fn record(
    changes: &mut Vec<Change>,
    path: &Location,
    field: &SchemaField,
    old_value: Option<JsonValue>,
    new_value: Option<JsonValue>,
    is_list: bool,
) {
    let change = Change {
        path: path.segments.clone(),
        key: field.data_key.clone(),
        old_value,
        new_value,
        update_policy: Arc::clone(&field.update_policy),
        is_list,
        item_positions: path.positions.clone(),
    };
    debug!(
        parameter = %change.parameter(),
        policy = %change.update_policy,
        is_list,
        "detected change"
    );
    changes.push(change);
}

/// An empty mapping counts as an absent section
fn as_section<'a>(
    value: Option<&'a JsonValue>,
    path: &[String],
    field: &SchemaField,
) -> Result<Option<&'a Map<String, JsonValue>>> {
    match value {
        None => Ok(None),
        Some(JsonValue::Object(map)) if map.is_empty() => Ok(None),
        Some(JsonValue::Object(map)) => Ok(Some(map)),
        Some(other) => Err(shape_error(path, field, "mapping", other)),
    }
}

fn as_items<'a>(
    value: Option<&'a JsonValue>,
    path: &[String],
    field: &SchemaField,
) -> Result<Vec<&'a Map<String, JsonValue>>> {
    match value {
        None => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .ok_or_else(|| shape_error(path, field, "sequence of mappings", item))
            })
            .collect(),
        Some(other) => Err(shape_error(path, field, "sequence", other)),
    }
}

fn shape_error(path: &[String], field: &SchemaField, expected: &str, found: &JsonValue) -> PatchError {
    PatchError::structure(
        ConfigPatch::build_param_path(path, &field.data_key),
        format!("expected a {}, found {}", expected, type_name(found)),
    )
}
