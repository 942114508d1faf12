//! Resolved schema graph
//!
//! A [`SchemaDescriptor`] is the engine-side view of a configuration's shape:
//! every field carries its actual [`UpdatePolicy`] rather than a policy name.
//! Descriptors are built by hand or resolved once from a
//! [`SchemaDocument`] against a [`PolicyRegistry`], then shared read-only.

use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use cfgpatch_core::{DEFAULT_UPDATE_KEY, FieldSpec, SchemaDocument, type_name};

use crate::diff::item_key;
use crate::error::{PatchError, Result};
use crate::policy::{PolicyRegistry, UpdatePolicy, builtin};

/// Shape of a field's value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Plain value, compared as a whole
    Scalar,
    /// Single section
    Nested(SchemaDescriptor),
    /// Sequence of sections matched by their update key
    List(SchemaDescriptor),
}

/// A field of a configuration section
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub data_key: String,
    pub kind: FieldKind,
    pub update_key: String,
    pub update_policy: Arc<UpdatePolicy>,
    pub patchable: bool,
}

impl SchemaField {
    fn new(name: impl Into<String>, kind: FieldKind, update_policy: Arc<UpdatePolicy>) -> Self {
        let name = name.into();
        Self {
            data_key: name.clone(),
            name,
            kind,
            update_key: DEFAULT_UPDATE_KEY.to_string(),
            update_policy,
            patchable: true,
        }
    }

    pub fn scalar(name: impl Into<String>, update_policy: Arc<UpdatePolicy>) -> Self {
        Self::new(name, FieldKind::Scalar, update_policy)
    }

    pub fn nested(
        name: impl Into<String>,
        update_policy: Arc<UpdatePolicy>,
        schema: SchemaDescriptor,
    ) -> Self {
        Self::new(name, FieldKind::Nested(schema), update_policy)
    }

    pub fn list(
        name: impl Into<String>,
        update_policy: Arc<UpdatePolicy>,
        schema: SchemaDescriptor,
    ) -> Self {
        Self::new(name, FieldKind::List(schema), update_policy)
    }

    pub fn with_data_key(mut self, data_key: impl Into<String>) -> Self {
        self.data_key = data_key.into();
        self
    }

    pub fn with_update_key(mut self, update_key: impl Into<String>) -> Self {
        self.update_key = update_key.into();
        self
    }

    /// Drop this field from both trees before comparing them
    pub fn not_patchable(mut self) -> Self {
        self.patchable = false;
        self
    }

    pub fn is_nested(&self) -> bool {
        !matches!(self.kind, FieldKind::Scalar)
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, FieldKind::List(_))
    }

    /// Schema of the section (or of each list item)
    pub fn nested_schema(&self) -> Option<&SchemaDescriptor> {
        match &self.kind {
            FieldKind::Scalar => None,
            FieldKind::Nested(schema) | FieldKind::List(schema) => Some(schema),
        }
    }
}

/// Ordered fields of a configuration section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDescriptor {
    fields: Vec<SchemaField>,
}

impl SchemaDescriptor {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// Resolve the policy names of a schema document
    ///
    /// Fields without a policy get `UNSUPPORTED`.
    pub fn resolve(document: &SchemaDocument, registry: &PolicyRegistry) -> Result<Self> {
        resolve_fields(&document.fields, registry, "")
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Find a field by its key in configuration trees
    pub fn field(&self, data_key: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.data_key == data_key)
    }

    /// Check that a configuration tree only holds declared fields of the
    /// declared shapes
    pub fn validate(&self, tree: &JsonValue) -> Result<()> {
        match tree {
            JsonValue::Null => Ok(()),
            JsonValue::Object(map) => self.validate_section(map, ""),
            other => Err(PatchError::structure(
                "<root>",
                format!("expected a mapping, found {}", type_name(other)),
            )),
        }
    }

    fn validate_section(&self, section: &Map<String, JsonValue>, path: &str) -> Result<()> {
        for (key, value) in section {
            let location = join(path, key);
            let Some(field) = self.field(key) else {
                return Err(PatchError::structure(location, "unknown field"));
            };

            if value.is_null() {
                continue;
            }

            match &field.kind {
                FieldKind::Scalar => {}
                FieldKind::Nested(schema) => {
                    let map = value.as_object().ok_or_else(|| {
                        PatchError::structure(
                            &location,
                            format!("expected a mapping, found {}", type_name(value)),
                        )
                    })?;
                    schema.validate_section(map, &location)?;
                }
                FieldKind::List(schema) => {
                    let items = value.as_array().ok_or_else(|| {
                        PatchError::structure(
                            &location,
                            format!("expected a sequence, found {}", type_name(value)),
                        )
                    })?;
                    for (index, item) in items.iter().enumerate() {
                        let item_location = format!("{}[{}]", location, index);
                        let map = item.as_object().ok_or_else(|| {
                            PatchError::structure(
                                &item_location,
                                format!("expected a mapping, found {}", type_name(item)),
                            )
                        })?;
                        schema.validate_section(map, &item_location)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove every non-patchable field from a validated tree
    pub fn strip_unpatchable(&self, tree: &mut JsonValue) {
        let Some(section) = tree.as_object_mut() else {
            return;
        };

        for field in &self.fields {
            if !field.patchable {
                section.remove(&field.data_key);
                continue;
            }
            let Some(value) = section.get_mut(&field.data_key) else {
                continue;
            };
            match &field.kind {
                FieldKind::Scalar => {}
                FieldKind::Nested(schema) => schema.strip_unpatchable(value),
                FieldKind::List(schema) => {
                    if let Some(items) = value.as_array_mut() {
                        for item in items {
                            schema.strip_unpatchable(item);
                        }
                    }
                }
            }
        }
    }

    /// Find the section addressed by a change path
    ///
    /// Segments are data keys; list items are addressed as `Key[value]`
    /// where `value` is the item's update key.
    pub fn locate<'a>(&self, tree: &'a JsonValue, path: &[String]) -> Option<&'a JsonValue> {
        self.locate_at(tree, path, &[])
    }

    /// Find the section addressed by a change path, taking list items at
    /// the given positions
    ///
    /// `positions` runs along `path`; segments without a position fall back
    /// to the first item whose update key matches.
    pub fn locate_at<'a>(
        &self,
        tree: &'a JsonValue,
        path: &[String],
        positions: &[Option<usize>],
    ) -> Option<&'a JsonValue> {
        let Some((segment, rest)) = path.split_first() else {
            return Some(tree).filter(|v| v.is_object());
        };
        let (position, positions) = match positions.split_first() {
            Some((position, rest)) => (*position, rest),
            None => (None, positions),
        };

        let (data_key, item) = parse_segment(segment);
        let field = self.field(data_key)?;
        let value = tree.get(data_key).filter(|v| !v.is_null())?;

        match (&field.kind, item) {
            (FieldKind::Nested(schema), None) => schema.locate_at(value, rest, positions),
            (FieldKind::List(schema), Some(wanted)) => {
                let items = value.as_array()?;
                let found = match position {
                    Some(index) => items.get(index)?,
                    None => items
                        .iter()
                        .find(|i| item_key(i.get(&field.update_key)) == wanted)?,
                };
                schema.locate_at(found, rest, positions)
            }
            _ => None,
        }
    }
}

fn resolve_fields(
    fields: &[FieldSpec],
    registry: &PolicyRegistry,
    parent: &str,
) -> Result<SchemaDescriptor> {
    let mut resolved = Vec::with_capacity(fields.len());

    for spec in fields {
        let path = join(parent, &spec.name);
        let policy_name = spec.update_policy.as_deref().unwrap_or(builtin::DEFAULT_POLICY);
        let policy = registry
            .get(policy_name)
            .ok_or_else(|| PatchError::UnknownPolicy {
                field: path.clone(),
                policy: policy_name.to_string(),
            })?;

        let kind = match &spec.fields {
            None => FieldKind::Scalar,
            Some(nested) if spec.many => FieldKind::List(resolve_fields(nested, registry, &path)?),
            Some(nested) => FieldKind::Nested(resolve_fields(nested, registry, &path)?),
        };

        resolved.push(SchemaField {
            name: spec.name.clone(),
            data_key: spec.data_key().to_string(),
            kind,
            update_key: spec.update_key().to_string(),
            update_policy: policy,
            patchable: spec.patchable,
        });
    }

    Ok(SchemaDescriptor::new(resolved))
}

fn parse_segment(segment: &str) -> (&str, Option<&str>) {
    segment
        .strip_suffix(']')
        .and_then(|s| s.split_once('['))
        .map_or((segment, None), |(key, item)| (key, Some(item)))
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = r#"
fields:
  - name: Region
  - name: Scheduling
    update_policy: SUPPORTED
    fields:
      - name: Queues
        many: true
        update_policy: COMPUTE_FLEET_STOP_ON_REMOVE
        fields:
          - name: Name
          - name: MinCount
            update_policy: MIN_COUNT
          - name: MaxCount
            update_policy: MAX_COUNT
  - name: DevSettings
    patchable: false
    fields:
      - name: Cookbook
"#;

    fn schema() -> SchemaDescriptor {
        let document = SchemaDocument::from_yaml(SCHEMA).unwrap();
        SchemaDescriptor::resolve(&document, &PolicyRegistry::builtin()).unwrap()
    }

    #[test]
    fn test_resolve_policies() {
        let schema = schema();

        let region = schema.field("Region").unwrap();
        assert_eq!(region.update_policy.name(), builtin::UNSUPPORTED);
        assert!(!region.is_nested());

        let queues = schema
            .field("Scheduling")
            .and_then(SchemaField::nested_schema)
            .and_then(|s| s.field("Queues"))
            .unwrap();
        assert!(queues.is_list());
        assert_eq!(queues.update_key, "Name");
        assert_eq!(
            queues.update_policy.name(),
            builtin::COMPUTE_FLEET_STOP_ON_REMOVE
        );

        assert!(!schema.field("DevSettings").unwrap().patchable);
    }

    #[test]
    fn test_resolve_unknown_policy() {
        let document = SchemaDocument::from_yaml(
            "fields:\n  - name: Image\n    fields:\n      - name: Os\n        update_policy: NOPE\n",
        )
        .unwrap();

        let err = SchemaDescriptor::resolve(&document, &PolicyRegistry::builtin()).unwrap_err();
        match err {
            PatchError::UnknownPolicy { field, policy } => {
                assert_eq!(field, "Image.Os");
                assert_eq!(policy, "NOPE");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_accepts_conforming_tree() {
        let tree = json!({
            "Region": "eu-west-1",
            "Scheduling": {"Queues": [{"Name": "q1", "MinCount": 0}]},
            "DevSettings": null,
        });
        schema().validate(&tree).unwrap();
    }

    #[test]
    fn test_validate_unknown_field() {
        let tree = json!({"Scheduling": {"Queues": [{"Name": "q1", "Foo": 1}]}});
        let err = schema().validate(&tree).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration does not match schema at 'Scheduling.Queues[0].Foo': unknown field"
        );
    }

    #[test]
    fn test_validate_wrong_shapes() {
        let schema = schema();

        let err = schema.validate(&json!({"Scheduling": "slurm"})).unwrap_err();
        assert!(err.to_string().contains("expected a mapping, found string"));

        let err = schema
            .validate(&json!({"Scheduling": {"Queues": {"Name": "q1"}}}))
            .unwrap_err();
        assert!(err.to_string().contains("expected a sequence, found mapping"));

        let err = schema
            .validate(&json!({"Scheduling": {"Queues": ["q1"]}}))
            .unwrap_err();
        assert!(err.to_string().contains("Scheduling.Queues[0]"));
    }

    #[test]
    fn test_strip_unpatchable() {
        let mut tree = json!({
            "Region": "eu-west-1",
            "DevSettings": {"Cookbook": "custom"},
        });
        schema().strip_unpatchable(&mut tree);
        assert_eq!(tree, json!({"Region": "eu-west-1"}));
    }

    #[test]
    fn test_locate_list_item() {
        let tree = json!({
            "Scheduling": {"Queues": [
                {"Name": "q1", "MaxCount": 10},
                {"Name": "q2", "MaxCount": 5},
            ]},
        });
        let path = vec!["Scheduling".to_string(), "Queues[q2]".to_string()];

        let section = schema().locate(&tree, &path).unwrap();
        assert_eq!(section["MaxCount"], json!(5));

        let missing = vec!["Scheduling".to_string(), "Queues[q3]".to_string()];
        assert!(schema().locate(&tree, &missing).is_none());
    }

    #[test]
    fn test_locate_item_by_position() {
        let tree = json!({
            "Scheduling": {"Queues": [
                {"Name": "q1", "MaxCount": 10},
                {"Name": "q1", "MaxCount": 2},
            ]},
        });
        let path = vec!["Scheduling".to_string(), "Queues[q1]".to_string()];

        let first = schema().locate(&tree, &path).unwrap();
        assert_eq!(first["MaxCount"], json!(10));

        let second = schema().locate_at(&tree, &path, &[None, Some(1)]).unwrap();
        assert_eq!(second["MaxCount"], json!(2));

        assert!(schema().locate_at(&tree, &path, &[None, Some(5)]).is_none());
    }

    #[test]
    fn test_parse_segment() {
        assert_eq!(parse_segment("Queues[q1]"), ("Queues", Some("q1")));
        assert_eq!(parse_segment("Scheduling"), ("Scheduling", None));
    }
}
