//! Schema documents describing the shape of a configuration
//!
//! A schema document is a plain, serializable description of the sections
//! and parameters a configuration may contain, together with the name of the
//! update policy ruling each of them. Policy names are resolved into actual
//! policies by the engine.
//!
//! ```yaml
//! fields:
//!   - name: Region
//!     update_policy: UNSUPPORTED
//!   - name: Scheduling
//!     update_policy: SUPPORTED
//!     fields:
//!       - name: Queues
//!         many: true
//!         update_key: Name
//!         update_policy: COMPUTE_FLEET_STOP_ON_REMOVE
//!         fields:
//!           - name: Name
//!           - name: MinCount
//!             update_policy: MIN_COUNT
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Key used to match list items when a list field doesn't declare one
pub const DEFAULT_UPDATE_KEY: &str = "Name";

/// Root of a schema document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Top-level fields, in declaration order
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Declaration of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,

    /// Key of the field in configuration trees (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_key: Option<String>,

    /// Whether the field holds a sequence of sections
    #[serde(default)]
    pub many: bool,

    /// Attribute used to match list items between two configurations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_key: Option<String>,

    /// Name of the update policy ruling this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<String>,

    /// Sections with `patchable: false` are dropped before comparison
    #[serde(default = "default_true")]
    pub patchable: bool,

    /// Sub-fields; present for sections and list sections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSpec>>,
}

fn default_true() -> bool {
    true
}

impl FieldSpec {
    /// Key of the field in configuration trees
    pub fn data_key(&self) -> &str {
        self.data_key.as_deref().unwrap_or(&self.name)
    }

    /// Key used to match list items
    pub fn update_key(&self) -> &str {
        self.update_key.as_deref().unwrap_or(DEFAULT_UPDATE_KEY)
    }

    /// Whether this field is a section (single or list)
    pub fn is_nested(&self) -> bool {
        self.fields.is_some()
    }
}

impl SchemaDocument {
    /// Load a schema document from a file, choosing the parser from the extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse and validate a schema document from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: SchemaDocument = serde_yaml::from_str(yaml)?;
        document.validate()?;
        Ok(document)
    }

    /// Parse and validate a schema document from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let document: SchemaDocument = serde_json::from_str(json)?;
        document.validate()?;
        Ok(document)
    }

    /// Check the document for declarations that cannot describe a configuration
    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.fields, "")
    }
}

fn validate_fields(fields: &[FieldSpec], parent: &str) -> Result<()> {
    let mut seen = BTreeSet::new();

    for field in fields {
        let path = if parent.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", parent, field.name)
        };

        let invalid = |message: &str| CoreError::InvalidSchema {
            path: path.clone(),
            message: message.to_string(),
        };

        if field.name.is_empty() || field.data_key().is_empty() {
            return Err(invalid("field name must not be empty"));
        }
        if !seen.insert(field.data_key()) {
            return Err(invalid("duplicate data key"));
        }
        if field.many && field.fields.is_none() {
            return Err(invalid("list fields must declare their item fields"));
        }
        if field.update_key.is_some() && !field.many {
            return Err(invalid("update_key is only meaningful on list fields"));
        }
        if field.many {
            let items = field.fields.as_deref().unwrap_or_default();
            if !items.iter().any(|item| item.data_key() == field.update_key()) {
                return Err(invalid(&format!(
                    "update key '{}' is not declared among the item fields",
                    field.update_key()
                )));
            }
        }

        if let Some(nested) = &field.fields {
            validate_fields(nested, &path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
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
  - name: DevSettings
    patchable: false
    fields:
      - name: Cookbook
"#;

    #[test]
    fn test_parse_schema_document() {
        let doc = SchemaDocument::from_yaml(SAMPLE).unwrap();
        assert_eq!(doc.fields.len(), 3);

        let region = &doc.fields[0];
        assert_eq!(region.data_key(), "Region");
        assert!(!region.is_nested());
        assert!(region.update_policy.is_none());
        assert!(region.patchable);

        let queues = &doc.fields[1].fields.as_ref().unwrap()[0];
        assert!(queues.many);
        assert_eq!(queues.update_key(), DEFAULT_UPDATE_KEY);

        assert!(!doc.fields[2].patchable);
    }

    #[test]
    fn test_duplicate_data_key_rejected() {
        let result = SchemaDocument::from_yaml(
            r#"
fields:
  - name: Region
  - name: AwsRegion
    data_key: Region
"#,
        );
        assert!(matches!(
            result,
            Err(CoreError::InvalidSchema { ref path, .. }) if path == "AwsRegion"
        ));
    }

    #[test]
    fn test_list_without_fields_rejected() {
        let result = SchemaDocument::from_yaml(
            r#"
fields:
  - name: Queues
    many: true
"#,
        );
        assert!(matches!(result, Err(CoreError::InvalidSchema { .. })));
    }

    #[test]
    fn test_update_key_on_scalar_rejected() {
        let result = SchemaDocument::from_yaml(
            r#"
fields:
  - name: Scheduling
    fields:
      - name: Scheduler
        update_key: Id
"#,
        );
        match result {
            Err(CoreError::InvalidSchema { path, .. }) => {
                assert_eq!(path, "Scheduling.Scheduler")
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_undeclared_update_key_rejected() {
        let result = SchemaDocument::from_yaml(
            r#"
fields:
  - name: Volumes
    many: true
    update_key: Id
    fields:
      - name: Size
"#,
        );
        match result {
            Err(CoreError::InvalidSchema { path, message }) => {
                assert_eq!(path, "Volumes");
                assert_eq!(message, "update key 'Id' is not declared among the item fields");
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json() {
        let doc = SchemaDocument::from_json(
            r#"{"fields": [{"name": "Queues", "many": true, "update_key": "Id", "fields": [{"name": "Id"}]}]}"#,
        )
        .unwrap();
        assert_eq!(doc.fields[0].update_key(), "Id");
    }
}
