//! Configuration trees as loaded from YAML or JSON documents

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;

use crate::error::{CoreError, Result};

/// A parsed resource configuration
///
/// The root is always a mapping. Nested mappings are sections, sequences of
/// mappings are list sections, everything else is a scalar parameter.
/// `null` values are treated exactly like absent keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree(JsonValue);

impl ConfigTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// Wrap an already parsed value
    ///
    /// `null` is accepted as an empty document; any other non-mapping root is
    /// rejected.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(_) => Ok(Self(value)),
            other => Err(CoreError::InvalidTree {
                message: format!("root must be a mapping, found {}", type_name(&other)),
            }),
        }
    }

    /// Load a tree from a file, choosing the parser from the extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a tree from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a tree from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Get a top-level value, `None` when absent or `null`
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Get a value by a sequence of mapping keys
    pub fn get_path(&self, keys: &[&str]) -> Option<&JsonValue> {
        keys.iter()
            .try_fold(&self.0, |current, key| current.get(*key))
            .filter(|v| !v.is_null())
    }

    /// Root mapping
    pub fn as_map(&self) -> Option<&Map<String, JsonValue>> {
        self.0.as_object()
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Mutable access to the inner JSON value
    pub fn inner_mut(&mut self) -> &mut JsonValue {
        &mut self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if the tree has no parameters
    pub fn is_empty(&self) -> bool {
        self.0.as_object().is_none_or(|map| map.is_empty())
    }
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Short name of a JSON value's type, used in error messages
pub fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "sequence",
        JsonValue::Object(_) => "mapping",
    }
}
