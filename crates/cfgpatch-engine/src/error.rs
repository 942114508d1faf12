//! Error types for cfgpatch-engine

use std::time::Duration;
use thiserror::Error;

/// Result type for cfgpatch-engine operations
pub type Result<T> = std::result::Result<T, PatchError>;

/// Errors that prevent a patch from being built
///
/// These are fatal: no partial patch is ever produced.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PatchError {
    /// Configuration tree does not conform to the schema
    #[error("configuration does not match schema at '{path}': {message}")]
    Structure { path: String, message: String },

    /// Schema references a policy missing from the registry
    #[error("field '{field}' references unknown update policy '{policy}'")]
    UnknownPolicy { field: String, policy: String },

    /// Error raised while loading trees or schema documents
    #[error(transparent)]
    Core(#[from] cfgpatch_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PatchError {
    fn from(e: serde_json::Error) -> Self {
        PatchError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for PatchError {
    fn from(e: serde_yaml::Error) -> Self {
        PatchError::Serialization(e.to_string())
    }
}

impl PatchError {
    /// Build a structural error for the given location
    pub fn structure(path: impl Into<String>, message: impl Into<String>) -> Self {
        PatchError::Structure {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failure of an external live-state query
///
/// Results are cached per patch, errors included, so this type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// No provider can answer this condition
    #[error("no live state available to evaluate '{condition}'")]
    Unavailable { condition: String },

    /// The provider failed
    #[error("failed to evaluate '{condition}': {message}")]
    Query { condition: String, message: String },

    /// The provider did not answer in time
    #[error("evaluation of '{condition}' timed out after {timeout:?}")]
    Timeout { condition: String, timeout: Duration },
}

/// Failure of a policy check for one change
///
/// Never fatal for the patch: the change is reported as FAILED with this
/// error's text as reason.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// A live condition could not be evaluated
    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// The policy cannot interpret the shape of the change
    #[error("policy '{policy}' cannot evaluate change of '{key}': {message}")]
    Unsupported {
        policy: String,
        key: String,
        message: String,
    },

    /// A live condition answered with a value of the wrong kind
    #[error("condition '{condition}' returned an unexpected value: {value}")]
    UnexpectedConditionValue { condition: String, value: String },

    /// Error raised by a custom checker
    #[error("{0}")]
    Custom(String),
}

impl PolicyError {
    /// Create an error for a custom checker
    pub fn custom(message: impl Into<String>) -> Self {
        PolicyError::Custom(message.into())
    }
}
