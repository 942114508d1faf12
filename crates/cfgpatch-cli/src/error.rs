//! CLI error types with exit code handling

use cfgpatch_core::CoreError;
use cfgpatch_engine::PatchError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// A document could not be read or parsed
    #[error("Failed to load {what}: {message}")]
    #[diagnostic(code(cfgpatch::cli::input))]
    Input {
        what: String,
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A configuration does not match the schema
    #[error("Invalid {what}: {message}")]
    #[diagnostic(
        code(cfgpatch::cli::structure),
        help("Make sure the configuration only uses sections and parameters declared in the schema")
    )]
    Structure { what: String, message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(cfgpatch::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Input { .. } | CliError::Structure { .. } => exit_codes::INPUT_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create an error for a document that couldn't be loaded
    pub fn input(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Input {
            what: what.into(),
            message: err.to_string(),
            help: None,
        }
    }

    /// Wrap a core loading error, adding a hint where one helps
    pub fn from_core(what: impl Into<String>, err: CoreError) -> Self {
        let help = match &err {
            CoreError::Io(_) => Some("Check that the file exists and is readable".to_string()),
            CoreError::YamlParse(_) | CoreError::JsonParse(_) => {
                Some("Files ending in .json are parsed as JSON, anything else as YAML".to_string())
            }
            _ => None,
        };
        Self::Input {
            what: what.into(),
            message: err.to_string(),
            help,
        }
    }

    /// Wrap an engine error raised while building a patch
    pub fn from_patch(what: impl Into<String>, err: PatchError) -> Self {
        match err {
            PatchError::Core(core) => Self::from_core(what, core),
            other @ (PatchError::Structure { .. } | PatchError::UnknownPolicy { .. }) => {
                Self::Structure {
                    what: what.into(),
                    message: other.to_string(),
                }
            }
            other => Self::input(what, other),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Other {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
