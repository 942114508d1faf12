//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration tree: {message}")]
    InvalidTree { message: String },

    #[error("Invalid schema document at '{path}': {message}")]
    InvalidSchema { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
