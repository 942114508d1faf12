//! cfgpatch Core - Core types shared by the cfgpatch crates
//!
//! This crate provides the foundational types used throughout cfgpatch:
//! - `ConfigTree`: A parsed resource configuration
//! - `SchemaDocument`: The declared shape of a configuration and its update policies

pub mod error;
pub mod schema;
pub mod tree;

pub use error::{CoreError, Result};
pub use schema::{DEFAULT_UPDATE_KEY, FieldSpec, SchemaDocument};
pub use tree::{ConfigTree, type_name};
