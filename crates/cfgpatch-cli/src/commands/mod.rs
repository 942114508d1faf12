//! CLI commands

pub mod check;
pub mod diff;
pub mod policies;

use std::path::Path;
use std::sync::Arc;

use cfgpatch_core::{ConfigTree, SchemaDocument};
use cfgpatch_engine::{ConfigPatch, PolicyRegistry, SchemaDescriptor};
use tracing::debug;

use crate::error::{CliError, Result};

/// Paths of the documents describing an update
#[derive(Debug, Clone, Copy)]
pub struct PatchInputs<'a> {
    pub base: &'a Path,
    pub target: &'a Path,
    pub schema: &'a Path,
}

impl PatchInputs<'_> {
    /// Load the documents and compute the patch
    pub fn load(&self) -> Result<ConfigPatch> {
        let document = SchemaDocument::from_file(self.schema)
            .map_err(|e| CliError::from_core(describe("schema", self.schema), e))?;
        let schema = SchemaDescriptor::resolve(&document, &PolicyRegistry::builtin())
            .map_err(|e| CliError::from_patch(describe("schema", self.schema), e))?;

        let base = ConfigTree::from_file(self.base)
            .map_err(|e| CliError::from_core(describe("base configuration", self.base), e))?;
        let target = ConfigTree::from_file(self.target)
            .map_err(|e| CliError::from_core(describe("target configuration", self.target), e))?;

        debug!(
            base = %self.base.display(),
            target = %self.target.display(),
            schema = %self.schema.display(),
            "loaded patch inputs"
        );

        ConfigPatch::new(&base, &target, Arc::new(schema))
            .map_err(|e| CliError::from_patch("configuration", e))
    }
}

fn describe(what: &str, path: &Path) -> String {
    format!("{} {}", what, path.display())
}
