//! cfgpatch Engine - Configuration diff and update-policy evaluation
//!
//! This crate decides whether a requested configuration can be applied to an
//! already deployed resource:
//! - [`TreeDiffer`]: schema-driven comparison producing ordered [`Change`]s
//! - [`UpdatePolicy`]: per-parameter rule classifying a change as
//!   SUCCEEDED, ACTION NEEDED or FAILED
//! - [`ConfigPatch`]: owns the changes and checks them against live state
//!   through a memoizing [`ConditionCache`]
//! - [`report`]: table and change-set renderings of a checked patch
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cfgpatch_core::{ConfigTree, SchemaDocument};
//! use cfgpatch_engine::{ConfigPatch, PolicyRegistry, SchemaDescriptor, StaticLiveState};
//!
//! let document = SchemaDocument::from_file("schema.yaml")?;
//! let schema = SchemaDescriptor::resolve(&document, &PolicyRegistry::builtin())?;
//!
//! let patch = ConfigPatch::new(&base, &target, Arc::new(schema))?
//!     .with_live_state(Arc::new(StaticLiveState::running_fleet()));
//! let check = patch.check().await;
//! println!("allowed: {}", check.patch_allowed);
//! ```

pub mod condition;
pub mod diff;
pub mod error;
pub mod patch;
pub mod policy;
pub mod report;
pub mod schema;

pub use condition::{
    Condition, ConditionCache, ConditionValue, DEFAULT_CONDITION_TIMEOUT, LiveStateProvider,
    LiveStateSnapshot, NoLiveState, StaticLiveState,
};
pub use diff::{Change, ItemPosition, TreeDiffer};
pub use error::{ConditionError, PatchError, PolicyError, Result};
pub use patch::{
    CheckOptions, CheckSummary, ConfigPatch, DEFAULT_MAX_CONCURRENCY, PatchCheck, PatchContext,
};
pub use policy::{
    CheckResult, ConditionChecker, Message, PolicyRegistry, PolicyVerdict, UpdatePolicy,
};
pub use report::{ChangeSet, ChangeSetEntry, ReportRow, TABLE_HEADER, to_change_set, to_table};
pub use schema::{FieldKind, SchemaDescriptor, SchemaField};
