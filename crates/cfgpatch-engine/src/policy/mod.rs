//! Update policies
//!
//! Every configuration parameter is ruled by an [`UpdatePolicy`] deciding
//! whether a change to it can be applied to the live resource:
//!
//! - **SUCCEEDED** (✓): the change can be applied as-is
//! - **ACTION NEEDED** (⚠): blocked by a precondition the operator can resolve
//!   (e.g. stopping the compute fleet first)
//! - **FAILED** (✗): the change can never be applied in place
//!
//! Policies are ordered by `level`, from the least restrictive (`IGNORED`)
//! to the most restrictive (`UNSUPPORTED`). The level is a static, offline
//! approximation; the real verdict comes from [`UpdatePolicy::check`], which
//! may consult live state through the patch's condition cache.
//!
//! # Example
//!
//! ```ignore
//! use cfgpatch_engine::policy::{PolicyRegistry, UpdatePolicy, builtin::FleetStopped};
//!
//! let mut registry = PolicyRegistry::builtin();
//! registry.register(
//!     UpdatePolicy::new("STORAGE_RESIZE", 5)
//!         .with_fail_reason("Storage can only be resized while the fleet is stopped")
//!         .with_checker(FleetStopped),
//! );
//! ```

pub mod builtin;
mod registry;

pub use registry::PolicyRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::diff::Change;
use crate::error::PolicyError;
use crate::patch::ConfigPatch;

/// Outcome of checking one change against its policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckResult {
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "ACTION NEEDED")]
    ActionNeeded,
    #[serde(rename = "FAILED")]
    Failed,
}

impl CheckResult {
    /// Label used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::ActionNeeded => "ACTION NEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    /// Get the icon for this result
    pub fn icon(self) -> &'static str {
        match self {
            Self::Succeeded => "✓",
            Self::ActionNeeded => "⚠",
            Self::Failed => "✗",
        }
    }
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full answer of a policy for one change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub result: CheckResult,
    /// Why the change is blocked, `-` when it isn't
    pub reason: String,
    /// What the operator can do to unblock the change
    pub action_needed: Option<String>,
    /// Whether the change is shown in the human report
    pub display: bool,
}

/// Message computed from the change and the patch it belongs to
pub type MessageFn = fn(&Change, &ConfigPatch) -> String;

/// Reason or remedy text attached to a policy
#[derive(Clone)]
pub enum Message {
    Static(&'static str),
    Text(String),
    Computed(MessageFn),
}

impl Message {
    /// Render the message for a change
    pub fn render(&self, change: &Change, patch: &ConfigPatch) -> String {
        match self {
            Self::Static(s) => (*s).to_string(),
            Self::Text(s) => s.clone(),
            Self::Computed(f) => f(change, patch),
        }
    }
}

impl From<&'static str> for Message {
    fn from(s: &'static str) -> Self {
        Self::Static(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<MessageFn> for Message {
    fn from(f: MessageFn) -> Self {
        Self::Computed(f)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(s) => write!(f, "{:?}", s),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Computed(_) => write!(f, "<computed>"),
        }
    }
}

/// Dynamic precondition of a policy
///
/// Returns `Ok(true)` when the change can be applied now, `Ok(false)` when
/// the operator must act first. Errors are reported as FAILED for that change
/// only.
#[async_trait]
pub trait ConditionChecker: Send + Sync {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError>;
}

/// Rule governing whether changes to a parameter may be applied in place
#[derive(Clone)]
pub struct UpdatePolicy {
    name: String,
    level: i32,
    fail_reason: Message,
    action_needed: Option<Message>,
    checker: Option<Arc<dyn ConditionChecker>>,
    print_succeeded: bool,
}

impl UpdatePolicy {
    /// Create a policy without a checker: every change it rules is FAILED
    pub fn new(name: impl Into<String>, level: i32) -> Self {
        Self {
            name: name.into(),
            level,
            fail_reason: Message::Static("-"),
            action_needed: None,
            checker: None,
            print_succeeded: true,
        }
    }

    /// Create a policy inheriting level, messages and checker from another one
    pub fn derived_from(base: &UpdatePolicy, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..base.clone()
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_fail_reason(mut self, reason: impl Into<Message>) -> Self {
        self.fail_reason = reason.into();
        self
    }

    pub fn with_action_needed(mut self, action: impl Into<Message>) -> Self {
        self.action_needed = Some(action.into());
        self
    }

    pub fn with_checker(mut self, checker: impl ConditionChecker + 'static) -> Self {
        self.checker = Some(Arc::new(checker));
        self
    }

    /// Hide changes from the report when they succeed
    pub fn hide_succeeded(mut self) -> Self {
        self.print_succeeded = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn print_succeeded(&self) -> bool {
        self.print_succeeded
    }

    /// Whether the policy can ever succeed
    pub fn has_checker(&self) -> bool {
        self.checker.is_some()
    }

    /// Whether changes under this policy are traversed rather than reported whole
    pub fn is_ignored(&self) -> bool {
        self.name == builtin::IGNORED
    }

    /// Render the fail reason for a change
    pub fn fail_reason(&self, change: &Change, patch: &ConfigPatch) -> String {
        self.fail_reason.render(change, patch)
    }

    /// Render the remedy for a change
    pub fn action_needed(&self, change: &Change, patch: &ConfigPatch) -> Option<String> {
        self.action_needed.as_ref().map(|m| m.render(change, patch))
    }

    /// Check whether a change can be applied to the live resource now
    pub async fn check(
        &self,
        change: &Change,
        patch: &ConfigPatch,
    ) -> Result<PolicyVerdict, PolicyError> {
        let Some(checker) = &self.checker else {
            // Nothing can unlock a policy without a checker
            return Ok(PolicyVerdict {
                result: CheckResult::Failed,
                reason: self.fail_reason(change, patch),
                action_needed: self.action_needed(change, patch),
                display: true,
            });
        };

        if checker.is_satisfied(change, patch).await? {
            Ok(PolicyVerdict {
                result: CheckResult::Succeeded,
                reason: "-".to_string(),
                action_needed: None,
                display: self.print_succeeded,
            })
        } else {
            Ok(PolicyVerdict {
                result: CheckResult::ActionNeeded,
                reason: self.fail_reason(change, patch),
                action_needed: self.action_needed(change, patch),
                display: true,
            })
        }
    }
}

impl PartialEq for UpdatePolicy {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.level == other.level
    }
}

impl Eq for UpdatePolicy {}

impl std::fmt::Debug for UpdatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatePolicy")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("fail_reason", &self.fail_reason)
            .field("has_checker", &self.checker.is_some())
            .field("print_succeeded", &self.print_succeeded)
            .finish()
    }
}

impl std::fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
