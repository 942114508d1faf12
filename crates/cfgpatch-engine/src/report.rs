//! Rendering of checked patches
//!
//! Two renderings are produced from the same rows: a table for humans and a
//! change-set document for machines.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::diff::Change;
use crate::policy::{CheckResult, PolicyVerdict};

/// Columns of [`to_table`]
pub const TABLE_HEADER: [&str; 8] = [
    "param_path",
    "parameter",
    "old value",
    "new value",
    "check",
    "reason",
    "action_needed",
    "update_policy",
];

/// Placeholder for absent values
pub const PLACEHOLDER: &str = "-";

/// A checked change, as shown in reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    /// Dotted path of the enclosing section
    pub param_path: String,
    /// Data key of the changed field
    pub key: String,
    /// Full address: `param_path.key`
    pub parameter: String,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub check: CheckResult,
    pub reason: String,
    pub action_needed: Option<String>,
    pub update_policy: String,
}

impl ReportRow {
    pub fn new(change: &Change, verdict: PolicyVerdict) -> Self {
        Self {
            param_path: change.param_path(),
            key: change.key.clone(),
            parameter: change.parameter(),
            old_value: change.old_value.clone(),
            new_value: change.new_value.clone(),
            check: verdict.result,
            reason: verdict.reason,
            action_needed: verdict.action_needed,
            update_policy: change.update_policy.name().to_string(),
        }
    }

    /// Cells of this row, in [`TABLE_HEADER`] order
    pub fn cells(&self) -> [String; 8] {
        [
            self.param_path.clone(),
            self.key.clone(),
            render_value(self.old_value.as_ref()),
            render_value(self.new_value.as_ref()),
            self.check.to_string(),
            self.reason.clone(),
            self.action_needed
                .clone()
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            self.update_policy.clone(),
        ]
    }
}

/// Render a value for display
///
/// Strings are shown verbatim, absent values as `-`, anything else as
/// compact JSON.
pub fn render_value(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => PLACEHOLDER.to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Header row followed by one row per checked change
pub fn to_table(rows: &[ReportRow]) -> Vec<Vec<String>> {
    let mut table = Vec::with_capacity(rows.len() + 1);
    table.push(TABLE_HEADER.iter().map(|h| h.to_string()).collect());
    table.extend(rows.iter().map(|row| row.cells().to_vec()));
    table
}

/// Machine-readable list of requested changes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    #[serde(rename = "changeSet")]
    pub change_set: Vec<ChangeSetEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetEntry {
    pub parameter: String,
    pub requested_value: Option<JsonValue>,
    pub current_value: Option<JsonValue>,
    pub update_policy: String,
}

/// Build the change-set of the checked changes
pub fn to_change_set(rows: &[ReportRow]) -> ChangeSet {
    ChangeSet {
        change_set: rows
            .iter()
            .map(|row| ChangeSetEntry {
                parameter: row.parameter.clone(),
                requested_value: row.new_value.clone(),
                current_value: row.old_value.clone(),
                update_policy: row.update_policy.clone(),
            })
            .collect(),
    }
}
