//! Configuration patches
//!
//! A [`ConfigPatch`] is built once per update request. Construction validates
//! both configurations against the schema and computes the changes eagerly;
//! [`ConfigPatch::check`] then asks every change's policy whether it can be
//! applied to the live resource now.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use cfgpatch_core::ConfigTree;

use crate::condition::{ConditionCache, DEFAULT_CONDITION_TIMEOUT, LiveStateProvider, NoLiveState};
use crate::diff::{Change, TreeDiffer};
use crate::error::Result;
use crate::policy::{CheckResult, PolicyVerdict, builtin};
use crate::report::ReportRow;
use crate::schema::SchemaDescriptor;

/// Default number of changes checked at the same time
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Information about the updated resource, available to policy messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchContext {
    pub cluster_name: String,
}

impl Default for PatchContext {
    fn default() -> Self {
        Self {
            cluster_name: "cluster".to_string(),
        }
    }
}

/// Tuning of [`ConfigPatch::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Upper bound for a single live-state query
    pub condition_timeout: Duration,
    /// Number of changes evaluated concurrently
    pub max_concurrency: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            condition_timeout: DEFAULT_CONDITION_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Outcome of [`ConfigPatch::check`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchCheck {
    /// Whether every change, displayed or not, succeeded
    pub patch_allowed: bool,
    /// Displayed changes, in change order
    pub rows: Vec<ReportRow>,
}

/// Row counts per check result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub succeeded: usize,
    pub action_needed: usize,
    pub failed: usize,
}

impl CheckSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.action_needed + self.failed
    }
}

impl PatchCheck {
    /// Count displayed rows per result
    pub fn summary(&self) -> CheckSummary {
        let mut summary = CheckSummary::default();
        for row in &self.rows {
            match row.check {
                CheckResult::Succeeded => summary.succeeded += 1,
                CheckResult::ActionNeeded => summary.action_needed += 1,
                CheckResult::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

/// Changes between two configurations of the same resource
pub struct ConfigPatch {
    base: ConfigTree,
    target: ConfigTree,
    schema: Arc<SchemaDescriptor>,
    changes: Vec<Change>,
    provider: Arc<dyn LiveStateProvider>,
    conditions: ConditionCache,
    context: PatchContext,
    options: CheckOptions,
}

impl ConfigPatch {
    /// Compare two configurations
    ///
    /// Both trees are copied, validated against the schema and stripped of
    /// non-patchable fields. Fails only when a tree doesn't match the schema.
    /// The patch has no live state until [`with_live_state`](Self::with_live_state)
    /// is called.
    pub fn new(
        base: &ConfigTree,
        target: &ConfigTree,
        schema: Arc<SchemaDescriptor>,
    ) -> Result<Self> {
        let base = prepare(base, &schema)?;
        let target = prepare(target, &schema)?;
        let changes = TreeDiffer::new().diff(&base, &target, &schema)?;

        debug!(changes = changes.len(), "computed configuration patch");

        let provider: Arc<dyn LiveStateProvider> = Arc::new(NoLiveState);
        let options = CheckOptions::default();
        Ok(Self {
            base,
            target,
            schema,
            changes,
            conditions: ConditionCache::new(Arc::clone(&provider), options.condition_timeout),
            provider,
            context: PatchContext::default(),
            options,
        })
    }

    /// Answer live conditions from a provider
    ///
    /// Resets the condition cache.
    pub fn with_live_state(mut self, provider: Arc<dyn LiveStateProvider>) -> Self {
        self.provider = provider;
        self.reset_conditions();
        self
    }

    /// Set check options
    ///
    /// Resets the condition cache.
    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self.reset_conditions();
        self
    }

    pub fn with_context(mut self, context: PatchContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.context.cluster_name = cluster_name.into();
        self
    }

    fn reset_conditions(&mut self) {
        self.conditions =
            ConditionCache::new(Arc::clone(&self.provider), self.options.condition_timeout);
    }

    /// Changes in detection order
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Base configuration, without its non-patchable fields
    pub fn base_config(&self) -> &ConfigTree {
        &self.base
    }

    /// Target configuration, without its non-patchable fields
    pub fn target_config(&self) -> &ConfigTree {
        &self.target
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn context(&self) -> &PatchContext {
        &self.context
    }

    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    /// Live conditions, memoized for the lifetime of the patch
    pub fn conditions(&self) -> &ConditionCache {
        &self.conditions
    }

    /// Section of the base configuration holding a change
    pub fn base_section(&self, change: &Change) -> Option<&JsonValue> {
        self.schema
            .locate_at(self.base.inner(), &change.path, &change.base_positions())
    }

    /// Section of the target configuration holding a change
    pub fn target_section(&self, change: &Change) -> Option<&JsonValue> {
        self.schema
            .locate_at(self.target.inner(), &change.path, &change.target_positions())
    }

    /// Most restrictive policy level among all changes
    ///
    /// An offline estimate: it never consults live state.
    pub fn update_policy_level(&self) -> i32 {
        Self::update_policy_level_of(&self.changes)
    }

    /// Most restrictive policy level among the given changes, or the level of
    /// `SUPPORTED` when there are none
    pub fn update_policy_level_of(changes: &[Change]) -> i32 {
        changes
            .iter()
            .map(|c| c.update_policy.level())
            .max()
            .unwrap_or(builtin::SUPPORTED_LEVEL)
    }

    /// Address of a parameter: `Section.List[key].Parameter`
    pub fn build_param_path(path: &[String], key: &str) -> String {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", path.join("."), key)
        }
    }

    /// Check whether every change can be applied to the live resource now
    ///
    /// Changes are evaluated concurrently; rows keep the change order. Live
    /// conditions are queried at most once per patch, so calling this again
    /// doesn't hit the provider twice.
    pub async fn check(&self) -> PatchCheck {
        let verdicts: Vec<(&Change, PolicyVerdict)> = stream::iter(&self.changes)
            .map(|change| async move { (change, self.check_change(change).await) })
            .buffered(self.options.max_concurrency.max(1))
            .collect()
            .await;

        let patch_allowed = verdicts.iter().all(|(_, v)| v.result.is_success());
        let rows: Vec<ReportRow> = verdicts
            .into_iter()
            .filter(|(_, v)| v.display)
            .map(|(change, verdict)| ReportRow::new(change, verdict))
            .collect();

        info!(
            changes = self.changes.len(),
            displayed = rows.len(),
            patch_allowed,
            "checked configuration patch"
        );

        PatchCheck {
            patch_allowed,
            rows,
        }
    }

    async fn check_change(&self, change: &Change) -> PolicyVerdict {
        match change.update_policy.check(change, self).await {
            Ok(verdict) => {
                debug!(
                    parameter = %change.parameter(),
                    result = %verdict.result,
                    "checked change"
                );
                verdict
            }
            Err(e) => {
                warn!(
                    parameter = %change.parameter(),
                    policy = %change.update_policy,
                    error = %e,
                    "policy check failed"
                );
                PolicyVerdict {
                    result: CheckResult::Failed,
                    reason: e.to_string(),
                    action_needed: None,
                    display: true,
                }
            }
        }
    }
}

impl std::fmt::Debug for ConfigPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigPatch")
            .field("changes", &self.changes)
            .field("context", &self.context)
            .field("options", &self.options)
            .field("conditions", &self.conditions)
            .finish()
    }
}

fn prepare(tree: &ConfigTree, schema: &SchemaDescriptor) -> Result<ConfigTree> {
    schema.validate(tree.inner())?;
    let mut copy = tree.clone();
    schema.strip_unpatchable(copy.inner_mut());
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, LiveStateSnapshot, StaticLiveState};
    use crate::error::{PatchError, PolicyError};
    use crate::policy::{ConditionChecker, PolicyRegistry, UpdatePolicy};
    use crate::schema::SchemaField;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Broken;

    #[async_trait]
    impl ConditionChecker for Broken {
        async fn is_satisfied(&self, _: &Change, _: &ConfigPatch) -> std::result::Result<bool, PolicyError> {
            Err(PolicyError::custom("checker exploded"))
        }
    }

    fn schema() -> Arc<SchemaDescriptor> {
        let mut registry = PolicyRegistry::builtin();
        let broken = registry.register(UpdatePolicy::new("BROKEN", 5).with_checker(Broken));
        let policy = |name: &str| registry.get(name).unwrap();

        let queue = SchemaDescriptor::new(vec![
            SchemaField::scalar("Name", policy(builtin::UNSUPPORTED)),
            SchemaField::scalar("InstanceType", policy(builtin::COMPUTE_FLEET_STOP)),
            SchemaField::scalar("MinCount", policy(builtin::SUPPORTED)),
            SchemaField::scalar("MaxCount", policy(builtin::MAX_COUNT)),
            SchemaField::scalar("Tag", broken),
        ]);
        let scheduling = SchemaDescriptor::new(vec![SchemaField::list(
            "Queues",
            policy(builtin::COMPUTE_FLEET_STOP_ON_REMOVE),
            queue,
        )]);
        let dev = SchemaDescriptor::new(vec![SchemaField::scalar(
            "Cookbook",
            policy(builtin::UNSUPPORTED),
        )]);

        Arc::new(SchemaDescriptor::new(vec![
            SchemaField::scalar("Region", policy(builtin::UNSUPPORTED)),
            SchemaField::nested("Scheduling", policy(builtin::SUPPORTED), scheduling),
            SchemaField::nested("DevSettings", policy(builtin::UNSUPPORTED), dev).not_patchable(),
        ]))
    }

    fn base() -> ConfigTree {
        ConfigTree::from_value(json!({
            "Region": "eu-west-1",
            "Scheduling": {"Queues": [
                {"Name": "q1", "InstanceType": "c5.xlarge", "MinCount": 0, "MaxCount": 10},
            ]},
        }))
        .unwrap()
    }

    fn target(queue: JsonValue) -> ConfigTree {
        ConfigTree::from_value(json!({
            "Region": "eu-west-1",
            "Scheduling": {"Queues": [queue]},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_supported_change_is_allowed() {
        let target = target(
            json!({"Name": "q1", "InstanceType": "c5.xlarge", "MinCount": 2, "MaxCount": 10}),
        );
        let patch = ConfigPatch::new(&base(), &target, schema()).unwrap();

        assert_eq!(patch.changes().len(), 1);
        assert_eq!(patch.update_policy_level(), 0);

        let check = patch.check().await;
        assert!(check.patch_allowed);
        assert_eq!(check.rows.len(), 1);
        assert_eq!(check.rows[0].check, CheckResult::Succeeded);
        assert_eq!(check.rows[0].reason, "-");
    }

    #[tokio::test]
    async fn test_fleet_stop_needs_action_when_running() {
        let target = target(
            json!({"Name": "q1", "InstanceType": "c5.2xlarge", "MinCount": 0, "MaxCount": 10}),
        );

        let running = ConfigPatch::new(&base(), &target, schema())
            .unwrap()
            .with_live_state(Arc::new(StaticLiveState::running_fleet()))
            .with_cluster_name("prod");
        let check = running.check().await;

        assert!(!check.patch_allowed);
        let row = &check.rows[0];
        assert_eq!(row.check, CheckResult::ActionNeeded);
        assert_eq!(row.reason, "All compute nodes must be stopped");
        assert_eq!(
            row.action_needed.as_deref(),
            Some("Stop the compute fleet of cluster 'prod' and run the update again")
        );
        assert_eq!(row.update_policy, builtin::COMPUTE_FLEET_STOP);

        let stopped = ConfigPatch::new(&base(), &target, schema())
            .unwrap()
            .with_live_state(Arc::new(StaticLiveState::stopped_fleet()));
        let check = stopped.check().await;

        assert!(check.patch_allowed);
        assert_eq!(check.rows[0].check, CheckResult::Succeeded);
    }

    #[tokio::test]
    async fn test_failing_condition_does_not_abort_other_rows() {
        let base = ConfigTree::from_value(json!({
            "Region": "eu-west-1",
            "Scheduling": {"Queues": [
                {"Name": "q1", "InstanceType": "c5.xlarge", "MinCount": 0},
            ]},
        }))
        .unwrap();
        let target = target(json!({"Name": "q1", "InstanceType": "c5.2xlarge", "MinCount": 1}));
        let provider = StaticLiveState::new(LiveStateSnapshot {
            failures: BTreeMap::from([("running-capacity".to_string(), "boom".to_string())]),
            ..Default::default()
        });

        let patch = ConfigPatch::new(&base, &target, schema())
            .unwrap()
            .with_live_state(Arc::new(provider));
        let check = patch.check().await;

        assert!(!check.patch_allowed);
        assert_eq!(check.rows.len(), 2);
        assert_eq!(check.rows[0].key, "InstanceType");
        assert_eq!(check.rows[0].check, CheckResult::Failed);
        assert_eq!(
            check.rows[0].reason,
            "failed to evaluate 'running-capacity': boom"
        );
        assert_eq!(check.rows[1].key, "MinCount");
        assert_eq!(check.rows[1].check, CheckResult::Succeeded);
    }

    #[tokio::test]
    async fn test_checker_error_is_failed_row() {
        let target = target(json!({
            "Name": "q1", "InstanceType": "c5.xlarge", "MinCount": 0, "MaxCount": 10, "Tag": "x",
        }));
        let patch = ConfigPatch::new(&base(), &target, schema()).unwrap();
        let check = patch.check().await;

        assert!(!check.patch_allowed);
        assert_eq!(check.rows[0].check, CheckResult::Failed);
        assert_eq!(check.rows[0].reason, "checker exploded");
        assert_eq!(check.summary().failed, 1);
    }

    #[tokio::test]
    async fn test_check_is_idempotent_and_cached() {
        let provider = StaticLiveState::running_fleet();
        let target = target(json!({
            "Name": "q1", "InstanceType": "c5.2xlarge", "MinCount": 0, "MaxCount": 4,
        }));
        let patch = ConfigPatch::new(&base(), &target, schema())
            .unwrap()
            .with_live_state(Arc::new(provider.clone()));

        let first = patch.check().await;
        let second = patch.check().await;

        assert_eq!(first, second);
        assert_eq!(first.rows.len(), 2);
        assert_eq!(provider.query_count(&Condition::RunningCapacity), 1);
        assert_eq!(provider.total_queries(), 1);
    }

    #[tokio::test]
    async fn test_patch_allowed_counts_hidden_rows() {
        let mut registry = PolicyRegistry::builtin();
        let supported = registry.get(builtin::SUPPORTED).unwrap();
        let hidden =
            registry.register(UpdatePolicy::derived_from(&supported, "QUIET").hide_succeeded());
        let schema = Arc::new(SchemaDescriptor::new(vec![
            SchemaField::scalar("Quiet", hidden),
            SchemaField::scalar("Region", registry.get(builtin::UNSUPPORTED).unwrap()),
        ]));

        let base = ConfigTree::from_value(json!({"Quiet": 1, "Region": "a"})).unwrap();
        let quiet_only = ConfigTree::from_value(json!({"Quiet": 2, "Region": "a"})).unwrap();
        let both = ConfigTree::from_value(json!({"Quiet": 2, "Region": "b"})).unwrap();

        let check = ConfigPatch::new(&base, &quiet_only, Arc::clone(&schema))
            .unwrap()
            .check()
            .await;
        assert!(check.patch_allowed);
        assert!(check.rows.is_empty());

        let check = ConfigPatch::new(&base, &both, schema).unwrap().check().await;
        assert!(!check.patch_allowed);
        assert_eq!(check.rows.len(), 1);
        assert_eq!(check.rows[0].update_policy, builtin::UNSUPPORTED);
    }

    #[test]
    fn test_update_policy_level() {
        let target = target(json!({
            "Name": "q1", "InstanceType": "c5.2xlarge", "MinCount": 3, "MaxCount": 10,
        }));
        let patch = ConfigPatch::new(&base(), &target, schema()).unwrap();

        assert_eq!(patch.update_policy_level(), 10);
        assert_eq!(ConfigPatch::update_policy_level_of(&patch.changes()[1..]), 0);
        assert_eq!(ConfigPatch::update_policy_level_of(&[]), 0);

        let same = ConfigPatch::new(&base(), &base(), schema()).unwrap();
        assert!(same.changes().is_empty());
        assert_eq!(same.update_policy_level(), 0);
    }

    #[test]
    fn test_non_patchable_sections_are_ignored() {
        let mut target = base();
        target.inner_mut()["DevSettings"] = json!({"Cookbook": "custom"});

        let patch = ConfigPatch::new(&base(), &target, schema()).unwrap();
        assert!(patch.changes().is_empty());
        assert!(patch.target_config().get("DevSettings").is_none());
    }

    #[test]
    fn test_structural_mismatch_aborts() {
        let target = ConfigTree::from_value(json!({"Scheduling": {"Queues": "q1"}})).unwrap();
        let err = ConfigPatch::new(&base(), &target, schema()).unwrap_err();
        assert!(matches!(err, PatchError::Structure { .. }));
    }

    #[test]
    fn test_sections() {
        let target = target(
            json!({"Name": "q1", "InstanceType": "c5.xlarge", "MinCount": 2, "MaxCount": 12}),
        );
        let patch = ConfigPatch::new(&base(), &target, schema()).unwrap();
        let change = &patch.changes()[0];

        assert_eq!(patch.base_section(change).unwrap()["MaxCount"], json!(10));
        assert_eq!(patch.target_section(change).unwrap()["MaxCount"], json!(12));

        let mut elsewhere = change.clone();
        elsewhere.path = vec!["Nope".to_string()];
        elsewhere.item_positions = vec![None];
        assert!(patch.target_section(&elsewhere).is_none());
    }

    #[test]
    fn test_build_param_path() {
        assert_eq!(ConfigPatch::build_param_path(&[], "Region"), "Region");
        assert_eq!(
            ConfigPatch::build_param_path(
                &["Scheduling".to_string(), "Queues[q1]".to_string()],
                "MinCount"
            ),
            "Scheduling.Queues[q1].MinCount"
        );
    }
}
