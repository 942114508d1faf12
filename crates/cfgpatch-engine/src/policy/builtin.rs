//! Built-in update policies and their condition checkers
//!
//! | policy                         | level | can succeed when                                   |
//! |--------------------------------|-------|----------------------------------------------------|
//! | `IGNORED`                      | -10   | always (hidden from reports)                       |
//! | `SUPPORTED`                    | 0     | always                                             |
//! | `MAX_COUNT`                    | 1     | fleet stopped, or the value grows                  |
//! | `MAX_QUEUE_SIZE`               | 1     | fleet stopped, or the value grows                  |
//! | `MIN_COUNT`                    | 1     | fleet stopped, or no running node can be lost      |
//! | `AWSBATCH_CE_MAX_RESIZE`       | 1     | desired vCPUs fit in the new maximum               |
//! | `INCREASE_ONLY`                | 2     | the value grows                                    |
//! | `COMPUTE_FLEET_STOP`           | 10    | fleet stopped                                      |
//! | `COMPUTE_FLEET_STOP_ON_REMOVE` | 10    | fleet stopped, or the item is added                |
//! | `QUEUE_UPDATE_STRATEGY`        | 11    | fleet stopped, or a queue change with a draining   |
//! |                                |       | or terminating queue update strategy               |
//! | `HEAD_NODE_STOP`               | 20    | head node stopped                                  |
//! | `READ_ONLY_RESOURCE_BUCKET`    | 30    | generated bucket left unset (hidden when allowed)  |
//! | `MANAGED_FSX`                  | 40    | no managed FSx file system is configured           |
//! | `UNKNOWN`                      | 100   | never                                              |
//! | `UNSUPPORTED`                  | 1000  | never                                              |

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{ConditionChecker, Message, UpdatePolicy};
use crate::diff::Change;
use crate::error::PolicyError;
use crate::patch::ConfigPatch;
use crate::report::render_value;

pub const IGNORED: &str = "IGNORED";
pub const SUPPORTED: &str = "SUPPORTED";
pub const MAX_COUNT: &str = "MAX_COUNT";
pub const MAX_QUEUE_SIZE: &str = "MAX_QUEUE_SIZE";
pub const MIN_COUNT: &str = "MIN_COUNT";
pub const AWSBATCH_CE_MAX_RESIZE: &str = "AWSBATCH_CE_MAX_RESIZE";
pub const INCREASE_ONLY: &str = "INCREASE_ONLY";
pub const COMPUTE_FLEET_STOP: &str = "COMPUTE_FLEET_STOP";
pub const COMPUTE_FLEET_STOP_ON_REMOVE: &str = "COMPUTE_FLEET_STOP_ON_REMOVE";
pub const QUEUE_UPDATE_STRATEGY: &str = "QUEUE_UPDATE_STRATEGY";
pub const HEAD_NODE_STOP: &str = "HEAD_NODE_STOP";
pub const READ_ONLY_RESOURCE_BUCKET: &str = "READ_ONLY_RESOURCE_BUCKET";
pub const MANAGED_FSX: &str = "MANAGED_FSX";
pub const UNKNOWN: &str = "UNKNOWN";
pub const UNSUPPORTED: &str = "UNSUPPORTED";

/// Policy applied to fields that don't declare one
pub const DEFAULT_POLICY: &str = UNSUPPORTED;

/// Level of a patch without changes
pub const SUPPORTED_LEVEL: i32 = 0;

/// Sibling parameter read by `MIN_COUNT`
pub const MAX_COUNT_KEY: &str = "MaxCount";

/// Location of the queue update strategy in target configurations
pub const QUEUE_UPDATE_STRATEGY_PATH: &[&str] =
    &["Scheduling", "SlurmSettings", "QueueUpdateStrategy"];

/// Queue list whose items a queue update strategy applies to
pub const QUEUE_LIST_PATH: &[&str] = &["Scheduling", "SlurmQueues"];

/// Queue update strategy that still requires a stopped fleet
pub const FLEET_STOP_STRATEGY: &str = "COMPUTE_FLEET_STOP";

/// Stack parameter telling whether the resource bucket was generated
pub const GENERATED_BUCKET_PARAMETER: &str = "RemoveBucketOnDeletion";

/// Stack parameter describing the FSx file system, as
/// `shared_dir,fs_id,...` with `NONE` for unset entries
pub const FSX_OPTIONS_PARAMETER: &str = "FSXOptions";

/// Placeholder for unset entries of list-valued stack parameters
const UNSET_STACK_VALUE: &str = "NONE";

/// All built-in policies, from the least to the most restrictive
pub fn catalogue() -> Vec<UpdatePolicy> {
    vec![
        UpdatePolicy::new(IGNORED, -10)
            .with_checker(Always)
            .hide_succeeded(),
        UpdatePolicy::new(SUPPORTED, SUPPORTED_LEVEL).with_checker(Always),
        UpdatePolicy::new(MAX_COUNT, 1)
            .with_fail_reason("Shrinking a queue requires the compute fleet to be stopped first")
            .with_action_needed(Message::Computed(stop_fleet_action))
            .with_checker(FleetStoppedOrIncrease),
        UpdatePolicy::new(MAX_QUEUE_SIZE, 1)
            .with_fail_reason("Shrinking the queue size requires the compute fleet to be stopped first")
            .with_action_needed(Message::Computed(stop_fleet_action))
            .with_checker(FleetStoppedOrIncrease),
        UpdatePolicy::new(MIN_COUNT, 1)
            .with_fail_reason(
                "The applied change may cause existing nodes to be terminated hence requires \
                 the compute fleet to be stopped first",
            )
            .with_action_needed(Message::Computed(stop_fleet_action))
            .with_checker(MinCountCheck),
        UpdatePolicy::new(AWSBATCH_CE_MAX_RESIZE, 1)
            .with_fail_reason("Max vCPUs can not be lower than the current Desired vCPUs")
            .with_action_needed(Message::Computed(stop_fleet_action))
            .with_checker(BatchCapacityFits),
        UpdatePolicy::new(INCREASE_ONLY, 2)
            .with_fail_reason(Message::Computed(|change, _| {
                format!("Value of parameter '{}' cannot be decreased", change.key)
            }))
            .with_action_needed(Message::Computed(|change, _| {
                format!(
                    "Set the value of parameter '{}' to '{}' or greater",
                    change.key,
                    render_value(change.old_value.as_ref())
                )
            }))
            .with_checker(IncreaseOnly),
        UpdatePolicy::new(COMPUTE_FLEET_STOP, 10)
            .with_fail_reason("All compute nodes must be stopped")
            .with_action_needed(Message::Computed(stop_fleet_action))
            .with_checker(FleetStopped),
        UpdatePolicy::new(COMPUTE_FLEET_STOP_ON_REMOVE, 10)
            .with_fail_reason("All compute nodes must be stopped")
            .with_action_needed(Message::Computed(stop_fleet_action))
            .with_checker(FleetStoppedOnRemove),
        UpdatePolicy::new(QUEUE_UPDATE_STRATEGY, 11)
            .with_fail_reason("All compute nodes must be stopped or QueueUpdateStrategy must be set")
            .with_action_needed(Message::Computed(|_, patch| {
                format!(
                    "Stop the compute fleet of cluster '{}', or set QueueUpdateStrategy in the \
                     target configuration",
                    patch.context().cluster_name
                )
            }))
            .with_checker(FleetStoppedOrStrategySet {
                strategy_path: QUEUE_UPDATE_STRATEGY_PATH,
                queue_path: QUEUE_LIST_PATH,
            }),
        UpdatePolicy::new(HEAD_NODE_STOP, 20)
            .with_fail_reason("To perform this update action, the head node must be in a stopped state")
            .with_action_needed(Message::Computed(stop_fleet_action))
            .with_checker(HeadNodeStopped),
        UpdatePolicy::new(READ_ONLY_RESOURCE_BUCKET, 30)
            .with_fail_reason(Message::Computed(|change, _| {
                format!(
                    "'{}' parameter is a read only parameter that cannot be updated. New value \
                     '{}' will be ignored and old value '{}' will be used if you force the update.",
                    change.key,
                    render_value(change.new_value.as_ref()),
                    render_value(change.old_value.as_ref())
                )
            }))
            .with_action_needed(Message::Computed(restore_value_action))
            .with_checker(GeneratedBucketUnchanged)
            .hide_succeeded(),
        UpdatePolicy::new(MANAGED_FSX, 40)
            .with_fail_reason(Message::Computed(|change, _| {
                format!(
                    "'{}' parameter cannot be updated when a managed FSx for Lustre file system is \
                     configured. Do not force the update or the file system will be deleted and the \
                     cluster enter an unrecoverable state.",
                    change.key
                )
            }))
            .with_action_needed(Message::Computed(restore_value_action))
            .with_checker(UnmanagedFsx),
        UpdatePolicy::new(UNKNOWN, 100)
            .with_fail_reason("Update currently not supported")
            .with_action_needed("Restore the previous parameter value for the unsupported changes."),
        UpdatePolicy::new(UNSUPPORTED, 1000)
            .with_fail_reason(Message::Computed(|change, _| {
                format!(
                    "Update actions are not currently supported for the '{}' parameter",
                    change.key
                )
            }))
            .with_action_needed(Message::Computed(|change, patch| {
                format!(
                    "{}. If you need this change, please consider creating a new cluster \
                     instead of updating the existing one.",
                    restore_value_action(change, patch)
                )
            })),
    ]
}

fn stop_fleet_action(_change: &Change, patch: &ConfigPatch) -> String {
    format!(
        "Stop the compute fleet of cluster '{}' and run the update again",
        patch.context().cluster_name
    )
}

fn restore_value_action(change: &Change, _patch: &ConfigPatch) -> String {
    match &change.old_value {
        Some(old) => format!(
            "Restore the value of parameter '{}' to '{}'",
            change.key,
            render_value(Some(old))
        ),
        None => format!("Remove the parameter '{}'", change.key),
    }
}

fn number(value: Option<&JsonValue>, policy: &str, change: &Change) -> Result<f64, PolicyError> {
    value
        .and_then(JsonValue::as_f64)
        .ok_or_else(|| PolicyError::Unsupported {
            policy: policy.to_string(),
            key: change.key.clone(),
            message: format!("expected a number, found '{}'", render_value(value)),
        })
}

/// Always satisfied
#[derive(Debug, Default, Clone, Copy)]
pub struct Always;

#[async_trait]
impl ConditionChecker for Always {
    async fn is_satisfied(&self, _: &Change, _: &ConfigPatch) -> Result<bool, PolicyError> {
        Ok(true)
    }
}

/// Satisfied when the compute fleet has no running capacity
#[derive(Debug, Default, Clone, Copy)]
pub struct FleetStopped;

#[async_trait]
impl ConditionChecker for FleetStopped {
    async fn is_satisfied(&self, _: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        Ok(!patch.conditions().has_running_capacity().await?)
    }
}

/// Satisfied when the fleet is stopped or the numeric value doesn't decrease
#[derive(Debug, Default, Clone, Copy)]
pub struct FleetStoppedOrIncrease;

#[async_trait]
impl ConditionChecker for FleetStoppedOrIncrease {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        if !patch.conditions().has_running_capacity().await? {
            return Ok(true);
        }
        let policy = change.update_policy.name();
        let old = number(change.old_value.as_ref(), policy, change)?;
        let new = number(change.new_value.as_ref(), policy, change)?;
        Ok(new >= old)
    }
}

/// Satisfied when the fleet is stopped, or when the new minimum doesn't
/// shrink and the dynamic range (`MaxCount - MinCount`) doesn't shrink either
#[derive(Debug, Default, Clone, Copy)]
pub struct MinCountCheck;

#[async_trait]
impl ConditionChecker for MinCountCheck {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        if !patch.conditions().has_running_capacity().await? {
            return Ok(true);
        }

        let old_min = number(change.old_value.as_ref(), MIN_COUNT, change)?;
        let new_min = number(change.new_value.as_ref(), MIN_COUNT, change)?;
        let old_max = number(
            patch
                .base_section(change)
                .and_then(|s| s.get(MAX_COUNT_KEY)),
            MIN_COUNT,
            change,
        )?;
        let new_max = number(
            patch
                .target_section(change)
                .and_then(|s| s.get(MAX_COUNT_KEY)),
            MIN_COUNT,
            change,
        )?;

        Ok(new_min >= old_min && new_max - new_min >= old_max - old_min)
    }
}

/// Satisfied when the numeric value doesn't decrease
#[derive(Debug, Default, Clone, Copy)]
pub struct IncreaseOnly;

#[async_trait]
impl ConditionChecker for IncreaseOnly {
    async fn is_satisfied(&self, change: &Change, _: &ConfigPatch) -> Result<bool, PolicyError> {
        let old = number(change.old_value.as_ref(), INCREASE_ONLY, change)?;
        let new = number(change.new_value.as_ref(), INCREASE_ONLY, change)?;
        Ok(new >= old)
    }
}

/// Satisfied when the batch environment's desired vCPUs fit in the new maximum
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchCapacityFits;

#[async_trait]
impl ConditionChecker for BatchCapacityFits {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        let new_max = number(change.new_value.as_ref(), AWSBATCH_CE_MAX_RESIZE, change)?;
        let desired = patch.conditions().batch_desired_vcpus().await?;
        Ok(desired as f64 <= new_max)
    }
}

/// Satisfied when an item is added, or when the fleet is stopped
#[derive(Debug, Default, Clone, Copy)]
pub struct FleetStoppedOnRemove;

#[async_trait]
impl ConditionChecker for FleetStoppedOnRemove {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        if change.old_value.is_none() {
            return Ok(true);
        }
        Ok(!patch.conditions().has_running_capacity().await?)
    }
}

/// Satisfied when the fleet is stopped, or when the change sits inside an
/// item of the list at `queue_path` and the target configuration sets an
/// update strategy at `strategy_path` other than stopping the fleet
#[derive(Debug, Clone, Copy)]
pub struct FleetStoppedOrStrategySet {
    pub strategy_path: &'static [&'static str],
    pub queue_path: &'static [&'static str],
}

impl FleetStoppedOrStrategySet {
    fn covers(&self, change: &Change) -> bool {
        let Some((list, sections)) = self.queue_path.split_last() else {
            return false;
        };
        let Some(item) = change.path.get(sections.len()) else {
            return false;
        };
        let in_sections = change
            .path
            .iter()
            .zip(sections)
            .all(|(segment, section)| segment.as_str() == *section);
        in_sections && item.split_once('[').is_some_and(|(key, _)| key == *list)
    }

    fn strategy_set(&self, patch: &ConfigPatch) -> bool {
        patch
            .target_config()
            .get_path(self.strategy_path)
            .is_some_and(|strategy| strategy.as_str() != Some(FLEET_STOP_STRATEGY))
    }
}

#[async_trait]
impl ConditionChecker for FleetStoppedOrStrategySet {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        if self.covers(change) && self.strategy_set(patch) {
            return Ok(true);
        }
        Ok(!patch.conditions().has_running_capacity().await?)
    }
}

/// Satisfied when the head node is stopped
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadNodeStopped;

#[async_trait]
impl ConditionChecker for HeadNodeStopped {
    async fn is_satisfied(&self, _: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        Ok(patch.conditions().head_node_state().await? == "stopped")
    }
}

/// Satisfied when the bucket was generated at creation and the target leaves
/// it unset, so nothing really changes on the live resource
#[derive(Debug, Default, Clone, Copy)]
pub struct GeneratedBucketUnchanged;

#[async_trait]
impl ConditionChecker for GeneratedBucketUnchanged {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        let unset = match &change.new_value {
            None => true,
            Some(JsonValue::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if !unset {
            return Ok(false);
        }
        let generated = patch
            .conditions()
            .stack_parameter(GENERATED_BUCKET_PARAMETER)
            .await?;
        Ok(generated.as_deref() == Some("True"))
    }
}

/// Satisfied when the FSx file system, if any, was not created with the
/// cluster: both its shared directory and its id were given by the user
#[derive(Debug, Default, Clone, Copy)]
pub struct UnmanagedFsx;

#[async_trait]
impl ConditionChecker for UnmanagedFsx {
    async fn is_satisfied(&self, change: &Change, patch: &ConfigPatch) -> Result<bool, PolicyError> {
        let options = patch
            .conditions()
            .stack_parameter(FSX_OPTIONS_PARAMETER)
            .await?
            .ok_or_else(|| PolicyError::Unsupported {
                policy: MANAGED_FSX.to_string(),
                key: change.key.clone(),
                message: format!("stack parameter '{}' is not set", FSX_OPTIONS_PARAMETER),
            })?;

        let mut entries = options.split(',').map(str::trim);
        let shared_dir = entries.next().unwrap_or(UNSET_STACK_VALUE);
        let fs_id = entries.next().unwrap_or(UNSET_STACK_VALUE);
        Ok(shared_dir != UNSET_STACK_VALUE && fs_id != UNSET_STACK_VALUE)
    }
}
