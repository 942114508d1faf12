//! Check command - decide whether an update can be applied to the live cluster

use cfgpatch_engine::{
    ChangeSet, CheckOptions, CheckSummary, LiveStateProvider, NoLiveState, StaticLiveState,
    to_change_set,
};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use super::PatchInputs;
use crate::display;
use crate::error::{CliError, Result};
use crate::exit_codes;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckOutput {
    patch_allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    update_policy_level: Option<i32>,
    summary: CheckSummary,
    #[serde(flatten)]
    change_set: ChangeSet,
}

pub async fn run(
    inputs: PatchInputs<'_>,
    live_state: Option<&Path>,
    cluster_name: &str,
    options: CheckOptions,
    json_output: bool,
    show_level: bool,
) -> Result<i32> {
    let provider: Arc<dyn LiveStateProvider> = match live_state {
        Some(path) => Arc::new(
            StaticLiveState::from_file(path)
                .map_err(|e| CliError::from_patch(format!("live state {}", path.display()), e))?,
        ),
        None => Arc::new(NoLiveState),
    };

    let patch = inputs
        .load()?
        .with_options(options)
        .with_cluster_name(cluster_name)
        .with_live_state(provider);

    if !json_output {
        println!(
            "{} Checking {} change(s) for cluster {}",
            style("→").blue(),
            patch.changes().len(),
            style(cluster_name).cyan()
        );
        if live_state.is_none() {
            println!(
                "  {} No live state given: conditional changes will fail",
                style("⚠").yellow()
            );
        }
    }

    let check = patch.check().await;
    let summary = check.summary();

    if json_output {
        let output = CheckOutput {
            patch_allowed: check.patch_allowed,
            update_policy_level: show_level.then(|| patch.update_policy_level()),
            summary,
            change_set: to_change_set(&check.rows),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        if show_level {
            println!(
                "  {} Update policy level: {}",
                style("→").blue(),
                patch.update_policy_level()
            );
        }
        println!();

        if check.rows.is_empty() {
            println!("{} No changes to report", style("✓").green());
        } else {
            display::print_check_table(&check.rows);
        }

        let hidden = patch.changes().len() - summary.total();
        display::print_check_summary(&summary, check.patch_allowed, hidden);
    }

    Ok(if check.patch_allowed {
        exit_codes::SUCCESS
    } else {
        exit_codes::PATCH_NOT_ALLOWED
    })
}
