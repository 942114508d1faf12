//! Diff command - list configuration changes without consulting the cluster

use cfgpatch_engine::Change;
use cfgpatch_engine::report::render_value;
use console::style;
use serde::Serialize;

use super::PatchInputs;
use crate::display;
use crate::error::Result;
use crate::exit_codes;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiffOutput {
    update_policy_level: i32,
    changes: Vec<ChangeOutput>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeOutput {
    parameter: String,
    old_value: String,
    new_value: String,
    update_policy: String,
    level: i32,
    is_list: bool,
}

impl From<&Change> for ChangeOutput {
    fn from(change: &Change) -> Self {
        Self {
            parameter: change.parameter(),
            old_value: render_value(change.old_value.as_ref()),
            new_value: render_value(change.new_value.as_ref()),
            update_policy: change.update_policy.name().to_string(),
            level: change.update_policy.level(),
            is_list: change.is_list,
        }
    }
}

pub fn run(inputs: PatchInputs<'_>, json_output: bool) -> Result<i32> {
    let patch = inputs.load()?;

    if json_output {
        let output = DiffOutput {
            update_policy_level: patch.update_policy_level(),
            changes: patch.changes().iter().map(ChangeOutput::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(exit_codes::SUCCESS);
    }

    if patch.changes().is_empty() {
        println!("{} No changes", style("✓").green());
        return Ok(exit_codes::SUCCESS);
    }

    println!(
        "{} {} change(s) between {} and {}",
        style("→").blue(),
        patch.changes().len(),
        inputs.base.display(),
        inputs.target.display()
    );
    display::print_changes(patch.changes());
    println!();
    println!(
        "{} {}",
        style("Update policy level:").bold(),
        level_label(patch.update_policy_level(), patch.changes())
    );

    Ok(exit_codes::SUCCESS)
}

/// Level with the name of the first policy reaching it
fn level_label(level: i32, changes: &[Change]) -> String {
    match changes.iter().find(|c| c.update_policy.level() == level) {
        Some(change) => format!("{} ({})", level, change.update_policy),
        None => level.to_string(),
    }
}
