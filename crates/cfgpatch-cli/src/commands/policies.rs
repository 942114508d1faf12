//! Policies command - list the built-in update policies

use cfgpatch_engine::PolicyRegistry;
use serde::Serialize;

use crate::display;
use crate::error::Result;
use crate::exit_codes;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyOutput<'a> {
    name: &'a str,
    level: i32,
    can_succeed: bool,
    print_succeeded: bool,
}

pub fn run(json_output: bool) -> Result<i32> {
    let registry = PolicyRegistry::builtin();

    if json_output {
        let policies: Vec<PolicyOutput<'_>> = registry
            .iter()
            .map(|p| PolicyOutput {
                name: p.name(),
                level: p.level(),
                can_succeed: p.has_checker(),
                print_succeeded: p.print_succeeded(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&policies)?);
    } else {
        display::print_policies(registry.iter().map(|p| p.as_ref()));
    }

    Ok(exit_codes::SUCCESS)
}
