//! Display formatting for CLI output
//!
//! Provides styled rendering of:
//! - Checked patches as a table with colored results
//! - Offline change listings
//! - The policy catalogue

use cfgpatch_engine::report::{TABLE_HEADER, render_value};
use cfgpatch_engine::{Change, CheckResult, CheckSummary, ReportRow, UpdatePolicy};
use console::{Style, style};

/// Widest a table cell may grow before being truncated
const MAX_CELL_WIDTH: usize = 48;

fn result_style(result: CheckResult) -> Style {
    match result {
        CheckResult::Succeeded => Style::new().green(),
        CheckResult::ActionNeeded => Style::new().yellow(),
        CheckResult::Failed => Style::new().red(),
    }
}

fn cell(text: &str) -> String {
    console::truncate_str(text, MAX_CELL_WIDTH, "...").into_owned()
}

/// Print checked rows as a table
pub fn print_check_table(rows: &[ReportRow]) {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.cells().iter().map(|c| cell(c)).collect())
        .collect();

    let mut widths: Vec<usize> = TABLE_HEADER.iter().map(|h| h.len()).collect();
    for row in &cells {
        for (width, text) in widths.iter_mut().zip(row) {
            *width = (*width).max(console::measure_text_width(text));
        }
    }

    let header: Vec<String> = TABLE_HEADER
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:<w$}", style(h.to_uppercase()).bold(), w = *w))
        .collect();
    println!("{}", header.join("  "));

    for (row, texts) in rows.iter().zip(&cells) {
        let line: Vec<String> = texts
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(column, (text, w))| match column {
                0 => format!("{:<w$}", style(text).dim(), w = *w),
                4 => format!(
                    "{:<w$}",
                    result_style(row.check).apply_to(text).bold(),
                    w = *w
                ),
                _ => format!("{:<w$}", text, w = *w),
            })
            .collect();
        println!("{}", line.join("  ").trim_end());
    }
}

/// Print the verdict of a check
pub fn print_check_summary(summary: &CheckSummary, patch_allowed: bool, hidden: usize) {
    println!();
    println!(
        "{} {} succeeded, {} action needed, {} failed",
        style("Summary:").bold(),
        style(summary.succeeded).green(),
        style(summary.action_needed).yellow(),
        style(summary.failed).red()
    );
    if hidden > 0 {
        println!("  {} {} change(s) hidden", style("→").blue(), hidden);
    }

    if patch_allowed {
        println!("{} The update can be applied", style("✓").green().bold());
    } else {
        println!(
            "{} The update cannot be applied as requested",
            style("✗").red().bold()
        );
    }
}

/// Print one line per change, with its offline policy
pub fn print_changes(changes: &[Change]) {
    for change in changes {
        let (icon, detail) = match (&change.old_value, &change.new_value) {
            (None, Some(new)) => (style("+").green(), render_value(Some(new))),
            (Some(old), None) => (style("-").red(), render_value(Some(old))),
            (old, new) => (
                style("~").yellow(),
                format!(
                    "{} → {}",
                    render_value(old.as_ref()),
                    render_value(new.as_ref())
                ),
            ),
        };

        println!(
            "  {} {}: {} {}",
            icon,
            style(change.parameter()).cyan(),
            cell(&detail),
            style(format!("[{}]", change.update_policy)).dim()
        );
    }
}

/// Print the policy catalogue
pub fn print_policies<'a>(policies: impl Iterator<Item = &'a UpdatePolicy>) {
    println!(
        "{:<32} {:>6}  {}",
        style("POLICY").bold(),
        style("LEVEL").bold(),
        style("CAN SUCCEED").bold()
    );
    for policy in policies {
        let can_succeed = if policy.has_checker() {
            style("yes").green()
        } else {
            style("never").red()
        };
        println!("{:<32} {:>6}  {}", policy.name(), policy.level(), can_succeed);
    }
}
