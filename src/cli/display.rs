//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use crate::fleet::{FleetRegistry, TagFilterGroup};
use crate::rollout::RunReport;
use crate::search::SearchResults;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No fleets found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    push_row(
        &mut output,
        headers.iter().map(|h| h.to_uppercase()),
        &widths,
    );
    for row in rows {
        push_row(&mut output, row.into_iter(), &widths);
    }
    output
}

fn push_row(output: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push_str("   ");
        }
        match widths.get(i) {
            Some(width) => line.push_str(&format!("{:width$}", cell, width = width)),
            None => line.push_str(&cell),
        }
    }
    output.push_str(line.trim_end());
    output.push('\n');
}

// ============================================================================
// Fleet display
// ============================================================================

/// Format every fleet in the registry, sorted case-insensitively
pub fn format_fleet_list(registry: &FleetRegistry) -> String {
    let rows = registry
        .sorted_names()
        .into_iter()
        .filter_map(|name| registry.get(&name))
        .map(|fleet| {
            vec![
                fleet.name.clone(),
                fleet.region.clone(),
                fleet.capacity.min.to_string(),
                fleet.capacity.desired.to_string(),
                fleet.capacity.max.to_string(),
            ]
        })
        .collect();

    format_table(&["NAME", "REGION", "MIN", "DESIRED", "MAX"], rows)
}

/// Format compiled tag filters, one group per line
pub fn format_filters(groups: &[TagFilterGroup]) -> String {
    let mut output = String::from("Tag filters:\n");
    for (i, group) in groups.iter().enumerate() {
        let pairs: Vec<String> = group
            .pairs()
            .iter()
            .map(|(k, v)| format!("{}=={}", k, v))
            .collect();
        output.push_str(&format!("  [{}] {}\n", i + 1, pairs.join(" AND ")));
    }
    output
}

pub fn format_search_results(results: &SearchResults) -> String {
    if results.is_empty() {
        return "No matching fleets.\n".to_string();
    }
    let rows = results
        .numbered()
        .map(|(id, name)| vec![id.to_string(), name.to_string()])
        .collect();
    let mut output = format_table(&["ID", "NAME"], rows);
    output.push_str("\nType '/r ID [ID ...]' to run on the selected fleets\n");
    output
}

pub fn format_help() -> String {
    [
        "TEXT[,TEXT...]   search fleet names (case-insensitive, any term matches)",
        "/r ID [ID ...]   run on fleets from the last search",
        "ls               list all fleets",
        "help             show this help",
        "exit             leave the prompt",
    ]
    .iter()
    .map(|line| format!("  {}\n", line))
    .collect()
}

// ============================================================================
// Run report
// ============================================================================

pub fn format_run_report(report: &RunReport) -> String {
    let mut output = String::new();

    let prefix = if report.dry_run { "(DRY RUN) " } else { "" };
    output.push_str(&format!("{}Run complete: {}\n", prefix, report.mode));
    if report.production {
        output.push_str("Account:    production\n");
    }
    output.push_str(&format!("Completed:  {}\n", report.completed.len()));
    for name in &report.completed {
        if !report.skipped.contains(name) {
            output.push_str(&format!("  - {}\n", name));
        }
    }
    if !report.skipped.is_empty() {
        output.push_str(&format!("Skipped:    {}\n", report.skipped.len()));
        for name in &report.skipped {
            output.push_str(&format!("  - {} (not found)\n", name));
        }
    }
    output.push_str(&format!("Polls:      {}\n", report.passes));
    output.push_str(&format!("Mutations:  {}\n", report.mutations));

    output
}

/// Run report as pretty-printed JSON
pub fn format_run_report_json(report: &RunReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}
