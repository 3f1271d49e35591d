//! Sanity check command

use anyhow::{bail, Result};
use std::path::Path;

use crate::sanity::{check_conditions, check_table, table_conditions};
use crate::trial::TrialTable;

pub fn run(input: &Path, conditions: bool, json: bool) -> Result<()> {
    let table = TrialTable::read_csv(input)?;
    let report = check_table(&table)?;
    let condition_report = if conditions {
        Some(check_conditions(&table_conditions(&table)?))
    } else {
        None
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        if let Some(c) = &condition_report {
            println!("{}", serde_json::to_string_pretty(c)?);
        }
    } else {
        println!("Trials:        {}", report.n_trials);
        println!("Unique pairs:  {}", report.n_unique_pairs);
        println!("No repeats:    {}", report.ok_no_repeats);
        println!("Adjacency:     {}", report.ok_adjacency);
        for (pair, count) in &report.repeated_pairs {
            println!("  repeated {} x{}", pair, count);
        }
        for v in &report.adjacency_violations {
            println!("  trial {} position {}: {} -> {}", v.trial, v.position, v.left, v.right);
        }
        if let Some(c) = &condition_report {
            println!("Unique TCs:    {}", c.unique);
            println!("Balanced:      {} {:?}", c.balanced, c.object_counts);
        }
    }

    let conditions_ok = condition_report.map_or(true, |c| c.unique && c.balanced);
    if !report.ok || !conditions_ok {
        bail!("sanity check failed for {}", input.display());
    }
    Ok(())
}
