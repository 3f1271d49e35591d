//! Episode planning command

use anyhow::Result;

use crate::planner::{PlanRequest, Planner};

pub fn run(planner: &Planner, req: &PlanRequest, dry_run: bool) -> Result<()> {
    if dry_run {
        let plans = planner.plan(req)?;
        println!("{:<8} {:<6} {:>6}", "ID", "Block", "Songs");
        println!("{}", "-".repeat(22));
        for plan in &plans {
            println!("{:<8} B{:<5} {:>6}", plan.session_id, plan.block_id, plan.rows.len());
        }
        return Ok(());
    }

    let blocks = planner.run(req)?;
    println!("{:<8} {:<6} {:>6}  {}", "ID", "Block", "Songs", "Directory");
    println!("{}", "-".repeat(60));
    for block in &blocks {
        let marker = if block.redirected { " (repeat)" } else { "" };
        println!(
            "{:<8} B{:<5} {:>6}  {}{}",
            block.session_id,
            block.block_id,
            block.rows,
            block.dir.display(),
            marker
        );
    }
    Ok(())
}
