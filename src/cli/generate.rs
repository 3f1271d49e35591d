//! Condition generation commands

use anyhow::{Context, Result};
use std::path::Path;

use crate::sanity::check_conditions;
use crate::sequence::{balanced_conditions, oneback_chains};
use crate::trial::{instantiate, Trace};

/// 1-back chains covering `ntcs` distinct pairs
pub fn oneback(ntcs: usize, seq_len: usize, seed: u64, trace: Trace, out: &Path) -> Result<()> {
    let chains = oneback_chains(ntcs, seq_len, seed)?;
    let table = instantiate(&chains, seed, trace)?;
    table
        .write_csv(out)
        .with_context(|| format!("failed to write {}", out.display()))?;

    println!(
        "Wrote {} trials ({} pairs, {} positions) to {}",
        table.len(),
        ntcs,
        table.seq_len,
        out.display()
    );
    Ok(())
}

/// Balanced unique conditions of `nobjs` objects each
pub fn conditions(ntcs: usize, nobjs: usize, seed: u64, trace: Trace, out: &Path) -> Result<()> {
    let chains = balanced_conditions(ntcs, nobjs, seed)?;
    let report = check_conditions(&chains);
    let table = instantiate(&chains, seed, trace)?;
    table
        .write_csv(out)
        .with_context(|| format!("failed to write {}", out.display()))?;

    println!("Wrote {} conditions to {}", table.len(), out.display());
    println!("Object counts: {:?}", report.object_counts);
    Ok(())
}
