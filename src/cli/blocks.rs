//! Partition and sample commands

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::block::{write_blocks, RecordTable};

pub fn partition(input: &Path, n_blocks: usize, seed: u64, out_dir: &Path, stem: Option<String>) -> Result<()> {
    let table = RecordTable::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let stem = match stem {
        Some(stem) => stem,
        None => input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
            .context("input has no file stem, pass --stem")?,
    };

    let paths = write_blocks(&table, n_blocks, seed, out_dir, &stem)?;
    println!("Split {} rows into {} blocks:", table.rows.len(), paths.len());
    for path in paths {
        println!("  {}", path.display());
    }
    Ok(())
}

pub fn sample(input: &Path, count: usize, seed: u64, out: Option<PathBuf>) -> Result<()> {
    let table = RecordTable::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let sampled = table.sample(count, seed);
    let out = out.unwrap_or_else(|| {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("table");
        input.with_file_name(format!("{}_sample.csv", stem))
    });
    sampled.write(&out)?;
    println!("Wrote {} of {} rows to {}", sampled.rows.len(), table.rows.len(), out.display());
    Ok(())
}
