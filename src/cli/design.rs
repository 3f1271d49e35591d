//! Study design command

use anyhow::Result;
use std::path::Path;

use crate::design::{design_file_name, StudyDesign};

/// Order the block files of one session and merge them into the subject's
/// design file
pub fn run(block_dir: &Path, subject: &str, session: u32, seed: u64, out_dir: &Path) -> Result<()> {
    let fresh = StudyDesign::from_block_dir(block_dir, session, seed)?;
    let path = out_dir.join(design_file_name(subject));

    let mut design = if path.exists() {
        StudyDesign::load(&path)?
    } else {
        StudyDesign::default()
    };
    design.merge(fresh);
    design.write(&path)?;

    println!("Session {} of sub-{}:", session, subject);
    for (i, (run, task)) in design.session_runs(session).iter().enumerate() {
        println!("  {:>2}. {:<28} {}", i + 1, run.block_file_name, task.abbreviation());
    }
    println!("Design written to {}", path.display());
    Ok(())
}
