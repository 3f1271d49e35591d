//! Segment config generation command

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::probe::ProbeChain;
use crate::segment::{generate_tables, GenerateOptions};

pub fn run(config: &Config, root: &Path, out_shared: &Path, out_favorite: &Path, opts: &GenerateOptions) -> Result<()> {
    let problems = opts.problems();
    if !problems.is_empty() {
        bail!("invalid segment options: {}", problems.join("; "));
    }
    let mut catalog = Catalog::scan(root, &config.catalog.extensions)
        .with_context(|| format!("failed to scan {}", root.display()))?;
    if opts.clamp_to_duration {
        catalog.probe_durations(&ProbeChain::new(config));
    }

    let generated = generate_tables(&catalog, opts)?;
    generated.shared.write_json(out_shared)?;
    generated.favorite.write_json(out_favorite)?;

    println!("Wrote {} shared entries to {}", generated.shared.len(), out_shared.display());
    println!("Wrote {} favorite entries to {}", generated.favorite.len(), out_favorite.display());
    Ok(())
}
