//! lofty probe: reads the duration from tag and container headers

use std::path::Path;

use anyhow::Result;
use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::debug;

use super::DurationProbe;

pub struct LoftyProbe;

impl LoftyProbe {
    fn read(path: &Path) -> Result<f64> {
        let tagged_file = Probe::open(path)?.read()?;
        Ok(tagged_file.properties().duration().as_secs_f64())
    }
}

impl DurationProbe for LoftyProbe {
    fn id(&self) -> &str {
        "lofty"
    }

    fn duration(&self, path: &Path) -> Option<f64> {
        Self::read(path)
            .map_err(|e| debug!(path = %path.display(), error = %e, "lofty probe failed"))
            .ok()
    }
}
