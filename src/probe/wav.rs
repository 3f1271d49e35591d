//! WAV probe backed by hound

use std::path::Path;

use anyhow::{bail, Result};
use hound::WavReader;
use tracing::debug;

use super::DurationProbe;

pub struct WavProbe;

impl WavProbe {
    fn read(path: &Path) -> Result<f64> {
        let reader = WavReader::open(path)?;
        let rate = reader.spec().sample_rate;
        if rate == 0 {
            bail!("zero sample rate");
        }
        // duration() is in frames per channel
        Ok(reader.duration() as f64 / rate as f64)
    }
}

impl DurationProbe for WavProbe {
    fn id(&self) -> &str {
        "wav"
    }

    fn duration(&self, path: &Path) -> Option<f64> {
        Self::read(path)
            .map_err(|e| debug!(path = %path.display(), error = %e, "wav probe failed"))
            .ok()
    }
}
