//! symphonia probe: frame count of the first audio track

use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Result};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::DurationProbe;

pub struct SymphoniaProbe;

impl SymphoniaProbe {
    fn read(path: &Path) -> Result<f64> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow!("no audio track"))?;
        let params = &track.codec_params;
        let frames = params.n_frames.ok_or_else(|| anyhow!("frame count unknown"))?;

        if let Some(time_base) = params.time_base {
            let time = time_base.calc_time(frames);
            return Ok(time.seconds as f64 + time.frac);
        }
        let rate = params.sample_rate.ok_or_else(|| anyhow!("sample rate unknown"))?;
        Ok(frames as f64 / rate as f64)
    }
}

impl DurationProbe for SymphoniaProbe {
    fn id(&self) -> &str {
        "symphonia"
    }

    fn duration(&self, path: &Path) -> Option<f64> {
        Self::read(path)
            .map_err(|e| debug!(path = %path.display(), error = %e, "symphonia probe failed"))
            .ok()
    }
}
