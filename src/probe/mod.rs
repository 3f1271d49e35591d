//! Duration probes and the chain that tries them in order
//!
//! Probe Status:
//! - lofty: tag/container header, fast
//! - symphonia: container probe for files lofty rejects
//! - wav: hound reader, last resort for plain PCM

mod lofty;
mod symphonia;
mod wav;

pub use self::lofty::LoftyProbe;
pub use self::symphonia::SymphoniaProbe;
pub use self::wav::WavProbe;

use std::path::Path;

use tracing::debug;

use crate::Config;

/// Duration probe trait
pub trait DurationProbe: Send + Sync {
    /// Unique identifier
    fn id(&self) -> &str;

    /// Duration in seconds, `None` when this probe cannot read the file
    fn duration(&self, path: &Path) -> Option<f64>;
}

/// Ordered set of probes; the first usable answer wins
pub struct ProbeChain {
    probes: Vec<Box<dyn DurationProbe>>,
}

impl Default for ProbeChain {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl ProbeChain {
    /// Probes enabled in `config`, in the default order
    pub fn new(config: &Config) -> Self {
        let mut chain = Self::empty();
        if config.is_probe_enabled("lofty") {
            chain.register(Box::new(LoftyProbe));
        }
        if config.is_probe_enabled("symphonia") {
            chain.register(Box::new(SymphoniaProbe));
        }
        if config.is_probe_enabled("wav") {
            chain.register(Box::new(WavProbe));
        }
        chain
    }

    pub fn empty() -> Self {
        Self { probes: vec![] }
    }

    pub fn register(&mut self, probe: Box<dyn DurationProbe>) {
        self.probes.push(probe);
    }

    pub fn ids(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.id()).collect()
    }

    /// Durations that are not finite and positive count as unknown
    pub fn duration(&self, path: &Path) -> Option<f64> {
        self.probes.iter().find_map(|probe| {
            let seconds = probe.duration(path).filter(|d| d.is_finite() && *d > 0.0)?;
            debug!(probe = probe.id(), path = %path.display(), seconds, "probed duration");
            Some(seconds)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixed(&'static str, Option<f64>);

    impl DurationProbe for Fixed {
        fn id(&self) -> &str {
            self.0
        }

        fn duration(&self, _path: &Path) -> Option<f64> {
            self.1
        }
    }

    #[test]
    fn test_first_usable_answer_wins() {
        let mut chain = ProbeChain::empty();
        chain.register(Box::new(Fixed("none", None)));
        chain.register(Box::new(Fixed("zero", Some(0.0))));
        chain.register(Box::new(Fixed("good", Some(12.5))));
        chain.register(Box::new(Fixed("late", Some(99.0))));
        assert_eq!(chain.duration(Path::new("x.mp3")), Some(12.5));
    }

    #[test]
    fn test_default_order() {
        assert_eq!(ProbeChain::default().ids(), vec!["lofty", "symphonia", "wav"]);
    }

    #[test]
    fn test_disabled_probe_is_skipped() {
        let config: Config = serde_yaml::from_str("probes:\n  lofty:\n    enabled: false\n").unwrap();
        assert_eq!(ProbeChain::new(&config).ids(), vec!["symphonia", "wav"]);
    }

    #[test]
    fn test_unreadable_file_has_no_duration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(ProbeChain::default().duration(&path), None);
        assert_eq!(ProbeChain::default().duration(&dir.path().join("missing.wav")), None);
    }

    #[test]
    fn test_wav_fixture() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..(8000 * 3) {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let seconds = ProbeChain::default().duration(&path).unwrap();
        assert!((seconds - 3.0).abs() < 0.01, "got {}", seconds);
        assert!((WavProbe.duration(&path).unwrap() - 3.0).abs() < 1e-9);
    }
}
