//! Segment resolution: which part of each song gets played
//!
//! Precedence for a song: in-memory override > bucket config file > generic
//! config file > bucket default. Favorites default to the first
//! `favorite_len` seconds; shared songs get a seeded start.

mod generate;

pub use generate::{generate_tables, BucketRule, GenerateOptions, GeneratedSegments};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{Bucket, CatalogEntry};

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("unsupported segment config {0}: expected .json or .csv")]
    UnsupportedFormat(PathBuf),

    #[error("segment config not found: {0}")]
    NotFound(PathBuf),

    #[error("malformed segment config {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("no segment configured for {} song(s): {}", .0.len(), .0.join(", "))]
    Uncovered(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seed derived from semantic keys: first 32 bits of
/// `sha256(parts.join("||"))`
pub fn hash_seed(parts: &[&str]) -> u64 {
    let digest = Sha256::digest(parts.join("||").as_bytes());
    let hex = hex::encode(&digest[..4]);
    u64::from_str_radix(&hex, 16).unwrap_or_default()
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    #[serde(alias = "dur")]
    pub len: f64,
}

impl Segment {
    pub fn new(start: f64, len: f64) -> Self {
        Self { start, len }
    }

    /// Start rounded to milliseconds
    pub fn rounded(self) -> Self {
        Self {
            start: round3(self.start),
            len: self.len,
        }
    }

    fn is_valid(&self) -> bool {
        self.start.is_finite() && self.len.is_finite() && self.start >= 0.0 && self.len > 0.0
    }

    /// Do the two segments share any playback time?
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.start < other.start + other.len && other.start < self.start + self.len
    }
}

/// Record a problem unless `value` is finite and `>= 0` (`> 0` when
/// `positive`)
pub(crate) fn check_seconds(problems: &mut Vec<String>, name: &str, value: f64, positive: bool) {
    let ok = value.is_finite() && if positive { value > 0.0 } else { value >= 0.0 };
    if !ok {
        let bound = if positive { "> 0" } else { ">= 0" };
        problems.push(format!("{} must be a finite number {} (got {})", name, bound, value));
    }
}

/// Where a resolved segment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSource {
    Override,
    BucketConfig,
    GenericConfig,
    FavoriteDefault,
    Seeded,
    /// Reused from an earlier session
    Provenance,
}

impl fmt::Display for SegmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentSource::Override => "override",
            SegmentSource::BucketConfig => "bucket-config",
            SegmentSource::GenericConfig => "generic-config",
            SegmentSource::FavoriteDefault => "favorite-default",
            SegmentSource::Seeded => "seeded",
            SegmentSource::Provenance => "provenance",
        })
    }
}

/// Song key -> segment, loaded from JSON (`{key: {start, len}}`) or CSV
/// (`song_id,start,len`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentTable {
    entries: BTreeMap<String, Segment>,
}

impl SegmentTable {
    pub fn from_map(entries: BTreeMap<String, Segment>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, SegmentError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if !matches!(ext.as_deref(), Some("json") | Some("csv")) {
            return Err(SegmentError::UnsupportedFormat(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(SegmentError::NotFound(path.to_path_buf()));
        }

        let malformed = |reason: String| SegmentError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        let entries: BTreeMap<String, Segment> = if ext.as_deref() == Some("json") {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))?
        } else {
            #[derive(Deserialize)]
            struct Row {
                song_id: String,
                start: f64,
                #[serde(alias = "dur")]
                len: f64,
            }
            let mut reader = csv::Reader::from_path(path).map_err(|e| malformed(e.to_string()))?;
            let mut entries = BTreeMap::new();
            for row in reader.deserialize::<Row>() {
                let row = row.map_err(|e| malformed(e.to_string()))?;
                entries.insert(row.song_id, Segment::new(row.start, row.len));
            }
            entries
        };

        let invalid: Vec<&str> = entries
            .iter()
            .filter(|(_, s)| !s.is_valid())
            .map(|(k, _)| k.as_str())
            .collect();
        if !invalid.is_empty() {
            return Err(malformed(format!(
                "start must be >= 0 and len > 0 for: {}",
                invalid.join(", ")
            )));
        }

        debug!(path = %path.display(), entries = entries.len(), "loaded segment config");
        Ok(Self { entries })
    }

    pub fn write_json(&self, path: &Path) -> Result<(), SegmentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(|e| SegmentError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// First hit among `keys`
    pub fn lookup(&self, keys: &[&str]) -> Option<Segment> {
        keys.iter().find_map(|k| self.entries.get(*k).copied())
    }

    pub fn insert(&mut self, key: impl Into<String>, segment: Segment) {
        self.entries.insert(key.into(), segment);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Segment)> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPolicy {
    /// Unconfigured songs use the bucket default
    #[default]
    RandomFallback,
    /// Every song needs a configured segment; checked before planning
    ConfigOnly,
}

/// Seeded start placement for one bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub len: f64,
    pub min_start: f64,
    pub max_start: f64,
    pub randomize: bool,
    pub clamp_to_duration: bool,
}

/// Redraws tried before a fresh placement gives up avoiding earlier plays
const FRESH_DRAWS: usize = 200;

impl Placement {
    /// Start drawn uniformly from `[min_start, max(min_start, max_start)]`
    /// with a generator seeded by `(seed, key)`. When a duration is known
    /// and clamping is on, a segment longer than the track shrinks to
    /// `max(min_start, duration)` and restarts at `min_start`; otherwise the
    /// start is pulled back so the segment ends inside the track.
    pub fn place(&self, seed: u64, key: &str, duration: Option<f64>) -> Segment {
        let mut rng = StdRng::seed_from_u64(hash_seed(&[&seed.to_string(), key]));
        self.fit(self.draw(&mut rng), duration)
    }

    /// `place`, unless that overlaps one of `earlier`: then redraw with a
    /// generator seeded by `(seed, key, salt)` until a segment overlaps none
    /// of them. Keeps the plain placement when no redraw fits.
    pub fn place_fresh(&self, seed: u64, key: &str, salt: &str, duration: Option<f64>, earlier: &[Segment]) -> Segment {
        let first = self.place(seed, key, duration);
        if !self.randomize || !earlier.iter().any(|e| first.overlaps(e)) {
            return first;
        }

        let mut rng = StdRng::seed_from_u64(hash_seed(&[&seed.to_string(), key, salt]));
        for _ in 0..FRESH_DRAWS {
            let candidate = self.fit(self.draw(&mut rng), duration);
            if !earlier.iter().any(|e| candidate.overlaps(e)) {
                return candidate;
            }
        }
        debug!(key, earlier = earlier.len(), "no non-overlapping segment left");
        first
    }

    fn draw(&self, rng: &mut StdRng) -> f64 {
        let upper = self.max_start.max(self.min_start);
        if self.randomize && upper.is_finite() && upper > self.min_start {
            rng.gen_range(self.min_start..=upper)
        } else {
            self.min_start
        }
    }

    fn fit(&self, mut start: f64, duration: Option<f64>) -> Segment {
        let mut len = self.len;
        if let (true, Some(duration)) = (self.clamp_to_duration, duration) {
            if len > duration {
                len = self.min_start.max(duration);
                start = self.min_start;
            } else {
                start = start.min(self.min_start.max(duration - len));
            }
        }
        Segment::new(start, len).rounded()
    }
}

fn default_len() -> f64 {
    30.0
}

fn default_min_start() -> f64 {
    10.0
}

fn default_max_start() -> f64 {
    60.0
}

fn default_enabled() -> bool {
    true
}

fn default_seed() -> u64 {
    1234
}

/// Segment resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSettings {
    #[serde(default = "default_len")]
    pub shared_len: f64,

    #[serde(default = "default_len")]
    pub favorite_len: f64,

    #[serde(default = "default_min_start")]
    pub min_start: f64,

    #[serde(default = "default_max_start")]
    pub max_start: f64,

    #[serde(default = "default_enabled")]
    pub clamp_to_duration: bool,

    #[serde(default)]
    pub policy: SegmentPolicy,

    /// Whether favorites consult the in-memory override map
    #[serde(default = "default_enabled")]
    pub favorite_overrides: bool,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub shared_config: Option<PathBuf>,

    #[serde(default)]
    pub favorite_config: Option<PathBuf>,

    #[serde(default)]
    pub generic_config: Option<PathBuf>,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            shared_len: default_len(),
            favorite_len: default_len(),
            min_start: default_min_start(),
            max_start: default_max_start(),
            clamp_to_duration: true,
            policy: SegmentPolicy::default(),
            favorite_overrides: true,
            seed: default_seed(),
            shared_config: None,
            favorite_config: None,
            generic_config: None,
        }
    }
}

impl SegmentSettings {
    /// Relative config paths are taken relative to `root`
    pub fn rooted(mut self, root: &Path) -> Self {
        for path in [
            &mut self.shared_config,
            &mut self.favorite_config,
            &mut self.generic_config,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        self
    }

    /// Every length or start that is not a usable number of seconds
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        check_seconds(&mut problems, "segments.shared_len", self.shared_len, true);
        check_seconds(&mut problems, "segments.favorite_len", self.favorite_len, true);
        check_seconds(&mut problems, "segments.min_start", self.min_start, false);
        check_seconds(&mut problems, "segments.max_start", self.max_start, false);
        problems
    }

    fn shared_placement(&self) -> Placement {
        Placement {
            len: self.shared_len,
            min_start: self.min_start,
            max_start: self.max_start,
            randomize: true,
            clamp_to_duration: self.clamp_to_duration,
        }
    }
}

pub struct SegmentResolver {
    settings: SegmentSettings,
    overrides: BTreeMap<String, Segment>,
    shared: SegmentTable,
    favorite: SegmentTable,
    generic: SegmentTable,
}

impl SegmentResolver {
    /// Resolver without config files
    pub fn new(settings: SegmentSettings, overrides: BTreeMap<String, Segment>) -> Self {
        Self {
            settings,
            overrides,
            shared: SegmentTable::default(),
            favorite: SegmentTable::default(),
            generic: SegmentTable::default(),
        }
    }

    /// Read every config file named in `settings`; any unreadable or
    /// malformed file fails the whole load
    pub fn load(settings: SegmentSettings, overrides: BTreeMap<String, Segment>) -> Result<Self, SegmentError> {
        let read = |path: &Option<PathBuf>| match path {
            Some(p) => SegmentTable::load(p),
            None => Ok(SegmentTable::default()),
        };
        let shared = read(&settings.shared_config)?;
        let favorite = read(&settings.favorite_config)?;
        let generic = read(&settings.generic_config)?;
        info!(
            overrides = overrides.len(),
            shared = shared.len(),
            favorite = favorite.len(),
            generic = generic.len(),
            "segment rules loaded"
        );
        Ok(Self {
            settings,
            overrides,
            shared,
            favorite,
            generic,
        })
    }

    pub fn with_table(mut self, bucket: Option<Bucket>, table: SegmentTable) -> Self {
        match bucket {
            Some(Bucket::Shared) => self.shared = table,
            Some(Bucket::Favorite) => self.favorite = table,
            None => self.generic = table,
        }
        self
    }

    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }

    /// Configured rule for `entry`, if any
    pub fn configured(&self, entry: &CatalogEntry) -> Option<(Segment, SegmentSource)> {
        let keys = entry.config_keys();
        let use_overrides = entry.bucket == Bucket::Shared || self.settings.favorite_overrides;
        if use_overrides {
            if let Some(s) = keys.iter().find_map(|k| self.overrides.get(*k)) {
                return Some((*s, SegmentSource::Override));
            }
        }
        let bucket_table = match entry.bucket {
            Bucket::Shared => &self.shared,
            Bucket::Favorite => &self.favorite,
        };
        bucket_table
            .lookup(&keys)
            .map(|s| (s, SegmentSource::BucketConfig))
            .or_else(|| self.generic.lookup(&keys).map(|s| (s, SegmentSource::GenericConfig)))
    }

    /// Song ids without a configured rule, in catalog order
    pub fn uncovered<'a>(&self, entries: impl IntoIterator<Item = &'a CatalogEntry>) -> Vec<String> {
        entries
            .into_iter()
            .filter(|e| self.configured(e).is_none())
            .map(|e| e.song_id.clone())
            .collect()
    }

    /// Under `config_only`, fail listing every uncovered song
    pub fn ensure_covered<'a>(&self, entries: impl IntoIterator<Item = &'a CatalogEntry>) -> Result<(), SegmentError> {
        if self.settings.policy != SegmentPolicy::ConfigOnly {
            return Ok(());
        }
        let missing = self.uncovered(entries);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SegmentError::Uncovered(missing))
        }
    }

    pub fn resolve(&self, entry: &CatalogEntry) -> (Segment, SegmentSource) {
        if let Some(found) = self.configured(entry) {
            return found;
        }
        match entry.bucket {
            Bucket::Favorite => (
                Segment::new(0.0, self.settings.favorite_len),
                SegmentSource::FavoriteDefault,
            ),
            Bucket::Shared => (
                self.settings
                    .shared_placement()
                    .place(self.settings.seed, &entry.song_id, entry.duration_sec),
                SegmentSource::Seeded,
            ),
        }
    }

    /// `resolve`, except that a seeded shared segment avoids the song's
    /// `earlier` segments, redrawing with `salt` (the session id). Configured
    /// and favorite default segments are fixed and returned as they are.
    pub fn resolve_fresh(&self, entry: &CatalogEntry, salt: &str, earlier: &[Segment]) -> (Segment, SegmentSource) {
        match self.resolve(entry) {
            (_, SegmentSource::Seeded) if !earlier.is_empty() => {
                let segment = self.settings.shared_placement().place_fresh(
                    self.settings.seed,
                    &entry.song_id,
                    salt,
                    entry.duration_sec,
                    earlier,
                );
                (segment, SegmentSource::Seeded)
            }
            resolved => resolved,
        }
    }
}
