//! Song catalog: the `shared` and `favorite` buckets under a subject root

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::probe::ProbeChain;

pub const DEFAULT_AUDIO_EXTENSIONS: [&str; 6] = ["wav", "mp3", "flac", "ogg", "m4a", "aac"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("missing catalog folders: {}", display_paths(.0))]
    MissingBuckets(Vec<PathBuf>),

    #[error("no audio found under {0}")]
    Empty(PathBuf),

    #[error("duplicate song ids within a bucket: {}", .0.join(", "))]
    DuplicateSongIds(Vec<String>),

    #[error("catalog too small: {}", .0.iter().map(Shortfall::to_string).collect::<Vec<_>>().join("; "))]
    InsufficientQuota(Vec<Shortfall>),

    #[error("malformed catalog file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("failed to walk catalog: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub bucket: Bucket,
    pub available: usize,
    pub requested: usize,
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} has {} < requested {}",
            self.bucket, self.available, self.requested
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Shared,
    Favorite,
}

impl Bucket {
    pub const ALL: [Bucket; 2] = [Bucket::Shared, Bucket::Favorite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Shared => "shared",
            Bucket::Favorite => "favorite",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Bucket::Shared),
            "favorite" | "favourite" => Ok(Bucket::Favorite),
            other => Err(format!("unknown bucket '{}'", other)),
        }
    }
}

/// Songs to take from each bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub shared: usize,
    pub favorite: usize,
}

impl Quota {
    fn for_bucket(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Shared => self.shared,
            Bucket::Favorite => self.favorite,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Unique within the catalog; the stem, suffixed with `__<bucket>` when
    /// the same stem exists in both buckets
    pub song_id: String,
    pub stem: String,
    /// Relative to the catalog root
    pub relative_path: PathBuf,
    pub bucket: Bucket,
    pub duration_sec: Option<f64>,
}

impl CatalogEntry {
    /// Keys a segment configuration may use for this song, most specific first
    pub fn config_keys(&self) -> Vec<&str> {
        let mut keys = vec![self.song_id.as_str()];
        if self.stem != self.song_id {
            keys.push(self.stem.as_str());
        }
        keys
    }

    pub fn song_dir(&self) -> String {
        self.relative_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn song_file(&self) -> String {
        self.relative_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    root: PathBuf,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_entries(root: PathBuf, entries: Vec<CatalogEntry>) -> Self {
        Self { root, entries }
    }

    /// Walk `<root>/shared` and `<root>/favorite` for audio files. Both
    /// folders must exist; every missing one is reported.
    pub fn scan(root: &Path, extensions: &[String]) -> Result<Self, CatalogError> {
        let missing: Vec<PathBuf> = Bucket::ALL
            .iter()
            .map(|b| root.join(b.as_str()))
            .filter(|p| !p.is_dir())
            .collect();
        if !missing.is_empty() {
            return Err(CatalogError::MissingBuckets(missing));
        }

        let accepted = |path: &Path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
                .unwrap_or(false)
        };

        let mut found: Vec<(Bucket, String, PathBuf)> = Vec::new();
        for bucket in Bucket::ALL {
            for entry in WalkDir::new(root.join(bucket.as_str())).sort_by_file_name() {
                let entry = entry?;
                let path = entry.path();
                if !entry.file_type().is_file() || !accepted(path) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
                found.push((bucket, stem.to_string(), relative));
            }
        }
        if found.is_empty() {
            return Err(CatalogError::Empty(root.to_path_buf()));
        }

        let catalog = Self {
            root: root.to_path_buf(),
            entries: assign_ids(found)?,
        };
        info!(
            root = %root.display(),
            shared = catalog.bucket(Bucket::Shared).count(),
            favorite = catalog.bucket(Bucket::Favorite).count(),
            "scanned catalog"
        );
        Ok(catalog)
    }

    /// Load a `catalog.tsv` with columns `song_id, path, duration_sec` and an
    /// optional `bucket` (defaults to shared). Paths are relative to `root`.
    pub fn load_tsv(root: &Path, path: &Path) -> Result<Self, CatalogError> {
        #[derive(Deserialize)]
        struct Row {
            song_id: String,
            path: PathBuf,
            duration_sec: Option<f64>,
            bucket: Option<String>,
        }

        let malformed = |reason: String| CatalogError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
        let mut entries = Vec::new();
        let mut seen = HashMap::new();
        for (line, row) in reader.deserialize::<Row>().enumerate() {
            let row = row.map_err(|e| malformed(e.to_string()))?;
            let bucket = match row.bucket.as_deref() {
                Some(b) if !b.trim().is_empty() => b.parse().map_err(|e: String| malformed(e))?,
                _ => Bucket::Shared,
            };
            if seen.insert(row.song_id.clone(), line).is_some() {
                return Err(CatalogError::DuplicateSongIds(vec![row.song_id]));
            }
            let stem = row
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&row.song_id)
                .to_string();
            entries.push(CatalogEntry {
                song_id: row.song_id,
                stem,
                relative_path: row.path,
                bucket,
                duration_sec: row.duration_sec,
            });
        }
        if entries.is_empty() {
            return Err(CatalogError::Empty(path.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    /// Keep the first `quota` songs of each bucket (catalog order). Every
    /// bucket that falls short is reported.
    pub fn select(self, quota: Option<Quota>) -> Result<Self, CatalogError> {
        let Some(quota) = quota else {
            return Ok(self);
        };

        let shortfalls: Vec<Shortfall> = Bucket::ALL
            .iter()
            .filter_map(|&bucket| {
                let available = self.bucket(bucket).count();
                let requested = quota.for_bucket(bucket);
                (available < requested).then_some(Shortfall {
                    bucket,
                    available,
                    requested,
                })
            })
            .collect();
        if !shortfalls.is_empty() {
            return Err(CatalogError::InsufficientQuota(shortfalls));
        }

        let mut taken: HashMap<Bucket, usize> = HashMap::new();
        let entries = self
            .entries
            .into_iter()
            .filter(|e| {
                let n = taken.entry(e.bucket).or_insert(0);
                *n += 1;
                *n <= quota.for_bucket(e.bucket)
            })
            .collect();
        Ok(Self {
            root: self.root,
            entries,
        })
    }

    /// Fill in missing durations from the probe chain
    pub fn probe_durations(&mut self, probes: &ProbeChain) {
        for entry in self.entries.iter_mut().filter(|e| e.duration_sec.is_none()) {
            entry.duration_sec = probes.duration(&self.root.join(&entry.relative_path));
            if entry.duration_sec.is_none() {
                debug!(song = %entry.song_id, "no duration available");
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bucket(&self, bucket: Bucket) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(move |e| e.bucket == bucket)
    }

    pub fn absolute_path(&self, entry: &CatalogEntry) -> PathBuf {
        self.root.join(&entry.relative_path)
    }
}

/// Entries sorted by (bucket, stem); stems present in both buckets get a
/// bucket suffix, duplicates inside one bucket are an error.
fn assign_ids(mut found: Vec<(Bucket, String, PathBuf)>) -> Result<Vec<CatalogEntry>, CatalogError> {
    found.sort_by(|a, b| (a.0, &a.1, &a.2).cmp(&(b.0, &b.1, &b.2)));

    let mut buckets_per_stem: BTreeMap<&str, Vec<Bucket>> = BTreeMap::new();
    for (bucket, stem, _) in &found {
        buckets_per_stem.entry(stem.as_str()).or_default().push(*bucket);
    }

    let duplicates: Vec<String> = buckets_per_stem
        .iter()
        .filter(|(_, buckets)| buckets.windows(2).any(|w| w[0] == w[1]))
        .map(|(stem, _)| stem.to_string())
        .collect();
    if !duplicates.is_empty() {
        return Err(CatalogError::DuplicateSongIds(duplicates));
    }

    let shared_stems: Vec<String> = buckets_per_stem
        .iter()
        .filter(|(_, buckets)| buckets.len() > 1)
        .map(|(stem, _)| stem.to_string())
        .collect();

    Ok(found
        .into_iter()
        .map(|(bucket, stem, relative_path)| {
            let song_id = if shared_stems.contains(&stem) {
                format!("{}__{}", stem, bucket)
            } else {
                stem.clone()
            };
            CatalogEntry {
                song_id,
                stem,
                relative_path,
                bucket,
                duration_sec: None,
            }
        })
        .collect())
}
