//! Configuration management with YAML support

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::catalog::{Quota, DEFAULT_AUDIO_EXTENSIONS};
use crate::planner::{Assignment, Layout, PlanRequest, PlaylistFormat};
use crate::segment::{Segment, SegmentSettings};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub segments: SegmentSettings,

    /// Per-song segments that win over every config file
    #[serde(default)]
    pub segment_overrides: BTreeMap<String, Segment>,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub probes: HashMap<String, ProbeConfig>,
}

/// Catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub quota: Option<Quota>,

    /// catalog.tsv used instead of scanning, relative to the subject root
    #[serde(default)]
    pub catalog_file: Option<String>,
}

/// Planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_blocks")]
    pub n_blocks: usize,

    #[serde(default)]
    pub blocks_per_session: Option<usize>,

    #[serde(default)]
    pub assignment: Assignment,

    #[serde(default)]
    pub assignment_seed: u64,

    #[serde(default)]
    pub layout: Layout,

    #[serde(default = "default_enabled")]
    pub shuffle_within_block: bool,

    #[serde(default)]
    pub playlist_format: PlaylistFormat,

    #[serde(default = "default_repeat_suffix")]
    pub repeat_suffix: String,
}

/// Individual duration probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_extensions() -> Vec<String> {
    DEFAULT_AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_blocks() -> usize {
    4
}

fn default_enabled() -> bool {
    true
}

fn default_repeat_suffix() -> String {
    "_repeat".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            quota: None,
            catalog_file: None,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            n_blocks: default_blocks(),
            blocks_per_session: None,
            assignment: Assignment::default(),
            assignment_seed: 0,
            layout: Layout::default(),
            shuffle_within_block: true,
            playlist_format: PlaylistFormat::default(),
            repeat_suffix: default_repeat_suffix(),
        }
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string())
}

impl Config {
    /// Load configuration from a YAML file
    /// An explicit path must exist. Otherwise searches in order:
    /// 1. ./stimplan.yaml (current directory)
    /// 2. <config dir>/stimplan/stimplan.yaml
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            let explicit = PathBuf::from(shellexpand::tilde(path).to_string());
            if !explicit.exists() {
                anyhow::bail!("config file not found: {}", explicit.display());
            }
            return Self::from_file(&explicit);
        }

        let mut search_paths = vec![PathBuf::from("stimplan.yaml")];
        if let Some(dir) = dirs::config_dir() {
            search_paths.push(dir.join("stimplan").join("stimplan.yaml"));
        }
        for search_path in &search_paths {
            if search_path.exists() {
                return Self::from_file(search_path);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config.expanded())
    }

    /// Expand `~` in every configured path
    fn expanded(mut self) -> Self {
        for path in [
            &mut self.segments.shared_config,
            &mut self.segments.favorite_config,
            &mut self.segments.generic_config,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand(path);
        }
        self
    }

    /// Check if a duration probe is enabled; unlisted probes are enabled
    pub fn is_probe_enabled(&self, probe_id: &str) -> bool {
        self.probes.get(probe_id).map_or(true, |p| p.enabled)
    }

    /// Planner request for `ids` of `subject`, with every configured knob
    pub fn plan_request(&self, root: &Path, subject: &str, ids: Vec<String>, session_date: NaiveDate) -> PlanRequest {
        let mut req = PlanRequest::new(root, subject, ids, session_date);
        req.layout = self.planner.layout;
        req.n_blocks = self.planner.n_blocks;
        req.blocks_per_session = self.planner.blocks_per_session;
        req.assignment = self.planner.assignment;
        req.assignment_seed = self.planner.assignment_seed;
        req.shuffle_within_block = self.planner.shuffle_within_block;
        req.playlist_format = self.planner.playlist_format;
        req.repeat_suffix = self.planner.repeat_suffix.clone();
        req.extensions = self.catalog.extensions.clone();
        req.quota = self.catalog.quota;
        req.catalog_file = self
            .catalog
            .catalog_file
            .as_deref()
            .map(|p| root.join(expand(Path::new(p))));
        req.segments = self.segments.clone();
        req.overrides = self.segment_overrides.clone();
        req
    }
}
