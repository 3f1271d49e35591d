//! Session/episode planner
//!
//! A run scans the catalog, assigns songs to blocks, then for each episode
//! resolves segments and provenance for every scheduled song. Everything is
//! computed and validated before the first block directory is written.

mod artifacts;
mod distribute;

pub use artifacts::{allocate_block_dir, has_results, write_block, PlanRow, PlaylistFormat, PLAN_COLUMNS};
pub use distribute::{distribute, Assignment, BlockLayout};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogEntry, CatalogError, Quota, DEFAULT_AUDIO_EXTENSIONS};
use crate::probe::ProbeChain;
use crate::segment::{hash_seed, Segment, SegmentError, SegmentResolver, SegmentSettings, SegmentSource};
use crate::store::{FirstSeen, Provenance, ProvenanceStore, StoreError};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid plan request: {}", .0.join("; "))]
    InvalidRequest(Vec<String>),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Fresh segment for every song
    #[default]
    New,
    /// Reuse the first-seen segment of songs played before
    Repeat,
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlanMode::New => "new",
            PlanMode::Repeat => "repeat",
        })
    }
}

/// Output tree kind: `<root>/sessions/S01/...` or `<root>/episodes/E01/...`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Sessions,
    #[default]
    Episodes,
}

impl Layout {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Layout::Sessions => "sessions",
            Layout::Episodes => "episodes",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            Layout::Sessions => "S",
            Layout::Episodes => "E",
        }
    }

    /// `count` ids starting at `first`: `E01`, `E02`, ...
    pub fn ids(&self, first: u32, count: u32) -> Vec<String> {
        (first..first + count)
            .map(|n| format!("{}{:02}", self.id_prefix(), n))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// Subject music root holding `shared/` and `favorite/`
    pub root: PathBuf,
    pub subject: String,
    pub layout: Layout,
    /// Session/episode ids to plan, in order
    pub ids: Vec<String>,
    pub session_date: NaiveDate,
    pub mode: PlanMode,
    pub n_blocks: usize,
    pub blocks_per_session: Option<usize>,
    pub assignment: Assignment,
    pub assignment_seed: u64,
    pub shuffle_within_block: bool,
    /// Read the catalog from this TSV instead of scanning the buckets
    pub catalog_file: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub quota: Option<Quota>,
    pub segments: SegmentSettings,
    pub overrides: BTreeMap<String, Segment>,
    pub playlist_format: PlaylistFormat,
    pub repeat_suffix: String,
}

impl PlanRequest {
    pub fn new(root: impl Into<PathBuf>, subject: impl Into<String>, ids: Vec<String>, session_date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            subject: subject.into(),
            layout: Layout::default(),
            ids,
            session_date,
            mode: PlanMode::default(),
            n_blocks: 4,
            blocks_per_session: None,
            assignment: Assignment::default(),
            assignment_seed: 0,
            shuffle_within_block: true,
            catalog_file: None,
            extensions: DEFAULT_AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            quota: None,
            segments: SegmentSettings::default(),
            overrides: BTreeMap::new(),
            playlist_format: PlaylistFormat::default(),
            repeat_suffix: "_repeat".to_string(),
        }
    }

    /// Every problem with the request, not just the first
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut problems = Vec::new();
        if self.subject.trim().is_empty() {
            problems.push("subject is empty".to_string());
        }
        if self.ids.is_empty() {
            problems.push("no session/episode ids".to_string());
        }
        let mut seen = HashSet::new();
        for id in &self.ids {
            if id.trim().is_empty() || id.contains(['/', '\\']) {
                problems.push(format!("invalid id '{}'", id));
            } else if !seen.insert(id) {
                problems.push(format!("duplicate id '{}'", id));
            }
        }
        if self.n_blocks == 0 {
            problems.push("number of blocks must be >= 1".to_string());
        }
        if let Some(k) = self.blocks_per_session {
            if k == 0 || k > self.n_blocks {
                problems.push(format!("blocks_per_session {} not in 1..={}", k, self.n_blocks));
            }
        }
        if self.repeat_suffix.is_empty() {
            problems.push("repeat suffix is empty".to_string());
        }
        problems.extend(self.segments.problems());
        if problems.is_empty() {
            Ok(())
        } else {
            Err(PlanError::InvalidRequest(problems))
        }
    }

    fn layout_root(&self, root: &Path) -> PathBuf {
        root.join(self.layout.dir_name())
    }
}

/// Planned rows of one block of one episode
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPlan {
    pub session_id: String,
    pub block_id: u32,
    pub rows: Vec<PlanRow>,
}

/// A block as written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBlock {
    pub session_id: String,
    pub block_id: u32,
    pub dir: PathBuf,
    /// Output went to a repeat directory because results already existed
    pub redirected: bool,
    pub rows: usize,
}

pub struct Planner {
    probes: ProbeChain,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(ProbeChain::default())
    }
}

impl Planner {
    pub fn new(probes: ProbeChain) -> Self {
        Self { probes }
    }

    /// Plan and write every block
    pub fn run(&self, req: &PlanRequest) -> Result<Vec<PlannedBlock>, PlanError> {
        let (root, plans) = self.prepare(req)?;
        let layout_root = req.layout_root(&root);

        let mut written = Vec::with_capacity(plans.len());
        for plan in plans {
            let session_dir = layout_root.join(&plan.session_id);
            let (dir, redirected) = allocate_block_dir(&session_dir, plan.block_id, &req.repeat_suffix)?;
            if redirected {
                warn!(
                    session = %plan.session_id,
                    block = plan.block_id,
                    dir = %dir.display(),
                    "block already has results, writing to repeat directory"
                );
            }
            write_block(&dir, &plan.rows, &root, req.playlist_format)?;
            info!(session = %plan.session_id, block = plan.block_id, rows = plan.rows.len(), dir = %dir.display(), "wrote block");
            written.push(PlannedBlock {
                session_id: plan.session_id,
                block_id: plan.block_id,
                dir,
                redirected,
                rows: plan.rows.len(),
            });
        }
        Ok(written)
    }

    /// Compute every block without touching the output tree
    pub fn plan(&self, req: &PlanRequest) -> Result<Vec<BlockPlan>, PlanError> {
        Ok(self.prepare(req)?.1)
    }

    fn prepare(&self, req: &PlanRequest) -> Result<(PathBuf, Vec<BlockPlan>), PlanError> {
        req.validate()?;
        let root = if req.root.exists() {
            std::fs::canonicalize(&req.root)?
        } else {
            req.root.clone()
        };

        let catalog = match &req.catalog_file {
            Some(path) => Catalog::load_tsv(&root, path)?,
            None => Catalog::scan(&root, &req.extensions)?,
        };
        let mut catalog = catalog.select(req.quota)?;
        if req.assignment == Assignment::BalancedDuration || req.segments.clamp_to_duration {
            catalog.probe_durations(&self.probes);
        }

        let resolver = SegmentResolver::load(req.segments.clone().rooted(&root), req.overrides.clone())?;
        resolver.ensure_covered(catalog.entries())?;

        let layout = distribute(catalog.entries(), req.n_blocks, req.assignment, req.assignment_seed);
        let mut store = ProvenanceStore::scan(&req.layout_root(&root), &req.ids)?;

        let mut plans = Vec::new();
        for id in &req.ids {
            plans.extend(plan_episode(req, id, &catalog, &layout, &resolver, &mut store));
        }
        Ok((root, plans))
    }
}

fn selected_blocks(req: &PlanRequest, id: &str, layout: &BlockLayout) -> Vec<u32> {
    let mut ids: Vec<u32> = layout.ids().collect();
    if let Some(k) = req.blocks_per_session {
        let mut rng = StdRng::seed_from_u64(hash_seed(&[&req.subject, id, "blocks"]));
        ids.shuffle(&mut rng);
        ids.truncate(k);
        ids.sort_unstable();
    }
    ids
}

fn plan_episode(
    req: &PlanRequest,
    id: &str,
    catalog: &Catalog,
    layout: &BlockLayout,
    resolver: &SegmentResolver,
    store: &mut ProvenanceStore,
) -> Vec<BlockPlan> {
    let date = req.session_date.format("%Y-%m-%d").to_string();
    let mut order_rng = StdRng::seed_from_u64(hash_seed(&[&req.subject, id, "order"]));

    selected_blocks(req, id, layout)
        .into_iter()
        .map(|block_id| {
            let mut songs: Vec<&CatalogEntry> = layout
                .block(block_id)
                .iter()
                .map(|&i| &catalog.entries()[i])
                .collect();
            if req.shuffle_within_block {
                songs.shuffle(&mut order_rng);
            }

            let rows = songs
                .into_iter()
                .zip(1u32..)
                .map(|(entry, block_order)| {
                    let here = FirstSeen {
                        date: date.clone(),
                        session_id: id.to_string(),
                        block_id,
                        block_order,
                    };
                    plan_row(req, entry, here, resolver, store)
                })
                .collect();
            BlockPlan {
                session_id: id.to_string(),
                block_id,
                rows,
            }
        })
        .collect()
}

fn plan_row(
    req: &PlanRequest,
    entry: &CatalogEntry,
    here: FirstSeen,
    resolver: &SegmentResolver,
    store: &mut ProvenanceStore,
) -> PlanRow {
    let reused = match req.mode {
        PlanMode::Repeat => store.get(&entry.song_id).cloned(),
        PlanMode::New => None,
    };

    let (segment, is_new, first_seen) = match reused {
        Some(previous) => {
            debug!(song = %entry.song_id, source = %SegmentSource::Provenance, "reusing first-seen segment");
            (previous.segment, false, previous.first_seen)
        }
        None => {
            let earlier = store.segments(&entry.song_id);
            let (segment, source) = resolver.resolve_fresh(entry, &here.session_id, earlier);
            let segment = segment.rounded();
            debug!(song = %entry.song_id, %source, start = segment.start, len = segment.len, "resolved segment");
            store.record(
                &entry.song_id,
                Provenance {
                    first_seen: here.clone(),
                    segment,
                },
            );
            let first_seen = store
                .get(&entry.song_id)
                .map(|p| p.first_seen.clone())
                .unwrap_or(here.clone());
            (segment, true, first_seen)
        }
    };

    PlanRow {
        subject: req.subject.clone(),
        session_id: here.session_id,
        session_date: here.date,
        mode: req.mode.to_string(),
        block_id: here.block_id,
        block_order: here.block_order,
        song_id: entry.song_id.clone(),
        bucket: entry.bucket.to_string(),
        song_dir: entry.song_dir(),
        song_file: entry.song_file(),
        song_relpath: entry.relative_path.to_string_lossy().into_owned(),
        segment_start: segment.start,
        segment_len: segment.len,
        is_new: u8::from(is_new),
        first_seen_session_id: first_seen.session_id,
        first_seen_date: first_seen.date,
        first_seen_block_id: first_seen.block_id,
        first_seen_block_order: first_seen.block_order,
        played: 0,
        rating_value: String::new(),
        confirmation: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn catalog_dir(shared: usize, favorite: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (bucket, n) in [("shared", shared), ("favorite", favorite)] {
            std::fs::create_dir_all(dir.path().join(bucket)).unwrap();
            for i in 0..n {
                std::fs::write(dir.path().join(bucket).join(format!("{}{:02}.mp3", &bucket[..1], i)), b"").unwrap();
            }
        }
        dir
    }

    fn planner() -> Planner {
        Planner::new(ProbeChain::empty())
    }

    #[test]
    fn test_layout_ids() {
        assert_eq!(Layout::Episodes.ids(1, 3), vec!["E01", "E02", "E03"]);
        assert_eq!(Layout::Sessions.ids(9, 2), vec!["S09", "S10"]);
    }

    #[test]
    fn test_validate_lists_every_problem() {
        let mut req = PlanRequest::new("/music", "", vec!["E01".into(), "E01".into()], date());
        req.n_blocks = 0;
        req.blocks_per_session = Some(2);
        match req.validate() {
            Err(PlanError::InvalidRequest(problems)) => assert_eq!(problems.len(), 4),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_unusable_segment_settings() {
        let mut req = PlanRequest::new("/music", "01", vec!["E01".into()], date());
        req.segments.min_start = f64::NAN;
        req.segments.max_start = f64::INFINITY;
        req.segments.favorite_len = -5.0;
        match req.validate() {
            Err(PlanError::InvalidRequest(problems)) => {
                assert_eq!(problems.len(), 3);
                assert!(problems.iter().any(|p| p.contains("favorite_len")));
                assert!(problems.iter().any(|p| p.contains("min_start")));
                assert!(problems.iter().any(|p| p.contains("max_start")));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_plan_is_pure_and_complete() {
        let dir = catalog_dir(8, 2);
        let req = PlanRequest::new(dir.path(), "01", Layout::Episodes.ids(1, 2), date());
        let plans = planner().plan(&req).unwrap();
        assert_eq!(plans.len(), 8);
        assert!(!dir.path().join("episodes").exists());

        let first: Vec<&PlanRow> = plans.iter().filter(|p| p.session_id == "E01").flat_map(|p| &p.rows).collect();
        assert_eq!(first.len(), 10);
        assert!(first.iter().all(|r| r.is_new == 1 && r.first_seen_session_id == "E01"));

        // second episode in new mode keeps E01 as first seen
        let second: Vec<&PlanRow> = plans.iter().filter(|p| p.session_id == "E02").flat_map(|p| &p.rows).collect();
        assert!(second.iter().all(|r| r.is_new == 1 && r.first_seen_session_id == "E01"));
    }

    #[test]
    fn test_repeat_mode_reuses_first_segment() {
        let dir = catalog_dir(4, 1);
        let mut req = PlanRequest::new(dir.path(), "01", vec!["E01".into()], date());
        req.n_blocks = 1;
        planner().run(&req).unwrap();

        let original = std::fs::read_to_string(dir.path().join("episodes/E01/B1/plan.csv")).unwrap();
        let mut repeat = req.clone();
        repeat.ids = vec!["E02".into()];
        repeat.mode = PlanMode::Repeat;
        repeat.segments.seed = 99;
        let plans = planner().plan(&repeat).unwrap();

        let rows = &plans[0].rows;
        assert!(rows.iter().all(|r| r.is_new == 0 && r.first_seen_session_id == "E01"));
        for row in rows {
            let line = original
                .lines()
                .find(|l| l.split(',').nth(6) == Some(row.song_id.as_str()))
                .unwrap();
            let start: f64 = line.split(',').nth(11).unwrap().parse().unwrap();
            assert_eq!(row.segment_start, start);
        }
    }

    #[test]
    fn test_blocks_per_session_subset() {
        let dir = catalog_dir(12, 0);
        let mut req = PlanRequest::new(dir.path(), "01", vec!["E01".into()], date());
        req.n_blocks = 6;
        req.blocks_per_session = Some(2);
        let plans = planner().plan(&req).unwrap();
        assert_eq!(plans.len(), 2);
        assert!(plans[0].block_id < plans[1].block_id);
        assert_eq!(plans, planner().plan(&req).unwrap());
    }

    #[test]
    fn test_missing_bucket_fails_before_writing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("shared")).unwrap();
        let req = PlanRequest::new(dir.path(), "01", vec!["E01".into()], date());
        assert!(matches!(
            planner().run(&req),
            Err(PlanError::Catalog(CatalogError::MissingBuckets(_)))
        ));
        assert!(!dir.path().join("episodes").exists());
    }
}
