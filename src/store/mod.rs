//! First-seen provenance, rebuilt from earlier plan and result files
//!
//! There is no database: the block directories written by earlier runs are
//! the record. A store is built once per planning run and then only grows.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::segment::Segment;

pub const PLAN_FILE: &str = "plan.csv";
pub const RESULTS_PATTERN: &str = "results*.csv";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to walk artifacts: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Is `name` a runner results file?
pub fn is_results_file(name: &str) -> bool {
    glob::Pattern::new(RESULTS_PATTERN)
        .map(|p| p.matches(name))
        .unwrap_or(false)
}

/// `B3`, `B3_repeat`, `B3_repeat2` -> 3
pub fn block_id_from_dir(name: &str) -> Option<u32> {
    let digits: String = name
        .strip_prefix('B')?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirstSeen {
    pub date: String,
    pub session_id: String,
    pub block_id: u32,
    pub block_order: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub first_seen: FirstSeen,
    pub segment: Segment,
}

/// Loose view of a plan/results row; runners may add or drop columns
#[derive(Debug, Deserialize)]
struct ArtifactRow {
    song_id: Option<String>,
    session_id: Option<String>,
    session_date: Option<String>,
    block_id: Option<String>,
    block_order: Option<String>,
    segment_start: Option<f64>,
    segment_len: Option<f64>,
    first_seen_session_id: Option<String>,
    first_seen_date: Option<String>,
    first_seen_block_id: Option<String>,
    first_seen_block_order: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Integers may have been written as floats (`3.0`)
fn parse_index(value: Option<&str>) -> Option<u32> {
    let value = value?.trim();
    value.parse::<u32>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0)
            .map(|f| f as u32)
    })
}

struct DirContext<'a> {
    session_id: &'a str,
    block_id: Option<u32>,
}

impl ArtifactRow {
    fn into_provenance(self, ctx: &DirContext) -> Option<(String, Provenance)> {
        let song_id = non_empty(self.song_id)?;
        let segment = Segment::new(self.segment_start?, self.segment_len?);

        let session_id = non_empty(self.session_id).unwrap_or_else(|| ctx.session_id.to_string());
        let block_id = parse_index(self.block_id.as_deref()).or(ctx.block_id).unwrap_or(0);
        let block_order = parse_index(self.block_order.as_deref()).unwrap_or(0);
        let date = non_empty(self.session_date).unwrap_or_default();

        let first_seen = FirstSeen {
            date: non_empty(self.first_seen_date).unwrap_or(date),
            session_id: non_empty(self.first_seen_session_id).unwrap_or(session_id),
            block_id: parse_index(self.first_seen_block_id.as_deref()).unwrap_or(block_id),
            block_order: parse_index(self.first_seen_block_order.as_deref()).unwrap_or(block_order),
        };
        Some((song_id, Provenance { first_seen, segment }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvenanceStore {
    entries: BTreeMap<String, Provenance>,
    /// Every segment played or planned per song, earliest first
    history: BTreeMap<String, Vec<Segment>>,
}

impl ProvenanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `<layout_root>/<id>/<block>/` for `results*.csv` and `plan.csv`.
    /// Plans of the ids in `replanned` are skipped: this run replaces them.
    /// Records are ordered by (date, id, block, order) and the first one per
    /// song wins.
    pub fn scan(layout_root: &Path, replanned: &[String]) -> Result<Self, StoreError> {
        let mut store = Self::new();
        if !layout_root.is_dir() {
            debug!(root = %layout_root.display(), "no earlier artifacts");
            return Ok(store);
        }

        let mut candidates: Vec<(String, Provenance)> = Vec::new();
        let mut files = 0usize;
        for entry in WalkDir::new(layout_root)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy();
            let is_plan = name == PLAN_FILE;
            if !entry.file_type().is_file() || !(is_plan || is_results_file(&name)) {
                continue;
            }

            let path = entry.path();
            let block_dir = path.parent().and_then(|p| p.file_name()).map(|n| n.to_string_lossy());
            let session_dir = path
                .parent()
                .and_then(|p| p.parent())
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy());
            let (Some(block_dir), Some(session_dir)) = (block_dir, session_dir) else {
                continue;
            };
            if is_plan && replanned.iter().any(|id| *id == session_dir) {
                continue;
            }

            let ctx = DirContext {
                session_id: &session_dir,
                block_id: block_id_from_dir(&block_dir),
            };
            let mut reader = csv::Reader::from_path(path)?;
            for (line, row) in reader.deserialize::<ArtifactRow>().enumerate() {
                match row {
                    Ok(row) => candidates.extend(row.into_provenance(&ctx)),
                    Err(e) => warn!(path = %path.display(), line = line + 2, error = %e, "skipping unreadable row"),
                }
            }
            files += 1;
        }

        candidates.sort_by(|a, b| a.1.first_seen.cmp(&b.1.first_seen));
        for (song_id, provenance) in candidates {
            store.push_history(&song_id, provenance.segment);
            store.entries.entry(song_id).or_insert(provenance);
        }
        info!(root = %layout_root.display(), files, songs = store.len(), "scanned earlier artifacts");
        Ok(store)
    }

    pub fn get(&self, song_id: &str) -> Option<&Provenance> {
        self.entries.get(song_id)
    }

    pub fn contains(&self, song_id: &str) -> bool {
        self.entries.contains_key(song_id)
    }

    /// Earlier segments of `song_id`, empty for a song never seen
    pub fn segments(&self, song_id: &str) -> &[Segment] {
        self.history.get(song_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add `provenance.segment` to the song's history and keep `provenance`
    /// as first seen unless the song already has one. Returns whether it
    /// became the first-seen record.
    pub fn record(&mut self, song_id: &str, provenance: Provenance) -> bool {
        self.push_history(song_id, provenance.segment);
        if self.entries.contains_key(song_id) {
            return false;
        }
        self.entries.insert(song_id.to_string(), provenance);
        true
    }

    fn push_history(&mut self, song_id: &str, segment: Segment) {
        let segments = self.history.entry(song_id.to_string()).or_default();
        if !segments.contains(&segment) {
            segments.push(segment);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "session_id,session_date,block_id,block_order,song_id,segment_start,segment_len,first_seen_session_id,first_seen_date,first_seen_block_id,first_seen_block_order";

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("{}\n{}", HEADER, body)).unwrap();
    }

    fn seen(date: &str, id: &str, block: u32, order: u32) -> FirstSeen {
        FirstSeen {
            date: date.to_string(),
            session_id: id.to_string(),
            block_id: block,
            block_order: order,
        }
    }

    #[test]
    fn test_helpers() {
        assert!(is_results_file("results.csv"));
        assert!(is_results_file("results_20240101_120000.csv"));
        assert!(!is_results_file("plan.csv"));
        assert_eq!(block_id_from_dir("B12"), Some(12));
        assert_eq!(block_id_from_dir("B3_repeat2"), Some(3));
        assert_eq!(block_id_from_dir("notes"), None);
        assert_eq!(parse_index(Some("4.0")), Some(4));
        assert_eq!(parse_index(Some("x")), None);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProvenanceStore::scan(&dir.path().join("episodes"), &[]).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_earliest_record_wins() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "E02/B1/results_20240108_100000.csv",
            "E02,2024-01-08,1,1,a,40,30,,,,\n",
        );
        write(
            dir.path(),
            "E01/B2/plan.csv",
            "E01,2024-01-01,2,3,a,12.5,30,,,,\nE01,2024-01-01,2,4,b,20,30,,,,\n",
        );
        let store = ProvenanceStore::scan(dir.path(), &[]).unwrap();
        assert_eq!(store.len(), 2);
        let a = store.get("a").unwrap();
        assert_eq!(a.first_seen, seen("2024-01-01", "E01", 2, 3));
        assert_eq!(a.segment, Segment::new(12.5, 30.0));
        assert_eq!(store.segments("a"), &[Segment::new(12.5, 30.0), Segment::new(40.0, 30.0)]);
    }

    #[test]
    fn test_first_seen_columns_take_precedence() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "E05/B1_repeat/results.csv",
            "E05,2024-02-01,1,2,a,15,30,E01,2024-01-01,3,7\n",
        );
        let store = ProvenanceStore::scan(dir.path(), &[]).unwrap();
        assert_eq!(store.get("a").unwrap().first_seen, seen("2024-01-01", "E01", 3, 7));
    }

    #[test]
    fn test_replanned_plans_are_ignored_but_results_are_not() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "E01/B1/plan.csv", "E01,2024-01-01,1,1,a,10,30,,,,\n");
        write(dir.path(), "E01/B2/results.csv", "E01,2024-01-01,2,1,b,10,30,,,,\n");
        let store = ProvenanceStore::scan(dir.path(), &["E01".to_string()]).unwrap();
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
    }

    #[test]
    fn test_sparse_rows_fall_back_to_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("S03/B4/results.csv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "song_id,segment_start,segment_len,played\nz,11,30,1\nq,,30,1\n").unwrap();
        let store = ProvenanceStore::scan(dir.path(), &[]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("z").unwrap().first_seen, seen("", "S03", 4, 0));
    }

    #[test]
    fn test_record_never_overwrites() {
        let mut store = ProvenanceStore::new();
        let first = Provenance {
            first_seen: seen("2024-01-01", "E01", 1, 1),
            segment: Segment::new(10.0, 30.0),
        };
        let second = Provenance {
            first_seen: seen("2024-01-02", "E02", 1, 1),
            segment: Segment::new(20.0, 30.0),
        };
        assert!(store.record("a", first.clone()));
        assert!(!store.record("a", second.clone()));
        assert_eq!(store.get("a"), Some(&first));
        assert_eq!(store.segments("a"), &[first.segment, second.segment]);
        assert!(store.segments("b").is_empty());
    }
}
