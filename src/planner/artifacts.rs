//! Block directories: `plan.csv`, the playlist, and repeat-directory
//! allocation next to blocks that already hold results

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PlanError;
use crate::store::{is_results_file, PLAN_FILE};

pub const PLAN_COLUMNS: [&str; 21] = [
    "subject",
    "session_id",
    "session_date",
    "mode",
    "block_id",
    "block_order",
    "song_id",
    "bucket",
    "song_dir",
    "song_file",
    "song_relpath",
    "segment_start",
    "segment_len",
    "is_new",
    "first_seen_session_id",
    "first_seen_date",
    "first_seen_block_id",
    "first_seen_block_order",
    "played",
    "rating_value",
    "confirmation",
];

/// One scheduled play; field order matches `PLAN_COLUMNS`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRow {
    pub subject: String,
    pub session_id: String,
    pub session_date: String,
    pub mode: String,
    pub block_id: u32,
    pub block_order: u32,
    pub song_id: String,
    pub bucket: String,
    pub song_dir: String,
    pub song_file: String,
    pub song_relpath: String,
    pub segment_start: f64,
    pub segment_len: f64,
    pub is_new: u8,
    pub first_seen_session_id: String,
    pub first_seen_date: String,
    pub first_seen_block_id: u32,
    pub first_seen_block_order: u32,
    /// Filled in by the runner
    pub played: u8,
    pub rating_value: String,
    pub confirmation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct PlaylistRow {
    path: String,
    start: f64,
    dur: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistFormat {
    #[default]
    Tsv,
    Csv,
}

impl PlaylistFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            PlaylistFormat::Tsv => "playlist.tsv",
            PlaylistFormat::Csv => "playlist.csv",
        }
    }

    fn delimiter(&self) -> u8 {
        match self {
            PlaylistFormat::Tsv => b'\t',
            PlaylistFormat::Csv => b',',
        }
    }
}

/// Does `dir` hold any `results*.csv`?
pub fn has_results(dir: &Path) -> io::Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && is_results_file(&entry.file_name().to_string_lossy()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// First of `B<k>`, `B<k><suffix>`, `B<k><suffix>2`, ... without results.
/// Returns the directory and whether it differs from `B<k>`.
pub fn allocate_block_dir(session_dir: &Path, block_id: u32, suffix: &str) -> io::Result<(PathBuf, bool)> {
    let base = format!("B{}", block_id);
    let primary = session_dir.join(&base);
    if !has_results(&primary)? {
        return Ok((primary, false));
    }

    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 {
            format!("{}{}", base, suffix)
        } else {
            format!("{}{}{}", base, suffix, attempt)
        };
        let candidate = session_dir.join(name);
        if !has_results(&candidate)? {
            return Ok((candidate, true));
        }
        attempt += 1;
    }
}

/// Write `plan.csv` and the playlist into `dir`. Playlist paths are
/// `root` joined with each song's relative path.
pub fn write_block(dir: &Path, rows: &[PlanRow], root: &Path, format: PlaylistFormat) -> Result<(), PlanError> {
    std::fs::create_dir_all(dir)?;

    let mut plan = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(dir.join(PLAN_FILE))?;
    plan.write_record(PLAN_COLUMNS)?;
    for row in rows {
        plan.serialize(row)?;
    }
    plan.flush()?;

    let mut playlist = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(format.delimiter())
        .from_path(dir.join(format.file_name()))?;
    playlist.write_record(["path", "start", "dur"])?;
    for row in rows {
        playlist.serialize(PlaylistRow {
            path: root.join(&row.song_relpath).to_string_lossy().into_owned(),
            start: row.segment_start,
            dur: row.segment_len,
        })?;
    }
    playlist.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(song: &str) -> PlanRow {
        PlanRow {
            subject: "01".to_string(),
            session_id: "E01".to_string(),
            session_date: "2024-01-01".to_string(),
            mode: "new".to_string(),
            block_id: 1,
            block_order: 1,
            song_id: song.to_string(),
            bucket: "shared".to_string(),
            song_dir: "shared".to_string(),
            song_file: format!("{}.mp3", song),
            song_relpath: format!("shared/{}.mp3", song),
            segment_start: 12.5,
            segment_len: 30.0,
            is_new: 1,
            first_seen_session_id: "E01".to_string(),
            first_seen_date: "2024-01-01".to_string(),
            first_seen_block_id: 1,
            first_seen_block_order: 1,
            played: 0,
            rating_value: String::new(),
            confirmation: String::new(),
        }
    }

    #[test]
    fn test_allocation_skips_result_dirs() {
        let dir = TempDir::new().unwrap();
        let (b1, moved) = allocate_block_dir(dir.path(), 1, "_repeat").unwrap();
        assert_eq!((b1.clone(), moved), (dir.path().join("B1"), false));

        std::fs::create_dir_all(&b1).unwrap();
        std::fs::write(b1.join("plan.csv"), "x").unwrap();
        assert!(!allocate_block_dir(dir.path(), 1, "_repeat").unwrap().1);

        std::fs::write(b1.join("results_20240101_120000.csv"), "x").unwrap();
        let (repeat, moved) = allocate_block_dir(dir.path(), 1, "_repeat").unwrap();
        assert!(moved);
        assert_eq!(repeat, dir.path().join("B1_repeat"));

        std::fs::create_dir_all(&repeat).unwrap();
        std::fs::write(repeat.join("results.csv"), "x").unwrap();
        let (next, _) = allocate_block_dir(dir.path(), 1, "_repeat").unwrap();
        assert_eq!(next, dir.path().join("B1_repeat2"));
    }

    #[test]
    fn test_write_block() {
        let dir = TempDir::new().unwrap();
        let block = dir.path().join("E01/B1");
        write_block(&block, &[row("a"), row("b")], Path::new("/music"), PlaylistFormat::Tsv).unwrap();

        let plan = std::fs::read_to_string(block.join("plan.csv")).unwrap();
        let mut lines = plan.lines();
        assert_eq!(lines.next().unwrap(), PLAN_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "01,E01,2024-01-01,new,1,1,a,shared,shared,a.mp3,shared/a.mp3,12.5,30.0,1,E01,2024-01-01,1,1,0,,"
        );

        let playlist = std::fs::read_to_string(block.join("playlist.tsv")).unwrap();
        assert_eq!(
            playlist.lines().collect::<Vec<_>>(),
            vec!["path\tstart\tdur", "/music/shared/a.mp3\t12.5\t30.0", "/music/shared/b.mp3\t12.5\t30.0"]
        );
    }

    #[test]
    fn test_empty_block_still_has_headers() {
        let dir = TempDir::new().unwrap();
        write_block(dir.path(), &[], Path::new("/music"), PlaylistFormat::Csv).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("playlist.csv")).unwrap(),
            "path,start,dur\n"
        );
    }
}
