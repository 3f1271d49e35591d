//! Block partitioning and sampling of trial tables
//!
//! Works on any CSV table: rows are kept as raw records so the column set
//! of the input survives untouched in every block file.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("number of blocks must be >= 1")]
    NoBlocks,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shuffle once with `seed`, then split into `n_blocks` contiguous chunks.
/// The first `len % n_blocks` chunks get one extra row.
pub fn partition<T: Clone>(rows: &[T], n_blocks: usize, seed: u64) -> Result<Vec<Vec<T>>, BlockError> {
    if n_blocks == 0 {
        return Err(BlockError::NoBlocks);
    }
    if n_blocks > rows.len() {
        warn!(
            n_blocks,
            rows = rows.len(),
            "more blocks than rows, some blocks will be empty"
        );
    }

    let mut shuffled = rows.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = shuffled.len() / n_blocks;
    let remainder = shuffled.len() % n_blocks;

    let mut blocks = Vec::with_capacity(n_blocks);
    let mut rest = shuffled.as_slice();
    for b in 0..n_blocks {
        let size = base + usize::from(b < remainder);
        let (chunk, tail) = rest.split_at(size);
        blocks.push(chunk.to_vec());
        rest = tail;
    }
    Ok(blocks)
}

/// Draw `count` rows without replacement. Asking for more rows than exist
/// returns the whole table (in its original order) with a warning.
pub fn sample<T: Clone>(rows: &[T], count: usize, seed: u64) -> Vec<T> {
    if count > rows.len() {
        warn!(
            requested = count,
            available = rows.len(),
            "sample larger than table, returning every row"
        );
        return rows.to_vec();
    }
    rows.choose_multiple(&mut StdRng::seed_from_u64(seed), count)
        .cloned()
        .collect()
}

/// Header plus raw rows of a CSV file
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTable {
    pub headers: csv::StringRecord,
    pub rows: Vec<csv::StringRecord>,
}

impl RecordTable {
    pub fn read(path: &Path) -> Result<Self, BlockError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self { headers, rows })
    }

    pub fn write(&self, path: &Path) -> Result<(), BlockError> {
        write_records(path, &self.headers, &self.rows)
    }

    pub fn partition(&self, n_blocks: usize, seed: u64) -> Result<Vec<RecordTable>, BlockError> {
        Ok(partition(&self.rows, n_blocks, seed)?
            .into_iter()
            .map(|rows| RecordTable {
                headers: self.headers.clone(),
                rows,
            })
            .collect())
    }

    pub fn sample(&self, count: usize, seed: u64) -> RecordTable {
        RecordTable {
            headers: self.headers.clone(),
            rows: sample(&self.rows, count, seed),
        }
    }
}

fn write_records(
    path: &Path,
    headers: &csv::StringRecord,
    rows: &[csv::StringRecord],
) -> Result<(), BlockError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// File name of block `index` of task `stem`: `<stem>_block_<index>.csv`
pub fn block_file_name(stem: &str, index: usize) -> String {
    format!("{}_block_{}.csv", stem, index)
}

/// Partition `table` and write one file per block into `out_dir`
pub fn write_blocks(
    table: &RecordTable,
    n_blocks: usize,
    seed: u64,
    out_dir: &Path,
    stem: &str,
) -> Result<Vec<PathBuf>, BlockError> {
    let blocks = table.partition(n_blocks, seed)?;
    std::fs::create_dir_all(out_dir)?;

    let mut written = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.iter().enumerate() {
        let path = out_dir.join(block_file_name(stem, index));
        block.write(&path)?;
        info!(task = stem, block = index, rows = block.rows.len(), path = %path.display(), "wrote block");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_partition_sizes() {
        let rows: Vec<u32> = (0..10).collect();
        let blocks = partition(&rows, 3, 0).unwrap();
        let sizes: Vec<usize> = blocks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn test_partition_more_blocks_than_rows() {
        let blocks = partition(&[1, 2], 4, 9).unwrap();
        let sizes: Vec<usize> = blocks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_partition_zero_blocks_fails() {
        assert!(matches!(partition(&[1], 0, 0), Err(BlockError::NoBlocks)));
    }

    #[test]
    fn test_sample_is_seeded() {
        let rows: Vec<u32> = (0..50).collect();
        let a = sample(&rows, 10, 4);
        assert_eq!(a, sample(&rows, 10, 4));
        assert_eq!(a.len(), 10);
        assert_eq!(a.iter().collect::<HashSet<_>>().len(), 10);
    }

    #[test]
    fn test_sample_oversized_returns_everything() {
        let rows = vec!["a", "b", "c"];
        assert_eq!(sample(&rows, 5, 0), rows);
    }

    #[test]
    fn test_write_blocks_keeps_columns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("ctxdm_col.csv");
        std::fs::write(&input, "loc1,obj1,tc_nodes\n0,1,01\n1,2,12\n0,3,03\n").unwrap();

        let table = RecordTable::read(&input).unwrap();
        let out = dir.path().join("session01");
        let paths = write_blocks(&table, 2, 1, &out, "ctxdm_col").unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("ctxdm_col_block_0.csv"));

        let first = RecordTable::read(&paths[0]).unwrap();
        let second = RecordTable::read(&paths[1]).unwrap();
        assert_eq!(first.headers, table.headers);
        assert_eq!(first.rows.len() + second.rows.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_partition_is_disjoint_cover(n in 0usize..200, k in 1usize..12, seed in any::<u64>()) {
            let rows: Vec<usize> = (0..n).collect();
            let blocks = partition(&rows, k, seed).unwrap();
            prop_assert_eq!(blocks.len(), k);

            let sizes: Vec<usize> = blocks.iter().map(Vec::len).collect();
            prop_assert_eq!(sizes.iter().sum::<usize>(), n);
            prop_assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);

            let all: HashSet<usize> = blocks.iter().flatten().copied().collect();
            prop_assert_eq!(all.len(), n);
            prop_assert_eq!(blocks, partition(&rows, k, seed).unwrap());
        }
    }
}
