//! Trial rows and trial tables
//!
//! A trial table is the CSV the presentation engine reads: for every
//! position `i` the columns `loc{i}, ref{i}, obj{i}, ctg{i}, ang{i}`, then the
//! optional `tc_nodes` / `tc_pairs` traceability columns. Positions past the
//! end of a shorter chain are written as empty cells, never as zero.

use std::collections::HashMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::sequence::{category, reference, NodeChain, SequenceError, Symbol};

pub const TC_NODES_COLUMN: &str = "tc_nodes";
pub const TC_PAIRS_COLUMN: &str = "tc_pairs";

/// Per-position columns, in file order
const POSITION_FIELDS: [&str; 5] = ["loc", "ref", "obj", "ctg", "ang"];

#[derive(Debug, Error)]
pub enum TrialError {
    #[error("no chains to instantiate")]
    Empty,

    #[error("chain {0} is empty")]
    EmptyChain(usize),

    #[error("malformed trial table{}: {reason}", .row.map(|r| format!(" (row {})", r)).unwrap_or_default())]
    Malformed { row: Option<usize>, reason: String },

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn malformed(row: Option<usize>, reason: impl Into<String>) -> TrialError {
    TrialError::Malformed {
        row,
        reason: reason.into(),
    }
}

/// Which traceability columns a table carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Trace {
    #[default]
    None,
    Nodes,
    Pairs,
    Both,
}

impl Trace {
    fn nodes(self) -> bool {
        matches!(self, Trace::Nodes | Trace::Both)
    }

    fn pairs(self) -> bool {
        matches!(self, Trace::Pairs | Trace::Both)
    }
}

/// One filled stimulus position. `ref` and `ctg` are derived, so they
/// always agree with `obj` and `ang`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    symbol: Symbol,
    ang: u8,
}

impl Position {
    pub fn new(symbol: Symbol, ang: u8) -> Self {
        Self { symbol, ang: ang & 1 }
    }

    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    pub fn loc(&self) -> u8 {
        self.symbol.loc()
    }

    pub fn obj(&self) -> u8 {
        self.symbol.obj()
    }

    pub fn ang(&self) -> u8 {
        self.ang
    }

    pub fn reference(&self) -> u8 {
        reference(self.obj(), self.ang)
    }

    pub fn ctg(&self) -> u8 {
        category(self.obj())
    }

    fn cells(&self) -> [String; 5] {
        [
            self.loc().to_string(),
            self.reference().to_string(),
            self.obj().to_string(),
            self.ctg().to_string(),
            self.ang.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialRow {
    /// Filled positions; everything after the last one is missing
    pub positions: Vec<Position>,
    pub tc_nodes: Option<String>,
    pub tc_pairs: Option<String>,
}

impl TrialRow {
    /// Node chain rebuilt from the position columns
    pub fn chain(&self) -> NodeChain {
        NodeChain::new(self.positions.iter().map(|p| p.symbol()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialTable {
    /// Number of position column groups
    pub seq_len: usize,
    pub rows: Vec<TrialRow>,
    pub has_nodes: bool,
    pub has_pairs: bool,
}

impl TrialTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> Vec<String> {
        let mut headers: Vec<String> = (1..=self.seq_len)
            .flat_map(|i| POSITION_FIELDS.iter().map(move |f| format!("{}{}", f, i)))
            .collect();
        if self.has_nodes {
            headers.push(TC_NODES_COLUMN.to_string());
        }
        if self.has_pairs {
            headers.push(TC_PAIRS_COLUMN.to_string());
        }
        headers
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TrialError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(self.headers())?;

        for row in &self.rows {
            let mut record: Vec<String> = Vec::with_capacity(self.seq_len * 5 + 2);
            for i in 0..self.seq_len {
                match row.positions.get(i) {
                    Some(p) => record.extend(p.cells()),
                    None => record.extend(std::iter::repeat(String::new()).take(5)),
                }
            }
            if self.has_nodes {
                record.push(row.tc_nodes.clone().unwrap_or_default());
            }
            if self.has_pairs {
                record.push(row.tc_pairs.clone().unwrap_or_default());
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
        debug!(path = %path.display(), rows = self.rows.len(), "wrote trial table");
        Ok(())
    }

    /// Read a trial table, rejecting gaps, partial positions and rows whose
    /// `ref`/`ctg` do not follow from `obj`/`ang`. Unknown columns (stray
    /// index columns and the like) are ignored.
    pub fn read_csv(path: &Path) -> Result<Self, TrialError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();

        let seq_len = headers
            .iter()
            .filter_map(|h| h.strip_prefix("loc").and_then(|n| n.parse::<usize>().ok()))
            .max()
            .ok_or_else(|| malformed(None, "no loc{i} columns"))?;

        let mut columns = Vec::with_capacity(seq_len);
        for i in 1..=seq_len {
            let mut group = [0usize; 5];
            for (slot, field) in POSITION_FIELDS.iter().enumerate() {
                let name = format!("{}{}", field, i);
                group[slot] = *index
                    .get(name.as_str())
                    .ok_or_else(|| malformed(None, format!("missing column {}", name)))?;
            }
            columns.push(group);
        }
        let nodes_col = index.get(TC_NODES_COLUMN).copied();
        let pairs_col = index.get(TC_PAIRS_COLUMN).copied();

        let mut rows = Vec::new();
        for (r, record) in reader.records().enumerate() {
            let record = record?;
            let mut positions = Vec::new();
            let mut ended = false;

            for (i, group) in columns.iter().enumerate() {
                let cells: Vec<&str> = group
                    .iter()
                    .map(|&c| record.get(c).unwrap_or("").trim())
                    .collect();
                if cells.iter().all(|c| c.is_empty()) {
                    ended = true;
                    continue;
                }
                if ended {
                    return Err(malformed(Some(r), format!("position {} follows a missing one", i + 1)));
                }
                if cells.iter().any(|c| c.is_empty()) {
                    return Err(malformed(Some(r), format!("position {} is partially filled", i + 1)));
                }

                let mut values = [0u8; 5];
                for (slot, cell) in cells.iter().enumerate() {
                    values[slot] = parse_cell(cell).ok_or_else(|| {
                        malformed(Some(r), format!("bad value '{}' in {}{}", cell, POSITION_FIELDS[slot], i + 1))
                    })?;
                }
                let [loc, reference_value, obj, ctg, ang] = values;
                if ang > 1 {
                    return Err(malformed(Some(r), format!("ang{} must be 0 or 1", i + 1)));
                }
                let position = Position::new(Symbol::new(loc, obj)?, ang);
                if position.reference() != reference_value || position.ctg() != ctg {
                    return Err(malformed(
                        Some(r),
                        format!("ref{0}/ctg{0} do not follow from obj{0}/ang{0}", i + 1),
                    ));
                }
                positions.push(position);
            }

            let text = |col: Option<usize>| {
                col.and_then(|c| record.get(c))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            };
            rows.push(TrialRow {
                positions,
                tc_nodes: text(nodes_col),
                tc_pairs: text(pairs_col),
            });
        }

        Ok(Self {
            seq_len,
            rows,
            has_nodes: nodes_col.is_some(),
            has_pairs: pairs_col.is_some(),
        })
    }
}

/// Integers may come back as `1.0` from tools that store gappy columns as floats
fn parse_cell(cell: &str) -> Option<u8> {
    cell.parse::<u8>().ok().or_else(|| {
        let value: f64 = cell.parse().ok()?;
        (value.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(&value)).then_some(value as u8)
    })
}

/// Materialize chains into a trial table. Angles are drawn from a generator
/// seeded with `seed`, one draw per filled position in row order.
pub fn instantiate(chains: &[NodeChain], seed: u64, trace: Trace) -> Result<TrialTable, TrialError> {
    if chains.is_empty() {
        return Err(TrialError::Empty);
    }
    if let Some(i) = chains.iter().position(NodeChain::is_empty) {
        return Err(TrialError::EmptyChain(i));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let seq_len = chains.iter().map(NodeChain::len).max().unwrap_or(0);

    let rows = chains
        .iter()
        .map(|chain| TrialRow {
            positions: chain
                .symbols()
                .iter()
                .map(|&s| Position::new(s, rng.gen_range(0..=1)))
                .collect(),
            tc_nodes: trace.nodes().then(|| chain.nodes_code()),
            tc_pairs: trace.pairs().then(|| chain.pairs_code()),
        })
        .collect();

    Ok(TrialTable {
        seq_len,
        rows,
        has_nodes: trace.nodes(),
        has_pairs: trace.pairs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::oneback_chains;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn chain(code: &str) -> NodeChain {
        code.parse().unwrap()
    }

    #[test]
    fn test_instantiate_derives_columns() {
        let table = instantiate(&[chain("00_13_11")], 7, Trace::Both).unwrap();
        let row = &table.rows[0];
        assert_eq!(row.positions.len(), 3);
        assert_eq!(row.positions[1].loc(), 1);
        assert_eq!(row.positions[1].obj(), 3);
        assert_eq!(row.positions[1].ctg(), 1);
        assert_eq!(row.tc_nodes.as_deref(), Some("00_13_11"));
        assert_eq!(row.tc_pairs.as_deref(), Some("00_13,13_11"));
    }

    #[test]
    fn test_same_seed_same_angles() {
        let chains = oneback_chains(20, 6, 0).unwrap();
        let a = instantiate(&chains, 3, Trace::None).unwrap();
        let b = instantiate(&chains, 3, Trace::None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(matches!(instantiate(&[], 0, Trace::None), Err(TrialError::Empty)));
        assert!(matches!(
            instantiate(&[chain("00"), NodeChain::default()], 0, Trace::None),
            Err(TrialError::EmptyChain(1))
        ));
    }

    #[test]
    fn test_short_chain_written_with_missing_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trials.csv");
        let table = instantiate(&[chain("00_01_02"), chain("10_11")], 1, Trace::Nodes).unwrap();
        table.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "loc1,ref1,obj1,ctg1,ang1,loc2,ref2,obj2,ctg2,ang2,loc3,ref3,obj3,ctg3,ang3,tc_nodes"
        );
        lines.next();
        assert!(lines.next().unwrap().ends_with(",,,,,10_11"));

        let back = TrialTable::read_csv(&path).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_read_rejects_broken_derivation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "loc1,ref1,obj1,ctg1,ang1\n0,5,3,1,0\n").unwrap();
        assert!(matches!(
            TrialTable::read_csv(&path),
            Err(TrialError::Malformed { row: Some(0), .. })
        ));
    }

    #[test]
    fn test_read_accepts_float_cells_and_stray_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("floats.csv");
        std::fs::write(&path, "Unnamed: 0,loc1,ref1,obj1,ctg1,ang1\n0,1.0,7.0,3.0,1.0,1.0\n").unwrap();
        let table = TrialTable::read_csv(&path).unwrap();
        assert_eq!(table.rows[0].positions[0].reference(), 7);
    }

    proptest! {
        #[test]
        fn prop_rows_respect_derivations(seed in any::<u64>(), ntcs in 5usize..=64) {
            let chains = oneback_chains(ntcs, 6, seed).unwrap();
            let table = instantiate(&chains, seed, Trace::None).unwrap();
            for row in &table.rows {
                for p in &row.positions {
                    prop_assert_eq!(p.reference(), p.obj() * 2 + p.ang());
                    prop_assert_eq!(p.ctg(), if p.obj() <= 1 { 0 } else { 1 });
                    prop_assert!(p.ang() <= 1);
                }
            }
        }
    }
}
