//! Sanity checks for generated trial tables
//!
//! Failed checks are reported, not raised: the caller decides what to do
//! with a table that repeats a pair. Only unreadable trace cells are errors.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::sequence::{pair_code, parse_pair, NodeChain, SequenceError, Symbol, OBJECTS, PAIR_SEPARATOR};
use crate::trial::{TrialRow, TrialTable};

#[derive(Debug, Error)]
pub enum SanityError {
    #[error("trial {trial}: {source}")]
    BadTrace {
        trial: usize,
        #[source]
        source: SequenceError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjacencyViolation {
    pub trial: usize,
    /// Index of the left pair within the trial
    pub position: usize,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanityReport {
    pub ok: bool,
    pub ok_no_repeats: bool,
    pub ok_adjacency: bool,
    /// Pair code -> number of occurrences, only pairs seen more than once
    pub repeated_pairs: BTreeMap<String, usize>,
    pub adjacency_violations: Vec<AdjacencyViolation>,
    pub n_trials: usize,
    pub n_unique_pairs: usize,
}

type Pair = (Symbol, Symbol);

/// Pairs of one trial: from `tc_pairs` when present, then `tc_nodes`, then
/// the position columns.
fn trial_pairs(trial: usize, row: &TrialRow) -> Result<Vec<Pair>, SanityError> {
    let bad = |source| SanityError::BadTrace { trial, source };
    if let Some(pairs) = &row.tc_pairs {
        return pairs.split(PAIR_SEPARATOR).map(|p| parse_pair(p.trim()).map_err(bad)).collect();
    }
    if let Some(nodes) = &row.tc_nodes {
        return Ok(nodes.parse::<NodeChain>().map_err(bad)?.pairs());
    }
    Ok(row.chain().pairs())
}

pub fn check_table(table: &TrialTable) -> Result<SanityReport, SanityError> {
    let per_trial = table
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| trial_pairs(i, row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(check_pairs(&per_trial))
}

/// Check (a) no pair occurs twice anywhere and (b) within each trial the
/// right symbol of each pair is the left symbol of the next.
pub fn check_pairs(per_trial: &[Vec<Pair>]) -> SanityReport {
    let mut counts: HashMap<Pair, usize> = HashMap::new();
    let mut adjacency_violations = Vec::new();

    for (trial, pairs) in per_trial.iter().enumerate() {
        for &pair in pairs {
            *counts.entry(pair).or_insert(0) += 1;
        }
        for (position, w) in pairs.windows(2).enumerate() {
            if w[0].1 != w[1].0 {
                adjacency_violations.push(AdjacencyViolation {
                    trial,
                    position,
                    left: pair_code(w[0].0, w[0].1),
                    right: pair_code(w[1].0, w[1].1),
                });
            }
        }
    }

    let repeated_pairs: BTreeMap<String, usize> = counts
        .iter()
        .filter(|(_, &n)| n > 1)
        .map(|(&(a, b), &n)| (pair_code(a, b), n))
        .collect();

    let ok_no_repeats = repeated_pairs.is_empty();
    let ok_adjacency = adjacency_violations.is_empty();
    SanityReport {
        ok: ok_no_repeats && ok_adjacency,
        ok_no_repeats,
        ok_adjacency,
        repeated_pairs,
        adjacency_violations,
        n_trials: per_trial.len(),
        n_unique_pairs: counts.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionReport {
    pub unique: bool,
    /// Condition codes occurring more than once
    pub duplicates: Vec<String>,
    /// Occurrences of objects 0..3 across every condition
    pub object_counts: Vec<usize>,
    /// Object counts differ by at most one
    pub balanced: bool,
}

/// Uniqueness and object balance of a set of task conditions
pub fn check_conditions(chains: &[NodeChain]) -> ConditionReport {
    let mut seen: HashMap<&NodeChain, usize> = HashMap::new();
    let mut object_counts = vec![0; OBJECTS as usize];
    for chain in chains {
        *seen.entry(chain).or_insert(0) += 1;
        for s in chain.symbols() {
            object_counts[s.obj() as usize] += 1;
        }
    }

    let mut duplicates: Vec<String> = seen
        .iter()
        .filter(|(_, &n)| n > 1)
        .map(|(c, _)| c.nodes_code())
        .collect();
    duplicates.sort();

    let max = object_counts.iter().max().copied().unwrap_or(0);
    let min = object_counts.iter().min().copied().unwrap_or(0);
    ConditionReport {
        unique: duplicates.is_empty(),
        duplicates,
        object_counts,
        balanced: max - min <= 1,
    }
}

/// Conditions stored in a table: `tc_nodes` when present, else the
/// position columns
pub fn table_conditions(table: &TrialTable) -> Result<Vec<NodeChain>, SanityError> {
    table
        .rows
        .iter()
        .enumerate()
        .map(|(trial, row)| match &row.tc_nodes {
            Some(nodes) => nodes
                .parse()
                .map_err(|source| SanityError::BadTrace { trial, source }),
            None => Ok(row.chain()),
        })
        .collect()
}
