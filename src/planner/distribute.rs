//! Stable assignment of catalog songs to blocks

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// Song `i` of the shuffled catalog goes to block `i % n`
    RoundRobin,
    /// Greedy: each song goes to the open block with the least total
    /// duration; block sizes still differ by at most one
    #[default]
    BalancedDuration,
}

/// Song indices (into the catalog entries) per block; block ids are 1-based
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    blocks: Vec<Vec<usize>>,
}

impl BlockLayout {
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.blocks.len()).map(|b| b as u32)
    }

    pub fn block(&self, id: u32) -> &[usize] {
        id.checked_sub(1)
            .and_then(|i| self.blocks.get(i as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Shuffle with `seed`, then assign. Unknown durations count as zero, so
/// ties fall to the block with fewer songs, then the lower index.
///
/// Balanced assignment keeps every block at `n / k` songs, with the first
/// `n % k` blocks to fill up allowed one more.
pub fn distribute(entries: &[CatalogEntry], n_blocks: usize, assignment: Assignment, seed: u64) -> BlockLayout {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut blocks: Vec<Vec<usize>> = vec![Vec::new(); n_blocks];
    if n_blocks == 0 {
        return BlockLayout { blocks };
    }

    match assignment {
        Assignment::RoundRobin => {
            for (i, song) in order.into_iter().enumerate() {
                blocks[i % n_blocks].push(song);
            }
        }
        Assignment::BalancedDuration => {
            let floor = entries.len() / n_blocks;
            let mut larger_left = entries.len() % n_blocks;
            let mut totals = vec![0.0f64; n_blocks];
            for song in order {
                let target = (0..n_blocks)
                    .filter(|&b| blocks[b].len() < floor || (blocks[b].len() == floor && larger_left > 0))
                    .min_by(|&a, &b| {
                        totals[a]
                            .total_cmp(&totals[b])
                            .then(blocks[a].len().cmp(&blocks[b].len()))
                            .then(a.cmp(&b))
                    })
                    .unwrap_or(0);
                if blocks[target].len() == floor {
                    larger_left -= 1;
                }
                totals[target] += entries[song].duration_sec.unwrap_or(0.0);
                blocks[target].push(song);
            }
        }
    }
    BlockLayout { blocks }
}
