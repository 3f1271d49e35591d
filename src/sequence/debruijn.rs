//! Minimal 1-back chains from a de Bruijn cycle
//!
//! `B(8, 2)` visits every ordered pair of the 8 symbols exactly once when
//! read cyclically. Slicing it into consecutive windows gives the fewest
//! chains that cover a requested number of pairs without repeating any.

use tracing::debug;

use super::{NodeChain, SequenceError, Symbol};

/// Smallest pair count a 1-back design may request
pub const ONEBACK_MIN_PAIRS: usize = 5;

/// All ordered pairs over the 8-symbol alphabet
pub const ONEBACK_MAX_PAIRS: usize = 64;

/// Indices of the de Bruijn sequence for alphabet size `k` and subsequence
/// length `n` (length `k^n`), lexicographically least form.
pub fn debruijn_indices(k: usize, n: usize) -> Vec<usize> {
    fn visit(t: usize, p: usize, k: usize, n: usize, a: &mut Vec<usize>, seq: &mut Vec<usize>) {
        if t > n {
            if n % p == 0 {
                seq.extend_from_slice(&a[1..=p]);
            }
            return;
        }
        a[t] = a[t - p];
        visit(t + 1, p, k, n, a, seq);
        for j in (a[t - p] + 1)..k {
            a[t] = j;
            visit(t + 1, t, k, n, a, seq);
        }
    }

    let mut seq = Vec::with_capacity(k.pow(n as u32));
    if k == 0 || n == 0 {
        return seq;
    }
    let mut a = vec![0; n + 1];
    visit(1, 1, k, n, &mut a, &mut seq);
    seq
}

/// Build the fewest node chains whose edges cover exactly `ntcs` distinct
/// ordered pairs. Each chain has `seq_len` nodes except the last, which
/// holds whatever edges remain. `seed` rotates the starting point in the
/// cycle.
pub fn oneback_chains(
    ntcs: usize,
    seq_len: usize,
    seed: u64,
) -> Result<Vec<NodeChain>, SequenceError> {
    if seq_len < 2 {
        return Err(SequenceError::ChainTooShort(seq_len));
    }
    if !(ONEBACK_MIN_PAIRS..=ONEBACK_MAX_PAIRS).contains(&ntcs) {
        return Err(SequenceError::PairCountOutOfRange {
            requested: ntcs,
            min: ONEBACK_MIN_PAIRS,
            max: ONEBACK_MAX_PAIRS,
        });
    }

    let symbols = Symbol::alphabet();
    let mut cycle = debruijn_indices(symbols.len(), 2);
    let rotation = (seed % cycle.len() as u64) as usize;
    cycle.rotate_left(rotation);

    // Close the cycle so the last pair is reachable
    let mut nodes: Vec<Symbol> = cycle.iter().map(|&i| symbols[i]).collect();
    nodes.push(nodes[0]);

    let edges_per_chain = seq_len - 1;
    let mut chains = Vec::with_capacity(ntcs.div_ceil(edges_per_chain));
    let mut position = 0;
    let mut remaining = ntcs;
    while remaining > 0 {
        let edges = edges_per_chain.min(remaining);
        chains.push(NodeChain::new(nodes[position..=position + edges].to_vec()));
        position += edges;
        remaining -= edges;
    }

    debug!(
        ntcs,
        seq_len,
        rotation,
        chains = chains.len(),
        "built 1-back chains"
    );
    Ok(chains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_debruijn_small_alphabet() {
        assert_eq!(debruijn_indices(2, 2), vec![0, 0, 1, 1]);
        assert_eq!(debruijn_indices(2, 3), vec![0, 0, 0, 1, 0, 1, 1, 1]);
    }

    #[test]
    fn test_debruijn_covers_every_pair_once() {
        let seq = debruijn_indices(8, 2);
        assert_eq!(seq.len(), 64);
        let pairs: HashSet<(usize, usize)> = (0..seq.len())
            .map(|i| (seq[i], seq[(i + 1) % seq.len()]))
            .collect();
        assert_eq!(pairs.len(), 64);
    }

    #[test]
    fn test_last_chain_is_shorter() {
        let chains = oneback_chains(12, 6, 0).unwrap();
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[0].len(), 6);
        assert_eq!(chains[1].len(), 6);
        assert_eq!(chains[2].len(), 3);
    }

    #[test]
    fn test_chains_share_touching_node() {
        let chains = oneback_chains(60, 6, 3).unwrap();
        for w in chains.windows(2) {
            assert_eq!(w[0].symbols().last(), w[1].symbols().first());
        }
    }

    #[test]
    fn test_seed_rotates_cycle() {
        let a = oneback_chains(10, 6, 0).unwrap();
        let b = oneback_chains(10, 6, 1).unwrap();
        let c = oneback_chains(10, 6, 64).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_rejects_invalid_requests() {
        assert_eq!(oneback_chains(10, 1, 0), Err(SequenceError::ChainTooShort(1)));
        assert!(matches!(
            oneback_chains(4, 6, 0),
            Err(SequenceError::PairCountOutOfRange { requested: 4, .. })
        ));
        assert!(matches!(
            oneback_chains(65, 6, 0),
            Err(SequenceError::PairCountOutOfRange { requested: 65, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_edges_cover_ntcs_without_repeats(
            ntcs in ONEBACK_MIN_PAIRS..=ONEBACK_MAX_PAIRS,
            seq_len in 2usize..10,
            seed in any::<u64>(),
        ) {
            let chains = oneback_chains(ntcs, seq_len, seed).unwrap();
            let edges: Vec<_> = chains.iter().flat_map(|c| c.pairs()).collect();
            let distinct: HashSet<_> = edges.iter().copied().collect();
            prop_assert_eq!(edges.len(), ntcs);
            prop_assert_eq!(distinct.len(), ntcs);
            prop_assert_eq!(chains.len(), ntcs.div_ceil(seq_len - 1));
        }
    }
}
