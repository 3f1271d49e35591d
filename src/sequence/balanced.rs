//! Balanced unique task conditions for ctx / interdms designs
//!
//! Conditions are first dealt at random from a balanced label pool. When a
//! slot cannot find a unique condition (dense requests close to `8^nobjs`),
//! the whole set is rebuilt from shift classes, which always succeeds.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{NodeChain, SequenceError, Symbol, LOCATIONS, OBJECTS};

/// Random location draws tried before perturbing a colliding condition
const COLLISION_LIMIT: usize = 20;

/// Object rotations tried before trading a label with a later slot
const MAX_ROTATION_ROUNDS: usize = 8;

/// Label trades tried per slot before giving up on random dealing
const MAX_SWAPS: usize = 64;

/// Multiset of object labels whose counts differ by at most one, shuffled.
fn balanced_pool(total_slots: usize, rng: &mut StdRng) -> Vec<u8> {
    let labels: Vec<u8> = (0..OBJECTS).collect();
    let mut counts = vec![total_slots / labels.len(); labels.len()];
    let remainder = total_slots % labels.len();
    for &label in labels.choose_multiple(rng, remainder) {
        counts[label as usize] += 1;
    }

    let mut pool: Vec<u8> = labels
        .iter()
        .flat_map(|&label| std::iter::repeat(label).take(counts[label as usize]))
        .collect();
    pool.shuffle(rng);
    pool
}

fn assemble(locs: &[u8], objs: &[u8]) -> NodeChain {
    NodeChain::new(
        locs.iter()
            .zip(objs)
            .map(|(&loc, &obj)| Symbol { loc, obj })
            .collect(),
    )
}

/// Generate `ntcs` unique conditions of `nobjs` symbols each. Across all
/// conditions the object labels 0..3 occur equally often (to within one).
pub fn balanced_conditions(
    ntcs: usize,
    nobjs: usize,
    seed: u64,
) -> Result<Vec<NodeChain>, SequenceError> {
    if ntcs == 0 || nobjs == 0 {
        return Err(SequenceError::EmptyRequest { ntcs, nobjs });
    }
    let alphabet = (LOCATIONS as u128) * (OBJECTS as u128);
    let available = u32::try_from(nobjs)
        .ok()
        .and_then(|n| alphabet.checked_pow(n))
        .unwrap_or(u128::MAX);
    if ntcs as u128 > available {
        return Err(SequenceError::Infeasible {
            requested: ntcs,
            nobjs,
            available,
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let conditions = match deal_conditions(ntcs, nobjs, &mut rng) {
        Some(conditions) => conditions,
        None => {
            debug!(ntcs, nobjs, "random dealing stuck, building from shift classes");
            shift_class_conditions(ntcs, nobjs, &mut rng)
        }
    };

    debug!(ntcs, nobjs, "generated balanced conditions");
    Ok(conditions)
}

/// Deal `nobjs` pool labels per slot and draw locations until each
/// condition is unique. `None` when a slot runs out of label trades.
fn deal_conditions(ntcs: usize, nobjs: usize, rng: &mut StdRng) -> Option<Vec<NodeChain>> {
    let mut pool = balanced_pool(ntcs * nobjs, rng);

    let mut used: HashSet<NodeChain> = HashSet::with_capacity(ntcs);
    let mut conditions = Vec::with_capacity(ntcs);

    for slot in 0..ntcs {
        let end = (slot + 1) * nobjs;
        let mut objs = pool[slot * nobjs..end].to_vec();
        objs.shuffle(rng);

        let mut attempts = 0;
        let mut rounds = 0;
        let mut swaps = 0;
        loop {
            let mut locs: Vec<u8> = (0..nobjs).map(|_| rng.gen_range(0..LOCATIONS)).collect();
            let chain = assemble(&locs, &objs);
            if used.insert(chain.clone()) {
                conditions.push(chain);
                break;
            }

            attempts += 1;
            if attempts > COLLISION_LIMIT {
                let j = rng.gen_range(0..nobjs);
                locs[j] ^= 1;
                let nudged = assemble(&locs, &objs);
                if used.insert(nudged.clone()) {
                    conditions.push(nudged);
                    break;
                }
                objs.rotate_left(1);
                attempts = 0;
                rounds += 1;
                if rounds > MAX_ROTATION_ROUNDS {
                    // Trade one label with the undealt pool; the global
                    // multiset (and so the balance) is unchanged.
                    if end == pool.len() || swaps == MAX_SWAPS {
                        debug!(slot, swaps, "no unique condition for slot");
                        return None;
                    }
                    let j = rng.gen_range(0..nobjs);
                    let k = rng.gen_range(end..pool.len());
                    std::mem::swap(&mut objs[j], &mut pool[k]);
                    rounds = 0;
                    swaps += 1;
                }
            }
        }
    }
    Some(conditions)
}

/// A shift group: an object sequence starting with label 0 plus a location
/// sequence. Its four members add `c = 0..3` (mod 4) to every object, so
/// every position cycles through all labels and the group is balanced.
/// Distinct groups never share a condition.
type Group = (Vec<u8>, Vec<u8>);

fn shifted(objs: &[u8], c: u8) -> Vec<u8> {
    objs.iter().map(|&o| (o + c) % OBJECTS).collect()
}

/// Object sequence rotated so it starts with label 0
fn canonical(objs: &[u8]) -> Vec<u8> {
    let first = objs.first().copied().unwrap_or(0);
    shifted(objs, OBJECTS - first)
}

/// Number of groups when it fits in a usize: `4^(nobjs-1) * 2^nobjs`
fn group_count(nobjs: usize) -> Option<usize> {
    let bits = 3 * nobjs - 2;
    (bits < usize::BITS as usize).then(|| 1usize << bits)
}

fn encode_group((objs, locs): &Group) -> usize {
    let mut index = 0usize;
    for &digit in objs.iter().skip(1).rev() {
        index = (index << 2) | digit as usize;
    }
    for &loc in locs.iter().rev() {
        index = (index << 1) | loc as usize;
    }
    index
}

fn decode_group(mut index: usize, nobjs: usize) -> Group {
    let mut locs = Vec::with_capacity(nobjs);
    for _ in 0..nobjs {
        locs.push((index & 1) as u8);
        index >>= 1;
    }
    let mut objs = vec![0u8];
    for _ in 1..nobjs {
        objs.push((index & 3) as u8);
        index >>= 2;
    }
    (objs, locs)
}

fn random_group(nobjs: usize, rng: &mut StdRng) -> Group {
    let mut objs = vec![0u8];
    objs.extend((1..nobjs).map(|_| rng.gen_range(0..OBJECTS)));
    let locs = (0..nobjs).map(|_| rng.gen_range(0..LOCATIONS)).collect();
    (objs, locs)
}

/// `count` distinct groups, none equal to `excluded`
fn sample_groups(count: usize, nobjs: usize, excluded: Option<&Group>, rng: &mut StdRng) -> Vec<Group> {
    match group_count(nobjs) {
        Some(total) => {
            let skip = excluded.map(encode_group);
            let len = total - usize::from(skip.is_some());
            index::sample(rng, len, count)
                .into_iter()
                .map(|i| match skip {
                    Some(x) if i >= x => i + 1,
                    _ => i,
                })
                .map(|i| decode_group(i, nobjs))
                .collect()
        }
        None => {
            let mut seen: HashSet<Group> = excluded.into_iter().cloned().collect();
            let mut groups = Vec::with_capacity(count);
            while groups.len() < count {
                let group = random_group(nobjs, rng);
                if seen.insert(group.clone()) {
                    groups.push(group);
                }
            }
            groups
        }
    }
}

/// Full shift groups cover `ntcs / 4 * 4` conditions. The remaining 0..3
/// come from one extra group whose object sequence has balanced labels;
/// for two leftover conditions with `nobjs % 4 == 2` the heavier labels
/// are 0 and 2 so that the two shifts split them evenly.
fn shift_class_conditions(ntcs: usize, nobjs: usize, rng: &mut StdRng) -> Vec<NodeChain> {
    let full = ntcs / OBJECTS as usize;
    let leftover = ntcs % OBJECTS as usize;

    let mut conditions: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(ntcs);
    let mut extra: Option<Group> = None;
    if leftover > 0 {
        let base = nobjs / OBJECTS as usize;
        let heavy: Vec<u8> = match nobjs % OBJECTS as usize {
            2 => vec![0, 2],
            t => (0..t as u8).collect(),
        };
        let mut objs: Vec<u8> = (0..OBJECTS)
            .flat_map(|label| std::iter::repeat(label).take(base + usize::from(heavy.contains(&label))))
            .collect();
        objs.shuffle(rng);
        let locs: Vec<u8> = (0..nobjs).map(|_| rng.gen_range(0..LOCATIONS)).collect();
        for c in 0..leftover as u8 {
            conditions.push((shifted(&objs, c), locs.clone()));
        }
        extra = Some((canonical(&objs), locs));
    }

    for (objs, locs) in sample_groups(full, nobjs, extra.as_ref(), rng) {
        for c in 0..OBJECTS {
            conditions.push((shifted(&objs, c), locs.clone()));
        }
    }

    // relabel at random; a bijection keeps uniqueness and balance
    let mut relabel: Vec<u8> = (0..OBJECTS).collect();
    relabel.shuffle(rng);
    let mut chains: Vec<NodeChain> = conditions
        .iter()
        .map(|(objs, locs)| {
            let objs: Vec<u8> = objs.iter().map(|&o| relabel[o as usize]).collect();
            assemble(locs, &objs)
        })
        .collect();
    chains.shuffle(rng);
    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn object_counts(conditions: &[NodeChain]) -> [usize; OBJECTS as usize] {
        let mut counts = [0; OBJECTS as usize];
        for c in conditions {
            for s in c.symbols() {
                counts[s.obj() as usize] += 1;
            }
        }
        counts
    }

    #[test]
    fn test_conditions_are_unique_and_sized() {
        let tcs = balanced_conditions(30, 3, 0).unwrap();
        assert_eq!(tcs.len(), 30);
        assert!(tcs.iter().all(|c| c.len() == 3));
        let distinct: HashSet<_> = tcs.iter().collect();
        assert_eq!(distinct.len(), 30);
    }

    #[test]
    fn test_same_seed_same_conditions() {
        assert_eq!(
            balanced_conditions(7, 4, 11).unwrap(),
            balanced_conditions(7, 4, 11).unwrap()
        );
    }

    #[test]
    fn test_saturated_request_still_unique() {
        // every single-symbol condition
        let tcs = balanced_conditions(8, 1, 5).unwrap();
        let distinct: HashSet<_> = tcs.iter().collect();
        assert_eq!(distinct.len(), 8);
    }

    fn assert_valid(tcs: &[NodeChain], ntcs: usize, nobjs: usize) {
        assert_eq!(tcs.len(), ntcs);
        assert!(tcs.iter().all(|c| c.len() == nobjs));
        let distinct: HashSet<_> = tcs.iter().collect();
        assert_eq!(distinct.len(), ntcs, "duplicate condition");
        let counts = object_counts(tcs);
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        assert!(max - min <= 1, "unbalanced {:?}", counts);
    }

    #[test]
    fn test_dense_requests_always_succeed() {
        for (ntcs, nobjs) in [(60, 2), (62, 2), (63, 2), (64, 2), (7, 1), (500, 3), (512, 3)] {
            for seed in 0..20 {
                let tcs = balanced_conditions(ntcs, nobjs, seed).unwrap();
                assert_valid(&tcs, ntcs, nobjs);
            }
        }
    }

    #[test]
    fn test_shift_classes_cover_every_size() {
        for nobjs in 1..=3 {
            let total = 8usize.pow(nobjs as u32);
            for ntcs in (1..=total).filter(|n| *n <= 70 || total - n < 6) {
                let mut rng = StdRng::seed_from_u64(ntcs as u64);
                let tcs = shift_class_conditions(ntcs, nobjs, &mut rng);
                assert_valid(&tcs, ntcs, nobjs);
            }
        }
    }

    #[test]
    fn test_shift_classes_beyond_usize_index() {
        let mut rng = StdRng::seed_from_u64(3);
        let tcs = shift_class_conditions(41, 24, &mut rng);
        assert_valid(&tcs, 41, 24);
    }

    #[test]
    fn test_group_index_round_trip() {
        let group = (vec![0, 3, 1], vec![1, 0, 1]);
        assert_eq!(decode_group(encode_group(&group), 3), group);
        assert_eq!(canonical(&[2, 1, 3]), vec![0, 3, 1]);
        assert_eq!(group_count(2), Some(16));
    }

    #[test]
    fn test_rejects_impossible_requests() {
        assert!(matches!(
            balanced_conditions(0, 3, 0),
            Err(SequenceError::EmptyRequest { .. })
        ));
        assert!(matches!(
            balanced_conditions(9, 1, 0),
            Err(SequenceError::Infeasible { available: 8, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_object_labels_balanced(
            ntcs in 1usize..40,
            nobjs in 3usize..5,
            seed in any::<u64>(),
        ) {
            let tcs = balanced_conditions(ntcs, nobjs, seed).unwrap();
            let counts = object_counts(&tcs);
            let max = *counts.iter().max().unwrap();
            let min = *counts.iter().min().unwrap();
            prop_assert!(max - min <= 1);
            prop_assert_eq!(counts.iter().sum::<usize>(), ntcs * nobjs);
        }
    }
}
