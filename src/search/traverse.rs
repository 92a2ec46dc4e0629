//! Parallel traversal of a mini burst-trie with the LEV(1) automaton.
//!
//! Both structures advance together: each trie slot or bucket symbol feeds
//! one characteristic-bitvector key into the automaton, and branches are
//! pruned the moment the automaton reaches its sink. Every seed whose stored
//! k-mer lies within edit distance 1 of the read window is reported; an exact
//! match clears the window's hit list and ends the traversal early unless the
//! full search is requested.

use crate::{
    index::trie::{Slot, Trie},
    search::{
        bitvector::WindowBitvectors,
        levenshtein::{self, EXACT_MATCH, FIRST_ACCEPTING, SINK},
    },
};

/// A window hit: a seed ID from the index and the read offset of the window
/// that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedHit {
    pub seed_id: u32,
    pub win:     u32,
}

/// One automaton transition at `depth`. Mid-trie depths use the per-depth
/// rows; the last three depths reuse the final row group under a shrinking
/// mask.
#[inline]
fn step(bv: &WindowBitvectors, partialwin: usize, depth: usize, nt: u8, state: u8) -> u8 {
    if depth < partialwin - 2 {
        levenshtein::step_mid(bv.key_mid(depth, nt), state)
    } else {
        let layer = 3 + depth - partialwin;
        let mask = (2u8 << (partialwin - depth)) - 1;
        levenshtein::step_near_end(layer, bv.key_full(nt) & mask, state)
    }
}

/// Walks `trie` against the window described by `bv`, appending every seed at
/// edit distance <= 1 to `hits`.
///
/// When an exact match is found (and `full_search` is off), `accept_zero_kmer`
/// is raised, `hits` is reduced to that single seed, and the walk stops: the
/// exact hit subsumes the window.
pub fn traversetrie_align(
    trie: &Trie, bv: &WindowBitvectors, partialwin: usize, win: u32, full_search: bool, accept_zero_kmer: &mut bool,
    hits: &mut Vec<SeedHit>,
) {
    walk(trie, 0, 0, 0, bv, partialwin, win, full_search, accept_zero_kmer, hits);
}

#[allow(clippy::too_many_arguments)]
fn walk(
    trie: &Trie, node: u32, pivot: u8, depth: usize, bv: &WindowBitvectors, partialwin: usize, win: u32,
    full_search: bool, accept_zero_kmer: &mut bool, hits: &mut Vec<SeedHit>,
) {
    for (nt, slot) in trie.slots(node).iter().enumerate() {
        if matches!(slot, Slot::Empty) {
            continue;
        }

        let state = step(bv, partialwin, depth, nt as u8, pivot);
        if state == SINK {
            continue;
        }

        match *slot {
            Slot::Empty => continue,
            Slot::Inner(child) => {
                walk(
                    trie,
                    child,
                    state,
                    depth + 1,
                    bv,
                    partialwin,
                    win,
                    full_search,
                    accept_zero_kmer,
                    hits,
                );
                if *accept_zero_kmer {
                    return;
                }
            }
            Slot::Bucket { start, len } => {
                // every entry restarts from the state reached at this slot
                let chars = partialwin - depth;
                'entries: for entry in trie.bucket(start, len) {
                    let mut lev = state;
                    let mut suffix = entry.suffix;
                    let mut local_accept = false;

                    for j in 0..chars {
                        let nt = (suffix & 3) as u8;
                        let depth_b = depth + 1 + j;

                        lev = step(bv, partialwin, depth_b, nt, lev);
                        if lev == SINK {
                            continue 'entries;
                        }

                        if depth_b >= partialwin - 2 {
                            if lev >= FIRST_ACCEPTING {
                                local_accept = true;
                            }
                            if depth_b == partialwin - 1 && lev == EXACT_MATCH && !full_search {
                                *accept_zero_kmer = true;
                            }
                        }

                        if local_accept {
                            let hit = SeedHit {
                                seed_id: entry.seed_id,
                                win,
                            };
                            if *accept_zero_kmer {
                                hits.clear();
                                hits.push(hit);
                                return;
                            }
                            // suppress duplicate 1-error ids within one window
                            if hits.iter().any(|h| h.seed_id == entry.seed_id) {
                                continue 'entries;
                            }
                            hits.push(hit);
                        }

                        suffix >>= 2;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::index::trie::test_support::TrieBuilder;

    const W: usize = 9;

    // a read half-window and its trailing context symbol
    fn window() -> Vec<u8> {
        vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 2]
    }

    fn run(trie: &Trie, full_search: bool) -> (Vec<SeedHit>, bool) {
        let seq = window();
        let bv = WindowBitvectors::forward(&seq, 0, W);
        let mut hits = Vec::new();
        let mut accept_zero = false;
        traversetrie_align(trie, &bv, W, 0, full_search, &mut accept_zero, &mut hits);
        (hits, accept_zero)
    }

    #[test]
    fn exact_seed_is_found_and_flagged() {
        let trie = TrieBuilder::new(W, 2).seed(&window(), 5).build();
        let (hits, accept_zero) = run(&trie, false);
        assert!(accept_zero);
        assert_eq!(hits, vec![SeedHit { seed_id: 5, win: 0 }]);
    }

    #[test]
    fn exact_match_clears_one_error_hits() {
        // seed 3 differs from the window by one substitution, seed 5 is exact;
        // the exact hit must be the only survivor
        let mut with_sub = window();
        with_sub[4] = 3;
        let trie = TrieBuilder::new(W, 2)
            .seed(&with_sub, 3)
            .seed(&window(), 5)
            .build();
        let (hits, accept_zero) = run(&trie, false);
        assert!(accept_zero);
        assert_eq!(hits, vec![SeedHit { seed_id: 5, win: 0 }]);
    }

    #[test]
    fn substitution_within_distance_one_is_found() {
        let mut with_sub = window();
        with_sub[6] = 0;
        let trie = TrieBuilder::new(W, 2).seed(&with_sub, 11).build();
        let (hits, accept_zero) = run(&trie, false);
        assert!(!accept_zero);
        assert_eq!(hits, vec![SeedHit { seed_id: 11, win: 0 }]);
    }

    #[test]
    fn two_substitutions_are_rejected() {
        let mut far = window();
        far[2] = 3;
        far[6] = 0;
        let trie = TrieBuilder::new(W, 2).seed(&far, 13).build();
        let (hits, _) = run(&trie, false);
        assert!(hits.is_empty());
    }

    #[test]
    fn full_search_keeps_exact_and_neighbors() {
        let mut with_sub = window();
        with_sub[4] = 3;
        let trie = TrieBuilder::new(W, 2)
            .seed(&with_sub, 3)
            .seed(&window(), 5)
            .build();
        let (hits, accept_zero) = run(&trie, true);
        assert!(!accept_zero);
        let mut ids: Vec<u32> = hits.iter().map(|h| h.seed_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![3, 5]);
    }

    #[test]
    fn duplicate_seed_ids_are_suppressed() {
        let mut a = window();
        a[1] = 3;
        let mut b = window();
        b[6] = 0;
        let trie = TrieBuilder::new(W, 2).seed(&a, 21).seed(&b, 21).build();
        let (hits, _) = run(&trie, false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seed_id, 21);
    }

    #[test]
    fn deletion_neighbor_is_found() {
        // reference seed one symbol shorter over the window span: delete
        // window position 3 and shift in the next context symbols
        let full = window();
        let mut deleted: Vec<u8> = Vec::new();
        deleted.extend_from_slice(&full[..3]);
        deleted.extend_from_slice(&full[4..]);
        deleted.push(1);
        let trie = TrieBuilder::new(W, 2).seed(&deleted, 17).build();
        let (hits, _) = run(&trie, false);
        assert_eq!(hits, vec![SeedHit { seed_id: 17, win: 0 }]);
    }
}
