//! Candidate reference selection and longest-increasing-subsequence chaining
//! of seed hits.

use crate::{index::SeedIndex, read::Read};
use foldhash::{HashMap, HashMapExt};
use std::collections::VecDeque;

/// References carrying at least `seed_hits` window hits, ordered by
/// descending hit count and ascending reference id on ties.
pub fn candidate_refs(read: &Read, index: &SeedIndex, seed_hits: u32) -> Vec<(u32, u32)> {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for hit in &read.id_win_hits {
        for pos in &index.positions[hit.seed_id as usize] {
            *counts.entry(pos.ref_seq).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<(u32, u32)> = counts
        .into_iter()
        .filter(|&(_, count)| count >= seed_hits)
        .map(|(ref_seq, count)| (count, ref_seq))
        .collect();
    candidates.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    candidates
}

/// All `(ref_pos, read_pos)` pairs anchoring the read's window hits on one
/// reference, sorted ascending by reference position, then read position.
pub fn hits_on_ref(read: &Read, index: &SeedIndex, ref_seq: u32) -> Vec<(u32, u32)> {
    let mut hits: Vec<(u32, u32)> = Vec::new();
    for hit in &read.id_win_hits {
        for pos in &index.positions[hit.seed_id as usize] {
            if pos.ref_seq == ref_seq {
                hits.push((pos.ref_pos, hit.win));
            }
        }
    }
    hits.sort_unstable();
    hits
}

/// Patience-sorting longest strictly increasing subsequence over the read
/// positions of the queued hits, O(n log k). Returns indices into `a` in
/// chain order; the first index anchors the alignment.
pub fn find_lis(a: &VecDeque<(u32, u32)>) -> Vec<u32> {
    let mut b: Vec<u32> = Vec::new();
    if a.is_empty() {
        return b;
    }

    let mut p = vec![0u32; a.len()];
    b.push(0);

    for i in 1..a.len() as u32 {
        // extend the longest chain when possible
        if a[*b.last().unwrap() as usize].1 < a[i as usize].1 {
            p[i as usize] = *b.last().unwrap();
            b.push(i);
            continue;
        }

        // binary search over chain tails for the smallest tail >= a[i]
        let (mut u, mut v) = (0usize, b.len() - 1);
        while u < v {
            let c = (u + v) / 2;
            if a[b[c] as usize].1 < a[i as usize].1 {
                u = c + 1;
            } else {
                v = c;
            }
        }

        if a[i as usize].1 < a[b[u] as usize].1 {
            if u > 0 {
                p[i as usize] = b[u - 1];
            }
            b[u] = i;
        }
    }

    // walk predecessor pointers to recover the chain
    let mut u = b.len();
    let mut v = *b.last().unwrap();
    while u > 0 {
        u -= 1;
        b[u] = v;
        v = p[v as usize];
    }
    b
}

#[cfg(test)]
mod test {
    use super::*;

    fn deque(pairs: &[(u32, u32)]) -> VecDeque<(u32, u32)> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_input_yields_empty_chain() {
        assert!(find_lis(&deque(&[])).is_empty());
    }

    #[test]
    fn finds_the_longest_strictly_increasing_chain() {
        // read positions: 3, 1, 4, 1, 5, 9, 2, 6
        let a = deque(&[
            (10, 3),
            (20, 1),
            (30, 4),
            (40, 1),
            (50, 5),
            (60, 9),
            (70, 2),
            (80, 6),
        ]);
        let chain = find_lis(&a);
        let values: Vec<u32> = chain.iter().map(|&i| a[i as usize].1).collect();
        assert_eq!(values.len(), 4);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(values, vec![1, 4, 5, 6]);
    }

    #[test]
    fn equal_read_positions_do_not_chain() {
        let a = deque(&[(1, 5), (2, 5), (3, 5)]);
        assert_eq!(find_lis(&a).len(), 1);
    }

    #[test]
    fn already_sorted_input_is_fully_chained() {
        let a = deque(&[(5, 0), (9, 18), (14, 36), (22, 54)]);
        let chain = find_lis(&a);
        assert_eq!(chain, vec![0, 1, 2, 3]);
    }

    #[test]
    fn chain_indices_point_into_the_deque() {
        let a = deque(&[(0, 7), (1, 2), (2, 8), (3, 1), (4, 9)]);
        let chain = find_lis(&a);
        let values: Vec<u32> = chain.iter().map(|&i| a[i as usize].1).collect();
        assert_eq!(values, vec![2, 8, 9]);
        assert_eq!(a[chain[0] as usize], (1, 2));
    }
}
