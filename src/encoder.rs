//! Inference-side merge application.
//!
//! Training produces an ordered merge list; encoding needs the reverse
//! lookup, pair to rank. [`RankMap`] holds that lookup in an
//! open-addressed table and [`encode_segment`] greedily applies the
//! lowest-rank merge within one pre-token segment until none applies.

use crate::types::{pack, MergeRule, PairKey, Rank, EMPTY_KEY, PAIR_HASH};

#[derive(Debug, Clone, Copy)]
struct RankEntry {
    key: PairKey,
    rank: Rank,
}

/// Lookup table from packed token pair to merge rank.
///
/// Built once from the full merge list, after training or loading, and
/// read-only afterwards. Same hashing scheme as the training-side
/// statistics map, sized to at least twice the merge count.
#[derive(Debug)]
pub(crate) struct RankMap {
    table: Vec<RankEntry>,
    mask: usize,
}

impl RankMap {
    pub(crate) fn build(merges: &[MergeRule]) -> Self {
        let mut size = 1usize;
        while size < merges.len() * 2 {
            size <<= 1;
        }
        let mut table = vec![
            RankEntry {
                key: EMPTY_KEY,
                rank: -1,
            };
            size
        ];
        let mask = size - 1;

        for (rank, rule) in merges.iter().enumerate() {
            let key = pack(rule.a, rule.b);
            let mut idx = (key.wrapping_mul(PAIR_HASH) as usize) & mask;
            while table[idx].key != EMPTY_KEY {
                idx = (idx + 1) & mask;
            }
            table[idx] = RankEntry {
                key,
                rank: rank as Rank,
            };
        }

        Self { table, mask }
    }

    /// Rank of the merge rule for this pair, if one was learned.
    pub(crate) fn rank_of(&self, key: PairKey) -> Option<Rank> {
        let mut idx = (key.wrapping_mul(PAIR_HASH) as usize) & self.mask;
        loop {
            let entry = self.table[idx];
            if entry.key == key {
                return Some(entry.rank);
            }
            if entry.key == EMPTY_KEY {
                return None;
            }
            idx = (idx + 1) & self.mask;
        }
    }
}

/// Applies learned merges to one segment's tokens, in place.
///
/// Each round scans every adjacent pair, picks the lowest-rank merge
/// (leftmost on ties) and rewrites it, until no pair has a rule.
/// Quadratic in the segment length, which the pre-tokenizer keeps
/// small.
pub(crate) fn encode_segment(work: &mut Vec<u32>, ranks: &RankMap, merges: &[MergeRule]) {
    while work.len() >= 2 {
        let mut best_rank = Rank::MAX;
        let mut best_i = 0usize;

        for i in 0..work.len() - 1 {
            if let Some(rank) = ranks.rank_of(pack(work[i], work[i + 1])) {
                if rank < best_rank {
                    best_rank = rank;
                    best_i = i;
                }
            }
        }

        if best_rank == Rank::MAX {
            break;
        }

        work[best_i] = merges[best_rank as usize].new_id;
        work.remove(best_i + 1);
    }
}
