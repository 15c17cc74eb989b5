//! BPE training engine.
//!
//! Repeatedly merges the most frequent adjacent token pair into a new
//! token, keeping three structures in lock-step: the linked token
//! sequence, the pair-frequency map, and a max-heap of merge
//! candidates. The heap is a source of candidates rather than
//! authoritative state: counts are decremented in place without
//! touching already-queued items, and obsolete items are discarded
//! when popped by comparing their recorded count against the live one.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::ControlFlow;

use log::{debug, info};

use crate::pretokenize;
use crate::stats::{PairStats, PositionPool};
use crate::types::{pack, unpack, MergeRule, PairKey, TokenId, EMPTY_KEY};

/// Doubly-linked token sequence stored as parallel index arrays.
///
/// `next`/`prev` hold position indices, with -1 at segment boundaries.
/// Merging splices the right-hand position out by rewriting the links
/// around it; the spliced slot is never reclaimed, so positions remain
/// stable keys for the occurrence lists.
#[derive(Debug)]
struct TokenSeq {
    val: Vec<TokenId>,
    next: Vec<i32>,
    prev: Vec<i32>,
}

impl TokenSeq {
    fn from_corpus(corpus: &[u8]) -> Self {
        let (val, next) = pretokenize::split(corpus);
        let n = val.len();
        let mut prev = vec![-1i32; n];
        for (i, &link) in next.iter().enumerate() {
            if link != -1 && (link as usize) < n {
                prev[link as usize] = i as i32;
            }
        }
        Self { val, next, prev }
    }

    fn len(&self) -> usize {
        self.val.len()
    }
}

/// Merge candidate queued by frequency.
///
/// Ordered by count, then by packed pair key, so equal-count
/// candidates pop in a fixed, reproducible order.
#[derive(Debug, PartialEq, Eq)]
struct HeapItem {
    count: u32,
    key: PairKey,
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// A validated merge site: the pair's left position plus its outer
/// neighbors (-1 where the segment ends).
#[derive(Debug, Clone, Copy)]
struct MergeSite {
    pos: i32,
    p: i32,
    nn: i32,
}

/// Single-use training run over one corpus.
///
/// Construction seeds the pair statistics and the candidate heap from
/// the pre-tokenized sequence; [`Trainer::run`] then drives the merge
/// loop, appending the learned rules and vocabulary entries onto the
/// caller's vectors.
pub(crate) struct Trainer {
    seq: TokenSeq,
    stats: PairStats,
    pool: PositionPool,
    heap: BinaryHeap<HeapItem>,
    target_vocab: u32,
    min_freq: u32,
}

impl Trainer {
    pub(crate) fn new(corpus: &[u8], target_vocab: u32, min_freq: u32) -> Self {
        let seq = TokenSeq::from_corpus(corpus);
        let pool = PositionPool::with_capacity(seq.len() / 2);
        let mut trainer = Self {
            stats: PairStats::for_training(target_vocab),
            heap: BinaryHeap::new(),
            seq,
            pool,
            target_vocab,
            min_freq,
        };
        trainer.seed_pairs();
        trainer.seed_heap();
        trainer
    }

    /// Counts every adjacent pair once and records its position.
    fn seed_pairs(&mut self) {
        for i in 0..self.seq.len() {
            let nxt = self.seq.next[i];
            if nxt == -1 {
                continue;
            }
            let key = pack(self.seq.val[i], self.seq.val[nxt as usize]);
            let entry = self.stats.slot_mut(key);
            if entry.key == EMPTY_KEY {
                entry.key = key;
            }
            entry.count += 1;
            self.pool.push(&mut entry.head, i as i32);
        }
    }

    /// Queues every pair that clears the frequency floor.
    fn seed_heap(&mut self) {
        for entry in self.stats.occupied() {
            if entry.count >= self.min_freq {
                self.heap.push(HeapItem {
                    count: entry.count,
                    key: entry.key,
                });
            }
        }
    }

    /// Runs the merge loop until the vocabulary target is reached, the
    /// queue drains, or no candidate clears the frequency floor.
    pub(crate) fn run(&mut self, merges: &mut Vec<MergeRule>, vocab: &mut Vec<Vec<u8>>) {
        let mut current_vocab = vocab.len() as u32;
        let merges_before = merges.len();
        let mut stale_skipped = 0u64;
        let mut last_accepted = u32::MAX;
        let mut positions: Vec<i32> = Vec::new();

        while current_vocab < self.target_vocab {
            let Some(item) = self.heap.pop() else {
                break;
            };

            let entry = self.stats.slot_mut(item.key);
            // A consumed slot or a count that moved since the push
            // makes the item obsolete; the pair may still be queued
            // again under its live count.
            if entry.key == EMPTY_KEY || entry.count != item.count {
                stale_skipped += 1;
                continue;
            }
            // Live counts only ever trail queued ones, so the first
            // accepted candidate below the floor ends the run.
            if entry.count < self.min_freq {
                break;
            }

            debug_assert!(item.count <= last_accepted);
            last_accepted = item.count;

            let (a, b) = unpack(item.key);
            let new_id = current_vocab;
            current_vocab += 1;

            let mut token = vocab[a as usize].clone();
            token.extend_from_slice(&vocab[b as usize]);
            vocab.push(token);
            merges.push(MergeRule { a, b, new_id });

            debug!(
                "merge ({a}, {b}) -> {new_id} at count {count}",
                count = item.count
            );

            let head = entry.head;
            entry.key = EMPTY_KEY;
            entry.count = 0;
            entry.head = -1;

            // Snapshot the occurrence list: neighborhood updates push
            // without removing, so the same position can appear more
            // than once.
            positions.clear();
            self.pool.collect_into(head, &mut positions);
            positions.sort_unstable();
            positions.dedup();

            // Left to right, so overlapping occurrences of the same
            // pair merge greedily from the left.
            for &pos in &positions {
                self.merge_at(pos, a, b, new_id);
            }
        }

        info!(
            "training done: {merged} merges, {stale_skipped} stale heap entries skipped",
            merged = merges.len() - merges_before
        );
    }

    /// Checks that the pair `(a, b)` still starts at `pos` with
    /// consistent links, or breaks when an earlier merge in this pass
    /// already absorbed the position.
    fn validate_site(&self, pos: i32, a: TokenId, b: TokenId) -> ControlFlow<(), MergeSite> {
        let n = self.seq.len() as i32;
        if pos < 0 || pos >= n || self.seq.val[pos as usize] != a {
            return ControlFlow::Break(());
        }

        let nxt = self.seq.next[pos as usize];
        if nxt < 0 || nxt >= n || self.seq.val[nxt as usize] != b {
            return ControlFlow::Break(());
        }

        let p = self.seq.prev[pos as usize];
        let nn = self.seq.next[nxt as usize];
        if p != -1 && self.seq.next[p as usize] != pos {
            return ControlFlow::Break(());
        }
        if nn != -1 && self.seq.prev[nn as usize] != nxt {
            return ControlFlow::Break(());
        }

        ControlFlow::Continue(MergeSite { pos, p, nn })
    }

    /// Applies the merge `(a, b) -> new_id` at one occurrence.
    ///
    /// Stale positions fail validation and are skipped silently; that
    /// is the expected fate of the right half of an earlier merge.
    fn merge_at(&mut self, pos: i32, a: TokenId, b: TokenId, new_id: TokenId) {
        let site = match self.validate_site(pos, a, b) {
            ControlFlow::Continue(site) => site,
            ControlFlow::Break(()) => return,
        };
        let MergeSite { pos, p, nn } = site;

        // The pair's outer neighbor pairs lose one occurrence each.
        if p != -1 {
            self.stats.decrement(pack(self.seq.val[p as usize], a));
        }
        if nn != -1 {
            self.stats.decrement(pack(b, self.seq.val[nn as usize]));
        }

        // Splice: `pos` carries the merged token, the right-hand
        // position drops out of the chain and its slot goes dead.
        self.seq.val[pos as usize] = new_id;
        self.seq.next[pos as usize] = nn;
        if nn != -1 {
            self.seq.prev[nn as usize] = pos;
        }
        debug_assert_ne!(self.seq.next[pos as usize], pos);

        // The merged token forms fresh pairs with both neighbors. The
        // left endpoint carries a pair, so the right-side pair is
        // recorded at `pos`, not at the neighbor.
        if p != -1 {
            let key = pack(self.seq.val[p as usize], new_id);
            self.bump_pair(key, p);
        }
        if nn != -1 {
            let key = pack(new_id, self.seq.val[nn as usize]);
            self.bump_pair(key, pos);
        }
    }

    /// Counts one new occurrence of `key` at `carrier`, re-queueing
    /// the pair when it clears the frequency floor. Pushing duplicates
    /// is fine: the snapshot dedup and the stale check absorb them.
    fn bump_pair(&mut self, key: PairKey, carrier: i32) {
        let entry = self.stats.slot_mut(key);
        if entry.key == EMPTY_KEY {
            entry.key = key;
        }
        entry.count += 1;
        let count = entry.count;
        self.pool.push(&mut entry.head, carrier);

        if count >= self.min_freq {
            self.heap.push(HeapItem { count, key });
        }
    }

    /// Collects the live token sequence by walking segment links.
    #[cfg(test)]
    fn live_tokens(&self) -> Vec<TokenId> {
        let mut out = Vec::new();
        let mut i = 0usize;
        while i < self.seq.len() {
            if self.seq.prev[i] == -1 && !self.is_dead(i) {
                let mut walk = i as i32;
                while walk != -1 {
                    out.push(self.seq.val[walk as usize]);
                    walk = self.seq.next[walk as usize];
                }
            }
            i += 1;
        }
        out
    }

    /// A slot is dead when it was spliced out: nothing links to it and
    /// it no longer heads a segment.
    #[cfg(test)]
    fn is_dead(&self, i: usize) -> bool {
        let nxt = self.seq.next[i];
        if nxt != -1 && self.seq.prev[nxt as usize] != i as i32 {
            return true;
        }
        let p = self.seq.prev[i];
        p != -1 && self.seq.next[p as usize] != i as i32
    }
}
