//! Pair bookkeeping for training: an append-only position arena and an
//! open-addressed frequency map.
//!
//! Both structures use plain integer indices instead of owning
//! references. Stored indices must stay valid for the whole training
//! run, so the arena only ever appends and the map never resizes or
//! compacts.

use crate::types::{PairKey, EMPTY_KEY, PAIR_HASH};

/// One occurrence record: a sequence position and the arena index of
/// the next record for the same pair (-1 terminates the list).
#[derive(Debug, Clone, Copy)]
struct PoolNode {
    pos: i32,
    next: i32,
}

/// Arena of per-pair occurrence lists.
///
/// Each pair owns an intrusive singly-linked list threaded through this
/// pool via its `head` field in [`PairStats`]. Insertion is O(1) and
/// walking a list yields positions in reverse insertion order. Nodes
/// are never removed; consumers detect stale positions against the
/// live token sequence instead.
#[derive(Debug)]
pub(crate) struct PositionPool {
    nodes: Vec<PoolNode>,
}

impl PositionPool {
    /// Creates a pool with space reserved up front so the hot loop does
    /// not reallocate.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Prepends `pos` to the list rooted at `head` and rewrites `head`
    /// to point at the new node.
    #[inline]
    pub(crate) fn push(&mut self, head: &mut i32, pos: i32) {
        self.nodes.push(PoolNode { pos, next: *head });
        *head = (self.nodes.len() - 1) as i32;
    }

    /// Appends every position reachable from `head` to `out`.
    pub(crate) fn collect_into(&self, head: i32, out: &mut Vec<i32>) {
        let mut walk = head;
        while walk != -1 && (walk as usize) < self.nodes.len() {
            let node = self.nodes[walk as usize];
            out.push(node.pos);
            walk = node.next;
        }
    }
}

/// A pair's live statistics: current frequency and the head of its
/// occurrence list in the [`PositionPool`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatsEntry {
    pub(crate) key: PairKey,
    pub(crate) count: u32,
    pub(crate) head: i32,
}

impl StatsEntry {
    const EMPTY: StatsEntry = StatsEntry {
        key: EMPTY_KEY,
        count: 0,
        head: -1,
    };
}

/// Open-addressed map from packed pair key to [`StatsEntry`].
///
/// Power-of-two sized, multiplicative hash, linear probing. The table
/// is sized at construction so that it can never fill during training
/// and is never grown afterwards; entry addresses therefore stay
/// stable while a caller holds one.
///
/// Deletion is logical: the slot's key reverts to the sentinel and its
/// count to zero. Heap entries that still refer to a consumed pair are
/// detected as stale when popped, not here.
#[derive(Debug)]
pub(crate) struct PairStats {
    table: Vec<StatsEntry>,
    mask: usize,
}

impl PairStats {
    /// Table sized for a training run: smallest power of two at least
    /// four times the target vocabulary.
    pub(crate) fn for_training(target_vocab: u32) -> Self {
        let mut size = 1usize;
        while size < target_vocab as usize * 4 {
            size <<= 1;
        }
        Self::with_pow2_size(size)
    }

    fn with_pow2_size(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        Self {
            table: vec![StatsEntry::EMPTY; size],
            mask: size - 1,
        }
    }

    #[inline]
    fn bucket(&self, key: PairKey) -> usize {
        (key.wrapping_mul(PAIR_HASH) as usize) & self.mask
    }

    /// Probes for `key`, stopping at its entry or at the first empty
    /// slot. The sizing policy keeps the table from ever filling; a
    /// full probe cycle means an invariant was broken upstream.
    fn probe(&self, key: PairKey) -> usize {
        let mut idx = self.bucket(key);
        for _ in 0..=self.mask {
            let slot_key = self.table[idx].key;
            if slot_key == key || slot_key == EMPTY_KEY {
                return idx;
            }
            idx = (idx + 1) & self.mask;
        }
        unreachable!("pair statistics table is full");
    }

    /// Handle for `key`: its entry if present, otherwise the empty slot
    /// where it would be inserted. Callers claim an empty slot by
    /// writing the key themselves.
    #[inline]
    pub(crate) fn slot_mut(&mut self, key: PairKey) -> &mut StatsEntry {
        let idx = self.probe(key);
        &mut self.table[idx]
    }

    /// Decrements the pair's count by one.
    ///
    /// A pair whose entry was already consumed, or whose count is zero,
    /// is left untouched.
    pub(crate) fn decrement(&mut self, key: PairKey) {
        let entry = self.slot_mut(key);
        if entry.key == key && entry.count > 0 {
            entry.count -= 1;
        }
    }

    /// Iterates over the occupied entries in slot order.
    pub(crate) fn occupied(&self) -> impl Iterator<Item = &StatsEntry> {
        self.table.iter().filter(|entry| entry.key != EMPTY_KEY)
    }
}
