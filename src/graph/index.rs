//! Hash indices over the arenas.
//!
//! [`ProbeTable`] is an open-addressed, linear-probing multimap from a 64-bit
//! key to small `Copy` values. It backs both the content index (payload hash →
//! nodes) and the pair index ((from, to) → edge). Several values may share a
//! key; callers confirm a hit against the arena. The table doubles once it is
//! half full, counting tombstones.

use crate::error::{GraphError, GraphResult};

use super::types::NodeId;

const MIN_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy)]
enum Bucket<V> {
    Empty,
    Tombstone,
    Full(u64, V),
}

#[derive(Debug, Clone)]
pub struct ProbeTable<V> {
    buckets: Vec<Bucket<V>>,
    live: usize,
    tombstones: usize,
}

impl<V: Copy + PartialEq> Default for ProbeTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Copy + PartialEq> ProbeTable<V> {
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            live: 0,
            tombstones: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn needs_growth(&self) -> bool {
        (self.live + self.tombstones + 1) * 2 > self.buckets.len()
    }

    fn next_capacity(&self) -> usize {
        if self.buckets.is_empty() {
            MIN_CAPACITY
        } else if (self.live + 1) * 4 <= self.buckets.len() {
            // Mostly tombstones: rehash in place rather than grow.
            self.buckets.len()
        } else {
            self.buckets.len() * 2
        }
    }

    /// Make sure the next [`insert`](Self::insert) will not need to allocate.
    pub fn reserve_one(&mut self, what: &'static str) -> GraphResult<()> {
        if !self.needs_growth() {
            return Ok(());
        }
        let capacity = self.next_capacity();
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(capacity)
            .map_err(GraphError::capacity(what))?;
        buckets.resize(capacity, Bucket::Empty);
        self.rehash_into(buckets);
        Ok(())
    }

    fn rehash_into(&mut self, mut buckets: Vec<Bucket<V>>) {
        let mask = buckets.len() - 1;
        for bucket in self.buckets.drain(..) {
            if let Bucket::Full(key, value) = bucket {
                let mut i = slot_for(key, mask);
                while matches!(buckets[i], Bucket::Full(..)) {
                    i = (i + 1) & mask;
                }
                buckets[i] = Bucket::Full(key, value);
            }
        }
        self.buckets = buckets;
        self.tombstones = 0;
    }

    pub fn insert(&mut self, key: u64, value: V) {
        if self.needs_growth() {
            let capacity = self.next_capacity();
            self.rehash_into(vec![Bucket::Empty; capacity]);
        }
        let mask = self.buckets.len() - 1;
        let mut i = slot_for(key, mask);
        loop {
            match self.buckets[i] {
                Bucket::Empty => break,
                Bucket::Tombstone => {
                    self.tombstones -= 1;
                    break;
                }
                Bucket::Full(..) => i = (i + 1) & mask,
            }
        }
        self.buckets[i] = Bucket::Full(key, value);
        self.live += 1;
    }

    /// Every value stored under `key`, in probe order.
    pub fn get_all(&self, key: u64) -> impl Iterator<Item = V> + '_ {
        let mask = self.buckets.len().wrapping_sub(1);
        let start = if self.buckets.is_empty() {
            0
        } else {
            slot_for(key, mask)
        };
        ProbeIter {
            table: self,
            key,
            pos: start,
            remaining: self.buckets.len(),
        }
    }

    /// First value under `key` accepted by `pred`.
    pub fn find(&self, key: u64, pred: impl Fn(V) -> bool) -> Option<V> {
        self.get_all(key).find(|v| pred(*v))
    }

    pub fn remove(&mut self, key: u64, value: V) -> bool {
        if self.buckets.is_empty() {
            return false;
        }
        let mask = self.buckets.len() - 1;
        let mut i = slot_for(key, mask);
        for _ in 0..self.buckets.len() {
            match self.buckets[i] {
                Bucket::Empty => return false,
                Bucket::Full(k, v) if k == key && v == value => {
                    self.buckets[i] = Bucket::Tombstone;
                    self.live -= 1;
                    self.tombstones += 1;
                    return true;
                }
                _ => i = (i + 1) & mask,
            }
        }
        false
    }
}

struct ProbeIter<'a, V> {
    table: &'a ProbeTable<V>,
    key: u64,
    pos: usize,
    remaining: usize,
}

impl<V: Copy> Iterator for ProbeIter<'_, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let mask = self.table.buckets.len().wrapping_sub(1);
        while self.remaining > 0 {
            let bucket = self.table.buckets[self.pos];
            self.pos = (self.pos + 1) & mask;
            self.remaining -= 1;
            match bucket {
                Bucket::Empty => {
                    self.remaining = 0;
                    return None;
                }
                Bucket::Full(k, v) if k == self.key => return Some(v),
                _ => {}
            }
        }
        None
    }
}

/// SplitMix64 finalizer; spreads structured keys (handle pairs) across buckets.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn slot_for(key: u64, mask: usize) -> usize {
    (mix64(key) as usize) & mask
}

/// Probe key for the directed pair `(from, to)`.
pub fn pair_key(from: NodeId, to: NodeId) -> u64 {
    mix64(from.mix()) ^ to.mix().rotate_left(29)
}

// ── Level index ──────────────────────────────────────────────────────────────

/// Hierarchy nodes grouped by abstraction level (level 0 is not indexed).
#[derive(Debug, Clone, Default)]
pub struct LevelIndex {
    levels: Vec<Vec<NodeId>>,
}

impl LevelIndex {
    pub fn reserve_one(&mut self, level: u32) -> GraphResult<()> {
        let slot = level as usize;
        if self.levels.len() <= slot {
            self.levels
                .try_reserve(slot + 1 - self.levels.len())
                .map_err(GraphError::capacity("level index"))?;
            self.levels.resize_with(slot + 1, Vec::new);
        }
        self.levels[slot]
            .try_reserve(1)
            .map_err(GraphError::capacity("level index"))
    }

    pub fn insert(&mut self, level: u32, id: NodeId) {
        if level == 0 {
            return;
        }
        let slot = level as usize;
        if self.levels.len() <= slot {
            self.levels.resize_with(slot + 1, Vec::new);
        }
        self.levels[slot].push(id);
    }

    pub fn remove(&mut self, level: u32, id: NodeId) {
        if let Some(nodes) = self.levels.get_mut(level as usize) {
            if let Some(pos) = nodes.iter().position(|n| *n == id) {
                nodes.swap_remove(pos);
            }
        }
    }

    pub fn nodes_at(&self, level: u32) -> &[NodeId] {
        if level == 0 {
            return &[];
        }
        self.levels
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Highest level holding at least one node, or 0.
    pub fn max_level(&self) -> u32 {
        self.levels
            .iter()
            .rposition(|nodes| !nodes.is_empty())
            .unwrap_or(0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_at_half_load() {
        let mut table: ProbeTable<u32> = ProbeTable::new();
        for i in 0..8u32 {
            table.insert(i as u64, i);
        }
        assert_eq!(table.capacity(), 16, "8 of 16 is exactly half full");
        table.insert(8, 8);
        assert_eq!(table.capacity(), 32, "ninth entry crosses half load");
        for i in 0..9u32 {
            assert_eq!(table.find(i as u64, |_| true), Some(i));
        }
    }

    #[test]
    fn multimap_keeps_colliding_values() {
        let mut table: ProbeTable<u32> = ProbeTable::new();
        table.insert(7, 1);
        table.insert(7, 2);
        table.insert(9, 3);
        let mut hits: Vec<u32> = table.get_all(7).collect();
        hits.sort();
        assert_eq!(hits, vec![1, 2]);

        assert!(table.remove(7, 1));
        assert!(!table.remove(7, 1), "already removed");
        assert_eq!(table.get_all(7).collect::<Vec<_>>(), vec![2]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn lookup_survives_tombstones() {
        let mut table: ProbeTable<u32> = ProbeTable::new();
        for i in 0..6u32 {
            table.insert(100, i);
        }
        for i in 0..5u32 {
            table.remove(100, i);
        }
        assert_eq!(table.find(100, |v| v == 5), Some(5));
        assert_eq!(table.get_all(42).count(), 0);
    }

    #[test]
    fn empty_table_lookups_are_safe() {
        let mut table: ProbeTable<u32> = ProbeTable::new();
        assert_eq!(table.get_all(1).count(), 0);
        assert!(!table.remove(1, 1));
    }

    #[test]
    fn level_index_tracks_max_level() {
        use crate::graph::arena::ArenaHandle;
        let a = NodeId::from_parts(1, 0);
        let b = NodeId::from_parts(2, 0);
        let mut index = LevelIndex::default();
        index.insert(1, a);
        index.insert(3, b);
        assert_eq!(index.max_level(), 3);
        assert_eq!(index.nodes_at(1), &[a]);
        index.remove(3, b);
        assert_eq!(index.max_level(), 1);
        assert!(index.nodes_at(0).is_empty());
    }
}
