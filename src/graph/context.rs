//! Sparse activation contexts and the tags edges keep of them.

use super::types::NodeId;

/// One active node inside a [`SparseContext`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextEntry {
    pub node: NodeId,
    pub strength: f32,
    pub channel: u8,
    pub level: u32,
}

/// Resolves the children of a hierarchy node, for cross-level credit, and
/// whether a node still exists.
pub trait ChildLookup {
    fn children_of(&self, id: NodeId) -> &[NodeId];

    /// Entries for nodes that are gone take no part in similarity.
    fn is_live(&self, _id: NodeId) -> bool {
        true
    }
}

/// No hierarchy information; similarity falls back to plain overlap.
pub struct NoChildren;

impl ChildLookup for NoChildren {
    fn children_of(&self, _id: NodeId) -> &[NodeId] {
        &[]
    }
}

/// A small set of active nodes with strengths, kept sorted by node handle so
/// two contexts can be compared with a single merge pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseContext {
    entries: Vec<ContextEntry>,
}

impl SparseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Build from arbitrary entries; duplicates keep their strongest strength.
    pub fn from_entries(entries: impl IntoIterator<Item = ContextEntry>) -> Self {
        let mut ctx = SparseContext::new();
        for entry in entries {
            ctx.push(entry);
        }
        ctx
    }

    /// Insert an entry, or raise the strength of an existing one.
    pub fn push(&mut self, entry: ContextEntry) {
        if !(entry.strength > 0.0) {
            return;
        }
        match self.entries.binary_search_by_key(&entry.node, |e| e.node) {
            Ok(i) => {
                let existing = &mut self.entries[i];
                existing.strength = existing.strength.max(entry.strength);
            }
            Err(i) => self.entries.insert(i, entry),
        }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn strength_of(&self, node: NodeId) -> Option<f32> {
        self.entries
            .binary_search_by_key(&node, |e| e.node)
            .ok()
            .map(|i| self.entries[i].strength)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.strength_of(node).is_some()
    }

    pub fn total_strength(&self) -> f32 {
        self.entries.iter().map(|e| e.strength).sum()
    }

    /// Strength-weighted mean abstraction level of the entries.
    pub fn mean_level(&self) -> f32 {
        let total = self.total_strength();
        if total <= 0.0 {
            return 0.0;
        }
        self.entries
            .iter()
            .map(|e| e.level as f32 * e.strength)
            .sum::<f32>()
            / total
    }

    /// Keep only the `limit` strongest entries.
    pub fn truncate_strongest(&mut self, limit: usize) {
        if self.entries.len() <= limit {
            return;
        }
        self.entries
            .sort_by(|a, b| b.strength.total_cmp(&a.strength));
        self.entries.truncate(limit);
        self.entries.sort_by_key(|e| e.node);
    }

    /// Weighted Jaccard overlap in `[0, 1]`, with partial credit when a
    /// hierarchy on one side contains, as a child, a node present on the other.
    pub fn similarity(&self, other: &SparseContext, lookup: &dyn ChildLookup) -> f32 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let (mut i, mut j) = (0, 0);
        let (mut shared, mut union) = (0.0f32, 0.0f32);
        let (a, b) = (&self.entries, &other.entries);
        let live = |e: &ContextEntry| lookup.is_live(e.node);
        while i < a.len() && j < b.len() {
            if !live(&a[i]) {
                i += 1;
                continue;
            }
            if !live(&b[j]) {
                j += 1;
                continue;
            }
            match a[i].node.cmp(&b[j].node) {
                std::cmp::Ordering::Equal => {
                    shared += a[i].strength.min(b[j].strength);
                    union += a[i].strength.max(b[j].strength);
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => {
                    union += a[i].strength;
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    union += b[j].strength;
                    j += 1;
                }
            }
        }
        union += a[i..].iter().filter(|e| live(e)).map(|e| e.strength).sum::<f32>();
        union += b[j..].iter().filter(|e| live(e)).map(|e| e.strength).sum::<f32>();

        let cross = self.cross_level_credit(other, lookup) + other.cross_level_credit(self, lookup);
        if union <= 0.0 {
            return 0.0;
        }
        ((shared + cross) / union).clamp(0.0, 1.0)
    }

    /// Credit for hierarchies here whose children appear in `other`. Half
    /// weight: containment is evidence, not identity.
    fn cross_level_credit(&self, other: &SparseContext, lookup: &dyn ChildLookup) -> f32 {
        let mut credit = 0.0;
        for entry in self.entries.iter().filter(|e| e.level > 0) {
            if other.contains(entry.node) {
                continue;
            }
            let children = lookup.children_of(entry.node);
            if children.is_empty() {
                continue;
            }
            let (hits, strength) = children
                .iter()
                .filter_map(|c| other.strength_of(*c))
                .fold((0usize, 0.0f32), |(n, s), x| (n + 1, s + x));
            if hits == 0 {
                continue;
            }
            let coverage = hits as f32 / children.len() as f32;
            let mean = strength / hits as f32;
            credit += 0.5 * coverage * entry.strength.min(mean);
        }
        credit
    }

    /// Blend `other` into this context at `rate` in `[0, 1]`. Entries only in
    /// `other` enter at `rate` of their strength. The result keeps at most as
    /// many entries as the larger of the two inputs.
    pub fn absorb(&mut self, other: &SparseContext, rate: f32) {
        let rate = rate.clamp(0.0, 1.0);
        let limit = self.len().max(other.len());
        for entry in &other.entries {
            match self.entries.binary_search_by_key(&entry.node, |e| e.node) {
                Ok(i) => {
                    let s = &mut self.entries[i].strength;
                    *s = *s * (1.0 - rate) + entry.strength * rate;
                }
                Err(i) => {
                    if rate > 0.0 {
                        self.entries.insert(
                            i,
                            ContextEntry {
                                strength: entry.strength * rate,
                                ..*entry
                            },
                        );
                    }
                }
            }
        }
        self.truncate_strongest(limit);
    }

    /// Drop entries whose node is not accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(NodeId) -> bool) {
        self.entries.retain(|e| keep(e.node));
    }
}

/// A context captured on an edge, with how much it contributed when the edge
/// fired in it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextTag {
    pub context: SparseContext,
    pub contribution: f32,
    /// Wave stamp at creation.
    pub created: u32,
    /// Wave stamp of the last merge or match.
    pub last_used: u32,
}
