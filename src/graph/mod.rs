//! The indexed node/edge store.
//!
//! [`Graph`] owns both arenas and every index over them: the content hash
//! table, the byte trie, the pair table, and the per-level index. Every
//! structural mutation goes through this type so that indices and cached
//! weight sums are updated in the same step as the arena. Capacity for all of
//! them is reserved before anything is written, so a failed insertion leaves
//! the graph untouched.

pub mod arena;
pub mod category;
pub mod context;
pub mod eviction;
pub mod hierarchy;
pub mod index;
pub mod stats;
pub mod tagging;
pub mod trie;
pub mod types;

use std::borrow::Cow;

use tracing::trace;

use crate::error::{GraphError, GraphResult};

use self::arena::Arena;
use self::context::{ChildLookup, ContextEntry, SparseContext};
use self::index::{pair_key, LevelIndex, ProbeTable};
use self::stats::GraphStats;
use self::trie::ByteTrie;
use self::types::{Edge, EdgeFlags, EdgeId, Node, NodeId, Weight};

/// Tunables the graph store needs. Everything else is derived from
/// [`GraphStats`].
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Hierarchies whose payload is at most this many bytes store a copy;
    /// larger ones keep only child references.
    pub inline_payload_limit: usize,
    /// Upper bound on entries in a captured sparse context.
    pub max_context_nodes: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            inline_payload_limit: 64,
            max_context_nodes: 16,
        }
    }
}

/// 64-bit content hash of a payload: the first eight bytes of its BLAKE3 digest.
pub fn content_hash(payload: &[u8]) -> u64 {
    let digest = blake3::hash(payload);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) nodes: Arena<Node, NodeId>,
    pub(crate) edges: Arena<Edge, EdgeId>,
    content: ProbeTable<NodeId>,
    pairs: ProbeTable<EdgeId>,
    trie: ByteTrie,
    levels: LevelIndex,
    pub(crate) stats: GraphStats,
    pub(crate) wave: u32,
    pub(crate) adaptations: u64,
    pub(crate) next_key: u64,
    /// Bumped whenever a node is removed; memoized payloads built before the
    /// bump are rebuilt on next access.
    pub(crate) structure_epoch: u64,
    pub(crate) sweep_cursor: usize,
    config: GraphConfig,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl Graph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            nodes: Arena::new(),
            edges: Arena::new(),
            content: ProbeTable::new(),
            pairs: ProbeTable::new(),
            trie: ByteTrie::new(),
            levels: LevelIndex::default(),
            stats: GraphStats::default(),
            wave: 0,
            adaptations: 0,
            next_key: 1,
            structure_epoch: 0,
            sweep_cursor: 0,
            config,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter()
    }

    /// Current wave (one wave per processed chunk or decode step batch).
    pub fn wave(&self) -> u32 {
        self.wave
    }

    pub(crate) fn advance_wave(&mut self) -> u32 {
        self.wave = self.wave.wrapping_add(1);
        self.wave
    }

    /// Number of chunks this graph has learned from.
    pub fn adaptation_count(&self) -> u64 {
        self.adaptations
    }

    /// Average out-degree over the whole graph, computed from the counts.
    pub fn average_out_degree(&self) -> f32 {
        if self.nodes.is_empty() {
            0.0
        } else {
            self.edges.len() as f32 / self.nodes.len() as f32
        }
    }

    pub fn nodes_at_level(&self, level: u32) -> &[NodeId] {
        self.levels.nodes_at(level)
    }

    pub fn max_level(&self) -> u32 {
        self.levels.max_level()
    }

    /// Node handle for a persistent key. Linear; meant for tooling, not for
    /// hot paths.
    pub fn find_by_key(&self, key: u64) -> Option<NodeId> {
        self.nodes.iter().find(|(_, n)| n.key == key).map(|(id, _)| id)
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Nodes whose payload is exactly `payload`, via the trie. Never mutates.
    pub fn lookup(&self, payload: &[u8]) -> &[NodeId] {
        self.trie.lookup(payload)
    }

    /// Longest prefix of `input` carried by some node, with its candidates.
    pub fn longest_match<'a>(&'a self, input: &'a [u8]) -> Option<(usize, &'a [NodeId])> {
        self.trie.longest_match(input)
    }

    /// Exact match through the content hash table, confirmed byte-for-byte.
    pub fn find_exact(&self, payload: &[u8]) -> Option<NodeId> {
        let hash = content_hash(payload);
        self.content.find(hash, |id| {
            self.payload(id)
                .map(|p| p.as_ref() == payload)
                .unwrap_or(false)
        })
    }

    /// Return the node best matching `payload` in `context`, creating a raw
    /// node if none exists.
    pub fn find_or_create(
        &mut self,
        payload: &[u8],
        context: Option<&SparseContext>,
    ) -> GraphResult<NodeId> {
        let candidates = self.trie.lookup(payload);
        match candidates {
            [] => {}
            [only] => return Ok(*only),
            several => {
                if let Some(best) = self.best_candidate(several, context) {
                    return Ok(best);
                }
            }
        }
        if let Some(id) = self.find_exact(payload) {
            return Ok(id);
        }
        self.create_node(payload)
    }

    /// Score candidates sharing one payload; `None` when none scores above zero.
    fn best_candidate(&self, candidates: &[NodeId], context: Option<&SparseContext>) -> Option<NodeId> {
        let total_usage: u64 = candidates
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|n| n.usage as u64)
            .sum();
        let max_level = self.max_level() as f32 + 1.0;

        let mut best: Option<(NodeId, f32)> = None;
        for &id in candidates {
            let Some(node) = self.node(id) else { continue };
            let connectivity = context
                .map(|ctx| self.connectivity(id, ctx))
                .unwrap_or(0.0);
            let usage = if total_usage > 0 {
                node.usage as f32 / total_usage as f32
            } else {
                0.0
            };
            let score = node.activation.max(0.0) + connectivity + node.level as f32 / max_level + usage;
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((id, score));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Strength of the context entries directly linked to `id` in either direction.
    pub fn connectivity(&self, id: NodeId, context: &SparseContext) -> f32 {
        context
            .entries()
            .iter()
            .filter(|e| self.find_edge(e.node, id).is_some() || self.find_edge(id, e.node).is_some())
            .map(|e| e.strength)
            .sum()
    }

    pub fn find_edge(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        self.pairs.find(pair_key(from, to), |id| {
            self.edges
                .get(id)
                .map(|e| e.from == from && e.to == to)
                .unwrap_or(false)
        })
    }

    /// Context entry for `id` at `strength`, carrying its channel and level.
    pub fn context_entry(&self, id: NodeId, strength: f32) -> Option<ContextEntry> {
        self.node(id).map(|n| ContextEntry {
            node: id,
            strength,
            channel: n.channel,
            level: n.level,
        })
    }

    // ── Node creation ────────────────────────────────────────────────────────

    /// Create a raw (or blank, for an empty payload) node, even if another
    /// node already carries the same payload.
    pub fn create_node(&mut self, payload: &[u8]) -> GraphResult<NodeId> {
        let node = Node::new(
            self.next_key,
            content_hash(payload),
            Some(payload.into()),
            payload.len(),
        );
        self.commit_node(node, payload)
    }

    /// Insert a fully built node into the arena and every index. `payload` is
    /// its logical payload, used for the trie.
    pub(crate) fn commit_node(&mut self, mut node: Node, payload: &[u8]) -> GraphResult<NodeId> {
        self.nodes.reserve_one()?;
        self.content.reserve_one("content index")?;
        self.trie.reserve_for(payload)?;
        if node.level > 0 {
            self.levels.reserve_one(node.level)?;
        }

        node.last_seen = self.wave;
        self.next_key = self.next_key.max(node.key + 1);
        let (hash, level, children) = (node.hash, node.level, node.children.clone());
        let id = self.nodes.insert(node);
        self.content.insert(hash, id);
        self.trie.insert(payload, id);
        self.levels.insert(level, id);
        for child in children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent_count += 1;
            }
        }
        trace!(%id, level, len = payload.len(), "node created");
        Ok(id)
    }

    /// Mark a node as seen in the current wave.
    pub(crate) fn touch(&mut self, id: NodeId) {
        let wave = self.wave;
        if let Some(node) = self.nodes.get_mut(id) {
            node.usage = node.usage.saturating_add(1);
            node.last_seen = wave;
        }
    }

    // ── Edges ────────────────────────────────────────────────────────────────

    /// Existing edge `from → to`, or a new one at neutral weight.
    /// Returns the edge and whether it was created.
    pub fn find_or_create_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        flags: EdgeFlags,
    ) -> GraphResult<(EdgeId, bool)> {
        if let Some(id) = self.find_edge(from, to) {
            return Ok((id, false));
        }
        let edge = Edge::new(from, to, Weight::NEUTRAL, flags, self.wave);
        Ok((self.commit_edge(edge)?, true))
    }

    pub(crate) fn commit_edge(&mut self, edge: Edge) -> GraphResult<EdgeId> {
        let (from, to) = (edge.from, edge.to);
        self.nodes.try_get(from)?;
        self.nodes.try_get(to)?;
        self.edges.reserve_one()?;
        self.pairs.reserve_one("pair index")?;
        self.reserve_adjacency(from, to)?;

        let raw = edge.weight.raw() as u64;
        let sequential = edge.flags.is_sequential();
        self.stats.observe_weight(edge.weight.as_f32());
        let id = self.edges.insert(edge);
        self.pairs.insert(pair_key(from, to), id);
        if let Some(src) = self.nodes.get_mut(from) {
            src.outgoing.push(id);
            src.out_weight_sum += raw;
        }
        if let Some(dst) = self.nodes.get_mut(to) {
            dst.incoming.push(id);
            dst.in_weight_sum += raw;
        }
        if sequential {
            let degree = self.sequential_degree(from);
            self.stats.out_degree.push(degree as f64);
        }
        Ok(id)
    }

    fn reserve_adjacency(&mut self, from: NodeId, to: NodeId) -> GraphResult<()> {
        let src = self.nodes.get_mut(from).ok_or_else(|| stale(from))?;
        src.outgoing
            .try_reserve(1)
            .map_err(GraphError::capacity("adjacency"))?;
        let dst = self.nodes.get_mut(to).ok_or_else(|| stale(to))?;
        dst.incoming
            .try_reserve(1)
            .map_err(GraphError::capacity("adjacency"))?;
        Ok(())
    }

    /// Number of outgoing sequence edges (no structural or category links).
    pub fn sequential_degree(&self, id: NodeId) -> usize {
        self.sequential_out(id).count()
    }

    /// Outgoing sequence edges of `id`, in creation order.
    pub fn sequential_out(&self, id: NodeId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.out_edges(id).filter(|(_, e)| e.flags.is_sequential())
    }

    /// All outgoing edges of `id`, in creation order.
    pub fn out_edges(&self, id: NodeId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.node(id)
            .map(|n| n.outgoing.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(|e| self.edges.get(*e).map(|edge| (*e, edge)))
    }

    /// Rate-free Hebbian increment: the weight grows by the co-activation
    /// level, saturating at [`Weight::MAX`].
    pub fn reinforce(&mut self, id: EdgeId, activation: f32) -> Option<Weight> {
        let current = self.edges.get(id)?.weight;
        let next = current.saturating_add_f32(activation.max(0.0));
        self.set_weight(id, next);
        let wave = self.wave;
        if let Some(edge) = self.edges.get_mut(id) {
            edge.generation = wave;
            edge.flags.remove(EdgeFlags::MARKED);
        }
        Some(next)
    }

    /// Overwrite an edge weight, keeping both endpoints' cached sums exact.
    pub fn set_weight(&mut self, id: EdgeId, weight: Weight) -> Option<Weight> {
        let edge = self.edges.get_mut(id)?;
        let old = edge.weight;
        edge.weight = weight;
        let (from, to) = (edge.from, edge.to);
        let (old_raw, new_raw) = (old.raw() as u64, weight.raw() as u64);
        if let Some(src) = self.nodes.get_mut(from) {
            src.out_weight_sum = src.out_weight_sum - old_raw + new_raw;
        }
        if let Some(dst) = self.nodes.get_mut(to) {
            dst.in_weight_sum = dst.in_weight_sum - old_raw + new_raw;
        }
        self.stats.observe_weight(weight.as_f32());
        Some(old)
    }

    // ── Removal ──────────────────────────────────────────────────────────────

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(id)?;
        self.pairs.remove(pair_key(edge.from, edge.to), id);
        let raw = edge.weight.raw() as u64;
        if let Some(src) = self.nodes.get_mut(edge.from) {
            if let Some(pos) = src.outgoing.iter().position(|e| *e == id) {
                src.outgoing.remove(pos);
            }
            src.out_weight_sum -= raw;
        }
        if let Some(dst) = self.nodes.get_mut(edge.to) {
            if let Some(pos) = dst.incoming.iter().position(|e| *e == id) {
                dst.incoming.remove(pos);
            }
            dst.in_weight_sum -= raw;
        }
        Some(edge)
    }

    /// Remove a node: its edges first, then every index entry, then the slot.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let payload = self.payload(id)?.into_owned();
        let node = self.nodes.get(id)?;
        let attached: Vec<EdgeId> = node
            .outgoing
            .iter()
            .chain(node.incoming.iter())
            .copied()
            .collect();
        for edge in attached {
            self.remove_edge(edge);
        }
        let node = self.nodes.remove(id)?;
        self.content.remove(node.hash, id);
        self.trie.remove(&payload, id);
        self.levels.remove(node.level, id);
        for child in &node.children {
            if let Some(c) = self.nodes.get_mut(*child) {
                c.parent_count = c.parent_count.saturating_sub(1);
            }
        }
        self.structure_epoch += 1;
        Some(node)
    }

    /// Payload of `id`, reconstructing large hierarchies lazily.
    pub fn payload(&self, id: NodeId) -> Option<Cow<'_, [u8]>> {
        let node = self.nodes.get(id)?;
        match node.payload.as_deref() {
            Some(bytes) => Some(Cow::Borrowed(bytes)),
            None => Some(Cow::Owned(self.rebuilt_payload(id)?.to_vec())),
        }
    }
}

impl ChildLookup for Graph {
    fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    fn is_live(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }
}

fn stale(id: NodeId) -> GraphError {
    use self::arena::ArenaHandle;
    GraphError::StaleHandle {
        kind: NodeId::KIND,
        index: id.index(),
        generation: id.generation(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_of(graph: &Graph, ids: &[NodeId]) -> SparseContext {
        SparseContext::from_entries(ids.iter().filter_map(|id| graph.context_entry(*id, 1.0)))
    }

    #[test]
    fn same_payload_same_context_same_node() {
        let mut graph = Graph::default();
        let a = graph.find_or_create(b"a", None).unwrap();
        let b = graph.find_or_create(b"a", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.find_exact(b"a"), Some(a));
        assert_eq!(graph.lookup(b"a"), &[a]);
    }

    #[test]
    fn lookup_never_creates() {
        let mut graph = Graph::default();
        graph.find_or_create(b"x", None).unwrap();
        assert!(graph.lookup(b"y").is_empty());
        assert!(graph.find_exact(b"y").is_none());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn context_disambiguates_shared_payload() {
        let mut graph = Graph::default();
        let left = graph.create_node(b"L").unwrap();
        let right = graph.create_node(b"R").unwrap();
        let blank_a = graph.create_node(b"").unwrap();
        let blank_b = graph.create_node(b"").unwrap();
        graph.find_or_create_edge(left, blank_a, EdgeFlags::empty()).unwrap();
        graph.find_or_create_edge(right, blank_b, EdgeFlags::empty()).unwrap();

        let near_right = ctx_of(&graph, &[right]);
        let near_left = ctx_of(&graph, &[left]);
        assert_eq!(graph.find_or_create(b"", Some(&near_right)).unwrap(), blank_b);
        assert_eq!(graph.find_or_create(b"", Some(&near_left)).unwrap(), blank_a);
        // Repeated calls with the same context stay stable.
        assert_eq!(graph.find_or_create(b"", Some(&near_right)).unwrap(), blank_b);
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn unscored_candidates_fall_back_to_exact_match() {
        let mut graph = Graph::default();
        let first = graph.create_node(b"").unwrap();
        graph.create_node(b"").unwrap();
        assert_eq!(graph.find_or_create(b"", None).unwrap(), first);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn weight_sums_follow_every_mutation() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let c = graph.create_node(b"c").unwrap();
        let (ab, created) = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        assert!(created);
        let (ac, _) = graph.find_or_create_edge(a, c, EdgeFlags::empty()).unwrap();
        graph.reinforce(ab, 1.0);
        graph.reinforce(ab, 0.5);

        let expected: u64 = graph
            .out_edges(a)
            .map(|(_, e)| e.weight().raw() as u64)
            .sum();
        assert_eq!(graph.node(a).unwrap().out_weight_sum, expected);
        assert!((graph.node(a).unwrap().out_weight_sum() - 3.5).abs() < 1e-3);

        graph.remove_edge(ac);
        assert!((graph.node(a).unwrap().out_weight_sum() - 2.5).abs() < 1e-3);
        assert!((graph.node(c).unwrap().in_weight_sum()).abs() < 1e-6);
        assert!(graph.find_edge(a, c).is_none());
        assert_eq!(graph.find_edge(a, b), Some(ab));
    }

    #[test]
    fn reinforce_saturates() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let (ab, _) = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        for _ in 0..400 {
            graph.reinforce(ab, 1.0);
        }
        assert_eq!(graph.edge(ab).unwrap().weight(), Weight::MAX);
        assert_eq!(graph.node(a).unwrap().out_weight_sum, Weight::MAX.raw() as u64);
    }

    #[test]
    fn removing_node_clears_indices_and_edges() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        graph.find_or_create_edge(b, a, EdgeFlags::empty()).unwrap();

        graph.remove_node(b).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.lookup(b"b").is_empty());
        assert!(graph.find_exact(b"b").is_none());
        assert!(graph.node(a).unwrap().outgoing().is_empty());
        assert!(graph.node(b).is_none(), "handle must be stale");
        assert_eq!(graph.node(a).unwrap().out_weight_sum, 0);
    }

    #[test]
    fn stale_endpoint_is_rejected_without_side_effects() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        graph.remove_node(b);
        let err = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap_err();
        assert!(matches!(err, GraphError::StaleHandle { .. }));
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.node(a).unwrap().outgoing().is_empty());
    }
}
