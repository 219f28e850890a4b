use serde::Serialize;
use tracing::{debug, info};

use super::types::{EdgeFlags, EdgeId, NodeId, Weight, TRACE_LEN};
use super::Graph;

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepResult {
    pub examined: usize,
    pub nodes_evicted: usize,
    pub edges_marked: usize,
    pub edges_removed: usize,
    pub tag_entries_pruned: usize,
}

/// The four normalized bloat factors of a node, each in `[0, 1]`, where
/// higher means "more useless" relative to the node's own neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BloatFactors {
    pub unused: f32,
    pub isolation: f32,
    pub dormancy: f32,
    pub context_empty: f32,
}

impl BloatFactors {
    pub fn score(&self) -> f32 {
        self.unused * self.isolation * self.dormancy * self.context_empty
    }

    /// Every factor past the midpoint at once.
    pub fn all_indicate_useless(&self) -> bool {
        self.unused > 0.5 && self.isolation > 0.5 && self.dormancy > 0.5 && self.context_empty > 0.5
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

impl Graph {
    /// Distinct neighbours of `id` over edges in either direction.
    fn neighbours(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let mut out: Vec<NodeId> = node
            .outgoing
            .iter()
            .filter_map(|e| self.edge(*e).map(|e| e.to))
            .chain(node.incoming.iter().filter_map(|e| self.edge(*e).map(|e| e.from)))
            .filter(|n| *n != id)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn bloat_factors(&self, id: NodeId) -> Option<BloatFactors> {
        let node = self.node(id)?;
        let now = self.wave;
        let neighbours = self.neighbours(id);

        let (mut usage, mut degree, mut idle) = (0.0f32, 0.0f32, 0.0f32);
        for n in neighbours.iter().filter_map(|n| self.node(*n)) {
            usage += n.usage as f32;
            degree += n.degree() as f32;
            idle += n.inactivity(now) as f32;
        }
        let count = neighbours.len().max(1) as f32;
        let (usage, degree, idle) = (usage / count, degree / count, idle / count);

        Some(BloatFactors {
            unused: 1.0 / (1.0 + node.usage as f32 / (usage + 1.0)),
            isolation: 1.0 / (1.0 + node.degree() as f32 / (degree + 1.0)),
            dormancy: {
                let own = node.inactivity(now) as f32;
                own / (own + idle + 1.0)
            },
            context_empty: 1.0 - node.trace.len() as f32 / TRACE_LEN as f32,
        })
    }

    /// Whether `id` is useless enough to evict. Nodes touched in the current
    /// wave and children of a live hierarchy are never evicted.
    pub fn should_evict(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if node.last_seen == self.wave || node.parent_count > 0 {
            return false;
        }
        match self.bloat_factors(id) {
            Some(f) => f.all_indicate_useless() && f.score() > self.stats.bloat_threshold(),
            None => false,
        }
    }

    /// Lower bound feedback may push an outgoing sequence edge of `source` to:
    /// half its weakest sibling, and never below [`Weight::MIN`].
    pub fn adaptive_floor(&self, source: NodeId) -> Weight {
        floor_of(self.sequential_out(source).map(|(_, e)| e.weight()))
    }

    /// Floor for one edge, taken over the siblings of the same kind: sequence
    /// edges against sequence edges, parent→child links against parent→child
    /// links, and so on.
    pub fn edge_floor(&self, id: EdgeId) -> Weight {
        let Some(edge) = self.edge(id) else {
            return Weight::MIN;
        };
        let kind = edge_kind(edge.flags);
        floor_of(
            self.out_edges(edge.from)
                .filter(|(_, e)| edge_kind(e.flags) == kind)
                .map(|(_, e)| e.weight()),
        )
    }

    /// A sequence edge is stale when it is its source's weakest, below half
    /// the sibling mean, and idle for more than twice the siblings' average.
    fn is_stale_edge(&self, id: EdgeId) -> bool {
        let Some(edge) = self.edge(id) else {
            return false;
        };
        if !edge.flags.is_sequential() {
            return false;
        }
        let now = self.wave;
        let siblings: Vec<(Weight, u32)> = self
            .sequential_out(edge.from)
            .map(|(_, e)| (e.weight(), e.inactivity(now)))
            .collect();
        if siblings.len() < 2 {
            return false;
        }
        let n = siblings.len() as f32;
        let mean_weight = siblings.iter().map(|(w, _)| w.as_f32()).sum::<f32>() / n;
        let mean_idle = siblings.iter().map(|(_, i)| *i as f32).sum::<f32>() / n;
        let weakest = siblings.iter().map(|(w, _)| *w).min().unwrap_or(Weight::MAX);
        edge.weight() <= weakest
            && edge.weight().as_f32() < 0.5 * mean_weight
            && edge.inactivity(now) as f32 > 2.0 * mean_idle
    }

    // ── Sweep ────────────────────────────────────────────────────────────────

    /// Examine up to `budget` arena slots from a rotating cursor. A stale edge
    /// is marked the first time the cursor finds it and removed the next time,
    /// if it is still stale. Tag entries for removed nodes are dropped from the
    /// examined edges. Never scans the whole graph in one call.
    pub fn sweep(&mut self, budget: usize) -> SweepResult {
        let mut result = SweepResult::default();
        let slots = self.nodes.slot_count();
        if slots == 0 || budget == 0 {
            return result;
        }

        let mut doomed_nodes = Vec::new();
        let mut doomed_edges = Vec::new();
        let mut marked = Vec::new();
        let mut reprieved = Vec::new();
        for _ in 0..budget.min(slots) {
            let cursor = self.sweep_cursor % slots;
            self.sweep_cursor = (cursor + 1) % slots;
            let Some(id) = self.nodes.handle_at(cursor) else {
                continue;
            };
            result.examined += 1;

            if let Some(factors) = self.bloat_factors(id) {
                self.stats.bloat.push(factors.score() as f64);
            }
            if self.should_evict(id) {
                doomed_nodes.push(id);
                continue;
            }
            let outgoing: Vec<EdgeId> = self.out_edges(id).map(|(e, _)| e).collect();
            for edge in outgoing {
                result.tag_entries_pruned += self.prune_dead_tag_entries(edge);
            }
            for (edge, e) in self.out_edges(id) {
                let was_marked = e.flags.contains(EdgeFlags::MARKED);
                match (was_marked, self.is_stale_edge(edge)) {
                    (true, true) => doomed_edges.push(edge),
                    (true, false) => reprieved.push(edge),
                    (false, true) => marked.push(edge),
                    (false, false) => {}
                }
            }
        }

        for &edge in &marked {
            if let Some(e) = self.edge_mut(edge) {
                e.flags.insert(EdgeFlags::MARKED);
            }
        }
        for &edge in &reprieved {
            if let Some(e) = self.edge_mut(edge) {
                e.flags.remove(EdgeFlags::MARKED);
            }
        }
        result.edges_marked = marked.len();

        for edge in doomed_edges {
            if self.remove_edge(edge).is_some() {
                result.edges_removed += 1;
            }
        }
        for id in doomed_nodes {
            if self.remove_node(id).is_some() {
                debug!(%id, "node evicted");
                result.nodes_evicted += 1;
            }
        }

        if result.nodes_evicted > 0 || result.edges_removed > 0 {
            info!(
                examined = result.examined,
                nodes = result.nodes_evicted,
                edges = result.edges_removed,
                "eviction sweep"
            );
        }
        result
    }
}

/// Edges compete for a floor only with siblings of the same kind.
fn edge_kind(flags: EdgeFlags) -> EdgeFlags {
    let mut kind = flags;
    kind.remove(EdgeFlags::MARKED);
    kind
}

fn floor_of(weights: impl Iterator<Item = Weight>) -> Weight {
    let weakest = weights.min().unwrap_or(Weight::NEUTRAL);
    Weight::from_raw(weakest.raw() / 2).max(Weight::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_nodes_are_never_evicted() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        assert_eq!(graph.node(a).unwrap().last_seen, graph.wave());
        assert!(!graph.should_evict(a));
    }

    #[test]
    fn hierarchy_children_are_protected() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        graph.create_hierarchy(&[a, b]).unwrap();
        for _ in 0..100 {
            graph.advance_wave();
        }
        assert!(!graph.should_evict(a));
        assert!(!graph.should_evict(b));
    }

    #[test]
    fn isolated_dormant_node_scores_as_bloat() {
        let mut graph = Graph::default();
        let lonely = graph.create_node(b"q").unwrap();
        for _ in 0..50 {
            graph.advance_wave();
        }
        let f = graph.bloat_factors(lonely).unwrap();
        assert!(f.all_indicate_useless(), "{f:?}");
        assert!(f.score() > 0.5);
    }

    #[test]
    fn busy_node_is_not_bloat() {
        let mut graph = Graph::default();
        let hub = graph.create_node(b"h").unwrap();
        for b in b'a'..=b'e' {
            let n = graph.create_node(&[b]).unwrap();
            graph.find_or_create_edge(hub, n, EdgeFlags::empty()).unwrap();
        }
        for _ in 0..10 {
            graph.touch(hub);
        }
        let f = graph.bloat_factors(hub).unwrap();
        assert!(!f.all_indicate_useless(), "{f:?}");
    }

    #[test]
    fn sweep_evicts_dormant_outlier() {
        let mut graph = Graph::default();
        let mut prev = graph.create_node(&[0]).unwrap();
        for i in 1..40u8 {
            let next = graph.create_node(&[i]).unwrap();
            let (e, _) = graph.find_or_create_edge(prev, next, EdgeFlags::empty()).unwrap();
            graph.reinforce(e, 1.0);
            prev = next;
        }
        let lonely = graph.create_node(b"lonely").unwrap();
        for _ in 0..30 {
            graph.advance_wave();
        }
        // Keep the population fresh while the lonely node goes dormant.
        let population: Vec<NodeId> = graph
            .nodes()
            .map(|(id, _)| id)
            .filter(|id| *id != lonely)
            .collect();
        for id in population {
            graph.touch(id);
        }

        let result = graph.sweep(1000);
        assert_eq!(result.examined, 41);
        assert_eq!(result.nodes_evicted, 1);
        assert!(graph.node(lonely).is_none(), "lonely node should be gone");
        assert!(graph.lookup(b"lonely").is_empty());
        assert_eq!(graph.node_count(), 40);
    }

    #[test]
    fn sweep_is_bounded_by_budget() {
        let mut graph = Graph::default();
        for i in 0..10u8 {
            graph.create_node(&[i]).unwrap();
        }
        assert_eq!(graph.sweep(3).examined, 3);
        assert_eq!(graph.sweep(3).examined, 3);
        assert_eq!(graph.sweep(0).examined, 0);
    }

    #[test]
    fn adaptive_floor_is_half_the_weakest_sibling() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let c = graph.create_node(b"c").unwrap();
        let (ab, _) = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        graph.find_or_create_edge(a, c, EdgeFlags::empty()).unwrap();
        graph.reinforce(ab, 3.0);
        assert_eq!(graph.adaptive_floor(a).raw(), Weight::UNIT / 2);
        // No outgoing edges: half the neutral weight.
        assert_eq!(graph.adaptive_floor(c).raw(), Weight::UNIT / 2);
    }

    fn graph_with_stale_edge() -> (Graph, NodeId, EdgeId) {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let mut strong = Vec::new();
        for payload in [b"b", b"d"] {
            let n = graph.create_node(payload).unwrap();
            strong.push(graph.find_or_create_edge(a, n, EdgeFlags::empty()).unwrap().0);
        }
        let c = graph.create_node(b"c").unwrap();
        let (ac, _) = graph.find_or_create_edge(a, c, EdgeFlags::empty()).unwrap();
        for _ in 0..10 {
            graph.advance_wave();
        }
        for e in strong {
            graph.reinforce(e, 5.0);
        }
        for id in graph.nodes().map(|(id, _)| id).collect::<Vec<_>>() {
            graph.touch(id);
        }
        (graph, a, ac)
    }

    #[test]
    fn stale_edge_is_marked_before_it_is_removed() {
        let (mut graph, _, ac) = graph_with_stale_edge();

        let first = graph.sweep(100);
        assert_eq!(first.edges_marked, 1);
        assert_eq!(first.edges_removed, 0);
        assert!(graph.edge(ac).unwrap().flags.contains(EdgeFlags::MARKED));

        let second = graph.sweep(100);
        assert_eq!(second.edges_removed, 1);
        assert!(graph.edge(ac).is_none());
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn reinforced_edge_loses_its_mark() {
        let (mut graph, _, ac) = graph_with_stale_edge();
        graph.sweep(100);
        graph.reinforce(ac, 1.0);
        assert!(!graph.edge(ac).unwrap().flags.contains(EdgeFlags::MARKED));

        let result = graph.sweep(100);
        assert_eq!(result.edges_removed, 0);
        assert!(graph.edge(ac).is_some());
    }

    #[test]
    fn edge_floor_compares_edges_of_the_same_kind() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let h = graph.create_hierarchy(&[a, b]).unwrap().unwrap();
        let c = graph.create_node(b"c").unwrap();
        let (hc, _) = graph.find_or_create_edge(h, c, EdgeFlags::empty()).unwrap();
        graph.reinforce(hc, 20.0);

        let down = graph.find_edge(h, a).unwrap();
        let down_weight = graph.edge(down).unwrap().weight();
        assert!(graph.adaptive_floor(h) >= down_weight);
        assert!(graph.edge_floor(down) < down_weight);
        assert_eq!(graph.edge_floor(hc), graph.adaptive_floor(h));
    }
}
