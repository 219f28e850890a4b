//! The decode predictor chain.
//!
//! Each predictor looks at the decode state and either names the edge to
//! follow next or passes. Decode asks them in priority order and takes the
//! first answer; when all pass, generation stops.

use crate::graph::context::SparseContext;
use crate::graph::stats::mean_variance;
use crate::graph::types::{EdgeFlags, EdgeId, NodeId};
use crate::graph::Graph;

/// What a predictor sees at one decode step.
pub struct DecodeState<'a> {
    pub graph: &'a Graph,
    pub current: NodeId,
    /// Input followed by everything emitted so far.
    pub processed: &'a [u8],
    /// Live sparse context: input pattern plus emitted nodes.
    pub context: &'a SparseContext,
    /// Channel generation is for (0 = any).
    pub channel: u8,
}

impl DecodeState<'_> {
    /// Whether `target` may be emitted on this state's channel.
    pub fn channel_allows(&self, target: NodeId) -> bool {
        let node_channel = self.graph.node(target).map_or(0, |n| n.channel);
        self.channel == 0 || node_channel == 0 || node_channel == self.channel
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub edge: EdgeId,
    pub score: f32,
    /// Share of the competing score mass this choice holds, in `(0, 1]`.
    pub confidence: f32,
}

pub trait Predictor {
    fn name(&self) -> &'static str;
    fn predict(&self, state: &DecodeState<'_>) -> Option<Prediction>;
}

/// The standard chain: hierarchy, then category, then plain edges.
pub fn default_chain() -> Vec<Box<dyn Predictor>> {
    vec![
        Box::new(HierarchyPredictor),
        Box::new(CategoryPredictor),
        Box::new(EdgePredictor),
    ]
}

// ── Hierarchy ────────────────────────────────────────────────────────────────

/// A hierarchy containing the current node, whose leading children already
/// appear at the end of the processed bytes, predicts its next child.
pub struct HierarchyPredictor;

impl Predictor for HierarchyPredictor {
    fn name(&self) -> &'static str {
        "hierarchy"
    }

    fn predict(&self, state: &DecodeState<'_>) -> Option<Prediction> {
        let graph = state.graph;
        let mut best: Option<(usize, Prediction)> = None;

        let parents = graph.out_edges(state.current).filter(|(_, e)| {
            e.flags.contains(EdgeFlags::STRUCTURAL) && !e.flags.contains(EdgeFlags::DESCENDING)
        });
        for (_, up) in parents {
            let Some(parent) = graph.node(up.to) else { continue };
            let children = &parent.children;
            // Number of children matched so far, the current node included.
            let Some(k) = children.iter().position(|c| *c == state.current).map(|i| i + 1) else {
                continue;
            };
            if k >= children.len() {
                continue;
            }
            let Some(payload) = graph.payload(up.to) else { continue };
            let matched: usize = children[..k]
                .iter()
                .filter_map(|c| graph.node(*c))
                .map(|n| n.payload_len)
                .sum();
            if !state.processed.ends_with(&payload[..matched]) {
                continue;
            }
            let next = children[k];
            if !state.channel_allows(next) {
                continue;
            }
            let Some(down) = graph.find_edge(up.to, next) else { continue };
            let weight = graph.edge(down).map_or(0.0, |e| e.weight().as_f32());
            let score = weight * k as f32 / children.len() as f32;
            if best.map_or(true, |(bk, b)| (k, score) > (bk, b.score)) {
                best = Some((
                    k,
                    Prediction {
                        edge: down,
                        score,
                        confidence: 1.0,
                    },
                ));
            }
        }
        best.map(|(_, p)| p)
    }
}

// ── Category ─────────────────────────────────────────────────────────────────

/// The current node's category predicts the member most strongly linked from
/// the live context, when one member clearly stands out.
pub struct CategoryPredictor;

impl Predictor for CategoryPredictor {
    fn name(&self) -> &'static str {
        "category"
    }

    fn predict(&self, state: &DecodeState<'_>) -> Option<Prediction> {
        let graph = state.graph;
        let blank = graph.category_of(state.current)?;
        let members: Vec<(EdgeId, NodeId, f32)> = graph
            .category_members(blank)
            .into_iter()
            .filter(|(_, m)| state.channel_allows(*m))
            .map(|(edge, member)| {
                let support: f32 = state
                    .context
                    .entries()
                    .iter()
                    .filter(|c| c.node != state.current)
                    .filter_map(|c| {
                        graph
                            .find_edge(c.node, member)
                            .and_then(|e| graph.edge(e))
                            .map(|e| c.strength * e.weight().as_f32())
                    })
                    .sum();
                (edge, member, support)
            })
            .collect();
        if members.len() < 2 {
            return None;
        }

        let scores: Vec<f32> = members.iter().map(|(_, _, s)| *s).collect();
        let (mean, var) = mean_variance(&scores);
        let total: f32 = scores.iter().sum();
        let (edge, _, best) = members
            .into_iter()
            .fold(None, |acc: Option<(EdgeId, NodeId, f32)>, m| match acc {
                Some(a) if a.2 >= m.2 => Some(a),
                _ => Some(m),
            })?;
        if best <= 0.0 || best <= mean + var.sqrt() {
            return None;
        }
        Some(Prediction {
            edge,
            score: best,
            confidence: best / total,
        })
    }
}

// ── Plain edges ──────────────────────────────────────────────────────────────

/// The current node's best outgoing sequence edge under `context_weight`.
pub struct EdgePredictor;

impl Predictor for EdgePredictor {
    fn name(&self) -> &'static str {
        "edge"
    }

    fn predict(&self, state: &DecodeState<'_>) -> Option<Prediction> {
        let scored: Vec<_> = state
            .graph
            .score_outgoing(state.current, state.context)
            .into_iter()
            .filter(|s| state.channel_allows(s.to))
            .collect();
        let total: f32 = scored.iter().map(|s| s.score).sum();
        let best = scored
            .iter()
            .rev()
            .max_by(|a, b| a.score.total_cmp(&b.score))?;
        if best.score <= 0.0 || total <= 0.0 {
            return None;
        }
        Some(Prediction {
            edge: best.edge,
            score: best.score,
            confidence: best.score / total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state<'a>(graph: &'a Graph, current: NodeId, processed: &'a [u8], ctx: &'a SparseContext) -> DecodeState<'a> {
        DecodeState {
            graph,
            current,
            processed,
            context: ctx,
            channel: 0,
        }
    }

    #[test]
    fn edge_predictor_picks_heaviest_edge() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let c = graph.create_node(b"c").unwrap();
        graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        let (ac, _) = graph.find_or_create_edge(a, c, EdgeFlags::empty()).unwrap();
        graph.reinforce(ac, 2.0);

        let ctx = SparseContext::new();
        let p = EdgePredictor.predict(&state(&graph, a, b"a", &ctx)).unwrap();
        assert_eq!(p.edge, ac);
        assert!((p.confidence - 0.75).abs() < 1e-6);
        assert!(EdgePredictor.predict(&state(&graph, c, b"ac", &ctx)).is_none());
    }

    #[test]
    fn hierarchy_predictor_continues_a_known_sequence() {
        let mut graph = Graph::default();
        let ids: Vec<NodeId> = b"abc".iter().map(|b| graph.create_node(&[*b]).unwrap()).collect();
        let h = graph.create_hierarchy(&ids).unwrap().unwrap();
        let ctx = SparseContext::new();

        let p = HierarchyPredictor
            .predict(&state(&graph, ids[1], b"xab", &ctx))
            .expect("two children matched");
        assert_eq!(p.edge, graph.find_edge(h, ids[2]).unwrap());

        let p = HierarchyPredictor
            .predict(&state(&graph, ids[0], b"xa", &ctx))
            .expect("first child matched");
        assert_eq!(p.edge, graph.find_edge(h, ids[1]).unwrap());
        // Processed bytes disagree with the hierarchy.
        assert!(HierarchyPredictor.predict(&state(&graph, ids[1], b"zb", &ctx)).is_none());
        // Fully matched: nothing left to predict.
        assert!(HierarchyPredictor.predict(&state(&graph, ids[2], b"abc", &ctx)).is_none());
    }

    #[test]
    fn channel_filter_hides_foreign_targets() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        graph.node_mut(b).unwrap().channel = 2;
        graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        let ctx = SparseContext::new();
        let mut s = state(&graph, a, b"a", &ctx);
        assert!(EdgePredictor.predict(&s).is_some());
        s.channel = 1;
        assert!(EdgePredictor.predict(&s).is_none());
        s.channel = 2;
        assert!(EdgePredictor.predict(&s).is_some());
    }

    #[test]
    fn two_child_hierarchy_predicts_its_second_child() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let h = graph.create_hierarchy(&[a, b]).unwrap().unwrap();
        let ctx = SparseContext::new();

        let p = HierarchyPredictor
            .predict(&state(&graph, a, b"a", &ctx))
            .expect("prediction from a");
        assert_eq!(p.edge, graph.find_edge(h, b).unwrap());
        assert!(HierarchyPredictor.predict(&state(&graph, b, b"ab", &ctx)).is_none());
    }
}
