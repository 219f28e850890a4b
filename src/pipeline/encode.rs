//! Encode: input bytes → units → initial activation pattern.

use crate::graph::types::NodeId;
use crate::graph::Graph;

use super::activation::ActivationPattern;

/// One matched unit of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub node: NodeId,
    pub start: usize,
    pub len: usize,
}

/// Among nodes sharing the matched payload, prefer the most abstract, then
/// the most used, then the oldest.
pub(crate) fn pick_candidate(graph: &Graph, candidates: &[NodeId]) -> Option<NodeId> {
    let mut best: Option<(NodeId, u32, u32)> = None;
    for &id in candidates {
        let Some(node) = graph.node(id) else { continue };
        let better = match best {
            None => true,
            Some((_, level, usage)) => (node.level, node.usage) > (level, usage),
        };
        if better {
            best = Some((id, node.level, node.usage));
        }
    }
    best.map(|(id, _, _)| id)
}

/// Greedy longest-match segmentation against existing payloads. Bytes no
/// node covers are skipped. Never mutates the graph.
pub fn segment(graph: &Graph, input: &[u8]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut at = 0;
    while at < input.len() {
        match graph
            .longest_match(&input[at..])
            .and_then(|(len, candidates)| pick_candidate(graph, candidates).map(|id| (len, id)))
        {
            Some((len, node)) => {
                segments.push(Segment {
                    node,
                    start: at,
                    len,
                });
                at += len;
            }
            None => at += 1,
        }
    }
    segments
}

/// Build the activation pattern for `units`: direct activation from recency
/// and position, then spreading along outgoing edges.
pub fn encode(graph: &Graph, units: &[NodeId]) -> ActivationPattern {
    let mut pattern = ActivationPattern::new();
    let n = units.len();
    if n == 0 {
        return pattern;
    }

    for (i, &id) in units.iter().enumerate() {
        let distance = (n - 1 - i) as f32;
        let recency = (-distance / n as f32).exp();
        let position = (i + 1) as f32 / n as f32;
        pattern.add(id, recency * position);
    }

    let hops = (graph.average_out_degree().round() as usize).clamp(1, 2);
    let mut frontier: Vec<(NodeId, f32)> = pattern.iter().collect();
    for hop in 0..hops {
        let peak = pattern.top(1).first().map_or(0.0, |(_, a)| *a);
        if peak <= 0.0 {
            break;
        }
        // Decay tracks how evenly spread the pattern already is, and halves
        // with every hop.
        let (mean, _) = pattern.spread();
        let decay = mean / peak / (2u32 << hop) as f32;

        let mut next = Vec::new();
        for (source, activation) in frontier {
            let Some(node) = graph.node(source) else { continue };
            let total = node.out_weight_sum();
            if total <= 0.0 {
                continue;
            }
            for (_, edge) in graph.out_edges(source) {
                let delta = activation * decay * edge.weight().as_f32() / total;
                if delta > f32::EPSILON {
                    pattern.add(edge.to, delta);
                    next.push((edge.to, delta));
                }
            }
        }
        frontier = next;
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::EdgeFlags;

    #[test]
    fn segment_prefers_longest_payload() {
        let mut graph = Graph::default();
        for b in b"helo " {
            graph.create_node(&[*b]).unwrap();
        }
        let hel = graph.create_node(b"hel").unwrap();
        let segs = segment(&graph, b"hello ");
        let nodes: Vec<NodeId> = segs.iter().map(|s| s.node).collect();
        assert_eq!(nodes[0], hel);
        assert_eq!(segs.len(), 4, "hel + l + o + space");
        assert_eq!(segs[1].start, 3);
    }

    #[test]
    fn segment_skips_unknown_bytes() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let segs = segment(&graph, b"xax");
        assert_eq!(segs, vec![Segment { node: a, start: 1, len: 1 }]);
        assert!(segment(&graph, b"").is_empty());
    }

    #[test]
    fn later_units_are_more_active() {
        let mut graph = Graph::default();
        let ids: Vec<NodeId> = b"abc".iter().map(|b| graph.create_node(&[*b]).unwrap()).collect();
        let pattern = encode(&graph, &ids);
        assert!(pattern.get(ids[2]) > pattern.get(ids[1]));
        assert!(pattern.get(ids[1]) > pattern.get(ids[0]));
    }

    #[test]
    fn activation_spreads_to_successors() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let c = graph.create_node(b"c").unwrap();
        graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        let pattern = encode(&graph, &[a]);
        assert!(pattern.get(b) > 0.0);
        assert_eq!(pattern.get(c), 0.0);
        assert!(pattern.get(b) < pattern.get(a));
    }
}
