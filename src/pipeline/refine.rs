//! Refine: a few relaxation steps over the activation pattern.

use crate::graph::types::NodeId;
use crate::graph::Graph;

use super::activation::ActivationPattern;

/// Most relaxation steps refine will take.
const MAX_ITERATIONS: usize = 4;

/// Number of relaxation steps: one, plus one per e-fold the pattern grew
/// past the input during spreading.
pub fn iteration_count(pattern_len: usize, units: usize) -> usize {
    let growth = pattern_len as f32 / units.max(1) as f32;
    let extra = growth.ln().max(0.0).ceil() as usize;
    (1 + extra).min(MAX_ITERATIONS)
}

/// Activation mass per leading payload byte, normalized to sum to 1.
fn context_vector(graph: &Graph, pattern: &ActivationPattern) -> [f32; 256] {
    let mut vector = [0.0f32; 256];
    let mut total = 0.0;
    for (id, activation) in pattern.iter() {
        if let Some(first) = graph.payload(id).and_then(|p| p.first().copied()) {
            vector[first as usize] += activation;
            total += activation;
        }
    }
    if total > 0.0 {
        for v in &mut vector {
            *v /= total;
        }
    }
    vector
}

/// Relax `pattern` in place. Each node's next activation blends what it has,
/// what its active in-neighbours push into it, and how well its leading byte
/// fits the pattern's aggregate. Nothing outside the pattern is activated.
pub fn refine(graph: &Graph, pattern: &mut ActivationPattern, units: usize) {
    if pattern.is_empty() {
        return;
    }
    for _ in 0..iteration_count(pattern.len(), units) {
        let vector = context_vector(graph, pattern);
        let (mean, var) = pattern.spread();
        // A peaked pattern trusts itself; a flat one listens to its neighbours.
        let cv = if mean > 0.0 { var.sqrt() / mean } else { 0.0 };
        let retain = cv / (1.0 + cv);

        let updates: Vec<(NodeId, f32)> = pattern
            .iter()
            .map(|(id, current)| {
                let (push, density) = neighbour_push(graph, pattern, id);
                let fit = graph
                    .payload(id)
                    .and_then(|p| p.first().copied())
                    .map_or(0.0, |b| vector[b as usize]);
                let rest = 1.0 - retain;
                let next = retain * current + rest * density * push + rest * (1.0 - density) * fit;
                (id, next)
            })
            .collect();
        for (id, value) in updates {
            pattern.set(id, value);
        }
    }
}

/// Weighted activation flowing into `id` from active in-neighbours, and the
/// fraction of its in-neighbours that are active.
fn neighbour_push(graph: &Graph, pattern: &ActivationPattern, id: NodeId) -> (f32, f32) {
    let Some(node) = graph.node(id) else {
        return (0.0, 0.0);
    };
    let incoming = node.incoming();
    if incoming.is_empty() {
        return (0.0, 0.0);
    }
    let mut push = 0.0;
    let mut active = 0usize;
    for edge in incoming.iter().filter_map(|e| graph.edge(*e)) {
        let source_activation = pattern.get(edge.from);
        if source_activation <= 0.0 {
            continue;
        }
        active += 1;
        let total = graph.node(edge.from).map_or(0.0, |n| n.out_weight_sum());
        if total > 0.0 {
            push += source_activation * edge.weight().as_f32() / total;
        }
    }
    (push, active as f32 / incoming.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::EdgeFlags;
    use crate::pipeline::encode::encode;

    #[test]
    fn iteration_count_is_small_and_adaptive() {
        assert_eq!(iteration_count(3, 3), 1);
        assert_eq!(iteration_count(0, 0), 1);
        assert!(iteration_count(30, 3) > 1);
        assert_eq!(iteration_count(10_000, 1), MAX_ITERATIONS);
    }

    #[test]
    fn refine_keeps_pattern_membership() {
        let mut graph = Graph::default();
        let ids: Vec<NodeId> = b"abcd".iter().map(|b| graph.create_node(&[*b]).unwrap()).collect();
        for pair in ids.windows(2) {
            graph.find_or_create_edge(pair[0], pair[1], EdgeFlags::empty()).unwrap();
        }
        let mut pattern = encode(&graph, &ids[..2]);
        let before: Vec<NodeId> = pattern.iter().map(|(n, _)| n).collect();
        refine(&graph, &mut pattern, 2);
        let after: Vec<NodeId> = pattern.iter().map(|(n, _)| n).collect();
        assert_eq!(before, after);
        assert!(pattern.iter().all(|(_, a)| a.is_finite() && a >= 0.0));
        assert!(pattern.total() > 0.0);
    }
}
