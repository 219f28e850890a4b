//! Feedback: scale the edges of the last generated path.

use serde::Serialize;

use crate::graph::types::{EdgeId, NodeId, Weight};
use crate::graph::Graph;

/// Signal at which feedback changes nothing.
pub const NEUTRAL_SIGNAL: f32 = 0.5;

#[derive(Debug, Default, Clone, Serialize)]
pub struct FeedbackResult {
    /// The signal after clamping to `[0, 1]`.
    pub signal: f32,
    pub edges_strengthened: usize,
    pub edges_weakened: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_stop_weight: Option<f32>,
}

/// Adjustment for one edge relative to its siblings: the dominant edge of a
/// node moves least.
fn local_rate(graph: &Graph, edge: EdgeId) -> Option<(Weight, f32, f32)> {
    let e = graph.edge(edge)?;
    let source = graph.node(e.from)?;
    let siblings = source.outgoing().len().max(1) as f32;
    let local_mean = (source.out_weight_sum() / siblings).max(Weight::MIN.as_f32());
    let ratio = e.weight().as_f32() / local_mean;
    Some((e.weight(), local_mean, 1.0 / (1.0 + ratio)))
}

/// Apply `signal` to every distinct edge in `path` and to the stop weight of
/// `final_node`. A signal above one half strengthens; below one half weakens,
/// each weakened edge landing strictly below its old weight but never under
/// the floor set by its siblings of the same kind. Nothing outside the path changes.
pub fn apply_feedback(
    graph: &mut Graph,
    path: &[EdgeId],
    final_node: Option<NodeId>,
    signal: f32,
) -> FeedbackResult {
    let signal = if signal.is_nan() {
        NEUTRAL_SIGNAL
    } else {
        signal.clamp(0.0, 1.0)
    };
    let mut result = FeedbackResult {
        signal,
        ..FeedbackResult::default()
    };
    let strength = (signal - NEUTRAL_SIGNAL).abs() * 2.0;
    if strength == 0.0 {
        return result;
    }
    let positive = signal > NEUTRAL_SIGNAL;

    let mut seen: Vec<EdgeId> = Vec::with_capacity(path.len());
    for &edge in path {
        if seen.contains(&edge) {
            continue;
        }
        seen.push(edge);
        let Some((weight, local_mean, rate)) = local_rate(graph, edge) else {
            continue;
        };

        if positive {
            let delta = (local_mean * rate * strength).max(1.0 / Weight::UNIT as f32);
            graph.set_weight(edge, weight.saturating_add_f32(delta));
            result.edges_strengthened += 1;
        } else {
            let floor = graph.edge_floor(edge);
            if weight <= floor {
                continue;
            }
            let scaled = Weight::from_f32(weight.as_f32() * (1.0 - rate * strength));
            let lowered = scaled.min(Weight::from_raw(weight.raw() - 1)).max(floor);
            graph.set_weight(edge, lowered);
            result.edges_weakened += 1;
        }
    }

    if let Some(node) = final_node.and_then(|id| graph.node_mut(id)) {
        let target = if positive { 0.0 } else { 1.0 };
        node.stop_weight += (target - node.stop_weight) * strength * 0.5;
        result.final_stop_weight = Some(node.stop_weight);
    }
    result
}
