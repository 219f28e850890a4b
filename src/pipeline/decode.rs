//! Decode: autoregressive emission from the last input unit.

use std::collections::VecDeque;

use serde::Serialize;

use crate::graph::context::SparseContext;
use crate::graph::types::{EdgeId, NodeId};
use crate::graph::Graph;

use super::activation::ActivationPattern;
use super::predictors::{DecodeState, Predictor};

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The current node has no outgoing edges at all.
    NoEdges,
    /// Every predictor passed.
    NoPrediction,
    /// The node's learned stop weight beat the best continuation.
    StopWeight,
    /// A short cycle repeated inside the recent-node window.
    Cycle,
    /// The step bound derived from the window was reached.
    StepLimit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEdges => "no_edges",
            Self::NoPrediction => "no_prediction",
            Self::StopWeight => "stop_weight",
            Self::Cycle => "cycle",
            Self::StepLimit => "step_limit",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds for one decode run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Recent-node window watched for cycles.
    pub window: usize,
    /// Hard bound on emitted units.
    pub max_steps: usize,
}

impl DecodeLimits {
    pub fn from_window(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            max_steps: window * 4,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Decoded {
    pub bytes: Vec<u8>,
    /// Every edge followed, in order.
    pub path: Vec<EdgeId>,
    /// Every node emitted, in order.
    pub nodes: Vec<NodeId>,
    pub stop: Option<StopReason>,
}

/// True when the tail of `recent` repeats with some period `p`: twice for
/// `p >= 2`, three times for `p == 1` (a doubled letter is not a loop).
fn repeats(recent: &VecDeque<NodeId>) -> bool {
    let n = recent.len();
    if n >= 3 && recent[n - 1] == recent[n - 2] && recent[n - 2] == recent[n - 3] {
        return true;
    }
    (2..=n / 2).any(|p| (0..p).all(|i| recent[n - 1 - i] == recent[n - 1 - i - p]))
}

/// Live context: the strongest pattern nodes plus emitted nodes, the most
/// recent emissions strongest.
fn live_context(
    graph: &Graph,
    base: &[(NodeId, f32)],
    emitted: &[NodeId],
    limit: usize,
) -> SparseContext {
    let mut ctx = SparseContext::with_capacity(base.len() + emitted.len());
    for &(id, activation) in base {
        if let Some(entry) = graph.context_entry(id, activation) {
            ctx.push(entry);
        }
    }
    for (age, &id) in emitted.iter().rev().enumerate() {
        if let Some(entry) = graph.context_entry(id, 1.0 / (1.0 + age as f32)) {
            ctx.push(entry);
        }
    }
    ctx.truncate_strongest(limit);
    ctx
}

/// Generate from `start` until a stop condition holds.
pub fn decode(
    graph: &Graph,
    start: NodeId,
    input: &[u8],
    pattern: &ActivationPattern,
    chain: &[Box<dyn Predictor>],
    limits: DecodeLimits,
    channel: u8,
) -> Decoded {
    let limit = graph.config().max_context_nodes;
    let base = pattern.top(limit);
    let mut processed = input.to_vec();
    let mut out = Decoded::default();
    let mut recent: VecDeque<NodeId> = VecDeque::with_capacity(limits.window + 1);
    recent.push_back(start);
    let mut current = start;

    let stop = loop {
        if out.nodes.len() >= limits.max_steps {
            break StopReason::StepLimit;
        }
        if graph.node(current).map_or(true, |n| n.outgoing().is_empty()) {
            break StopReason::NoEdges;
        }
        let context = live_context(graph, &base, &out.nodes, limit);
        let state = DecodeState {
            graph,
            current,
            processed: &processed,
            context: &context,
            channel,
        };
        let Some(prediction) = chain.iter().find_map(|p| {
            let hit = p.predict(&state);
            if let Some(h) = &hit {
                tracing::trace!(predictor = p.name(), score = h.score, "prediction");
            }
            hit
        }) else {
            break StopReason::NoPrediction;
        };

        let stop_weight = graph.node(current).map_or(0.0, |n| n.stop_weight);
        if stop_weight > prediction.confidence {
            break StopReason::StopWeight;
        }

        let Some(edge) = graph.edge(prediction.edge) else {
            break StopReason::NoPrediction;
        };
        let target = edge.to;
        if let Some(bytes) = graph.payload(target) {
            out.bytes.extend_from_slice(&bytes);
            processed.extend_from_slice(&bytes);
        }
        out.path.push(prediction.edge);
        out.nodes.push(target);

        recent.push_back(target);
        if recent.len() > limits.window {
            recent.pop_front();
        }
        current = target;
        if repeats(&recent) {
            break StopReason::Cycle;
        }
    };
    out.stop = Some(stop);
    out
}
