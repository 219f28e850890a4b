//! Encode → Refine → Decode.
//!
//! The pipeline only reads the graph. The engine applies its side effects
//! (usage, activation levels, output statistics) afterwards.

pub mod activation;
pub mod decode;
pub mod encode;
pub mod predictors;
pub mod refine;

use crate::graph::types::NodeId;
use crate::graph::Graph;

use self::activation::ActivationPattern;
use self::decode::{DecodeLimits, Decoded};
use self::encode::Segment;
use self::predictors::Predictor;

/// Everything one generation pass produced.
#[derive(Debug, Clone)]
pub struct Generation {
    pub units: Vec<Segment>,
    pub pattern: ActivationPattern,
    pub decoded: Decoded,
}

/// Run the full pipeline on `input`. Returns `None` when no byte of the input
/// is known to the graph.
pub fn generate(
    graph: &Graph,
    input: &[u8],
    chain: &[Box<dyn Predictor>],
    min_window: usize,
    channel: u8,
) -> Option<Generation> {
    let units = encode::segment(graph, input);
    let last = units.last()?.node;
    let ids: Vec<NodeId> = units.iter().map(|s| s.node).collect();

    let mut pattern = encode::encode(graph, &ids);
    refine::refine(graph, &mut pattern, ids.len());

    let window = graph.stats().cycle_window(min_window.max(ids.len()));
    let decoded = decode::decode(
        graph,
        last,
        input,
        &pattern,
        chain,
        DecodeLimits::from_window(window),
        channel,
    );
    Some(Generation {
        units,
        pattern,
        decoded,
    })
}
