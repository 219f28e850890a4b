//! Sequential learning from one input chunk.

use serde::Serialize;

use crate::error::GraphResult;
use crate::graph::context::SparseContext;
use crate::graph::types::{ContextTrace, EdgeFlags, EdgeId, NodeId};
use crate::graph::Graph;
use crate::pipeline::encode::Segment;

#[derive(Debug, Default, Clone, Serialize)]
pub struct LearnResult {
    pub units: usize,
    pub nodes_created: usize,
    pub edges_created: usize,
    pub edges_reinforced: usize,
    pub hierarchies_formed: usize,
    pub categories: usize,
}

/// Context of the units before position `at`: nearest strongest, at most
/// `limit` entries.
fn preceding_context(graph: &Graph, units: &[Segment], at: usize, limit: usize) -> SparseContext {
    let start = at.saturating_sub(limit);
    SparseContext::from_entries(
        units[start..at]
            .iter()
            .rev()
            .enumerate()
            .filter_map(|(distance, s)| graph.context_entry(s.node, 1.0 / (1.0 + distance as f32))),
    )
}

/// Segment `input` greedily, creating raw nodes for bytes no payload covers.
/// Shared payloads are resolved against the units already matched.
pub(crate) fn absorb_units(
    graph: &mut Graph,
    input: &[u8],
    channel: u8,
) -> GraphResult<(Vec<Segment>, usize)> {
    let limit = graph.config().max_context_nodes;
    let before = graph.node_count();
    let mut units: Vec<Segment> = Vec::with_capacity(input.len());
    let mut at = 0;
    while at < input.len() {
        let len = graph.longest_match(&input[at..]).map_or(1, |(len, _)| len);
        let context = preceding_context(graph, &units, units.len(), limit);
        let existed = !graph.lookup(&input[at..at + len]).is_empty();
        let node = graph.find_or_create(&input[at..at + len], Some(&context))?;

        graph.touch(node);
        if let Some(n) = graph.node_mut(node) {
            if !existed {
                n.channel = channel;
            }
            n.trace = ContextTrace::from_slice(&input[..at]);
        }
        units.push(Segment { node, start: at, len });
        at += len;
    }
    Ok((units, graph.node_count() - before))
}

/// Nudge each unit's stop weight toward "the chunk ended here" (last unit)
/// or "it went on" (every other unit), as a running mean over its uses.
fn learn_stops(graph: &mut Graph, units: &[Segment]) {
    for (i, seg) in units.iter().enumerate() {
        let target = if i + 1 == units.len() { 1.0 } else { 0.0 };
        if let Some(node) = graph.node_mut(seg.node) {
            let n = node.usage.max(1) as f32;
            node.stop_weight += (target - node.stop_weight) / n;
        }
    }
}

/// Learn one chunk: create or reinforce the edge between every pair of
/// adjacent units, tag it with what came before, then run the compressor and
/// category passes over what changed.
pub fn learn_chunk(graph: &mut Graph, input: &[u8], channel: u8) -> GraphResult<LearnResult> {
    let mut result = LearnResult::default();
    if input.is_empty() {
        return Ok(result);
    }
    graph.advance_wave();

    let (units, created) = absorb_units(graph, input, channel)?;
    result.units = units.len();
    result.nodes_created = created;

    let limit = graph.config().max_context_nodes;
    let mut touched: Vec<EdgeId> = Vec::with_capacity(units.len());
    for i in 1..units.len() {
        let (from, to) = (units[i - 1].node, units[i].node);
        let (edge, fresh) = graph.find_or_create_edge(from, to, EdgeFlags::empty())?;
        if fresh {
            result.edges_created += 1;
        } else {
            graph.reinforce(edge, 1.0);
            result.edges_reinforced += 1;
        }
        let context = preceding_context(graph, &units, i - 1, limit);
        if !context.is_empty() {
            graph.add_context_tag(edge, &context, 1.0)?;
        }
        touched.push(edge);
    }
    learn_stops(graph, &units);
    graph.stats.chunk_length.push(units.len() as f64);

    let formed = graph.compress(&touched)?;
    result.hierarchies_formed = formed.len();

    let mut sources: Vec<NodeId> = units.iter().map(|s| s.node).collect();
    sources.sort();
    sources.dedup();
    for source in sources {
        if graph.update_category(source)?.is_some() {
            result.categories += 1;
        }
    }

    graph.adaptations += 1;
    Ok(result)
}

/// Reinforce the continuation `sequence[prefix_len..]` at double strength,
/// as when the caller knows the right answer. Returns the edges strengthened.
pub fn strengthen_continuation(
    graph: &mut Graph,
    sequence: &[u8],
    prefix_len: usize,
    channel: u8,
) -> GraphResult<usize> {
    if prefix_len >= sequence.len() {
        return Ok(0);
    }
    graph.advance_wave();
    let (units, _) = absorb_units(graph, sequence, channel)?;
    let limit = graph.config().max_context_nodes;
    let mut strengthened = 0;
    for i in 1..units.len() {
        // Only edges leaving a unit of the continuation itself.
        if units[i - 1].start < prefix_len {
            continue;
        }
        let (from, to) = (units[i - 1].node, units[i].node);
        let (edge, _) = graph.find_or_create_edge(from, to, EdgeFlags::empty())?;
        graph.reinforce(edge, 2.0);
        let context = preceding_context(graph, &units, i - 1, limit);
        if !context.is_empty() {
            graph.add_context_tag(edge, &context, 2.0)?;
        }
        strengthened += 1;
    }
    Ok(strengthened)
}
