use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::graph::types::EdgeFlags;
use crate::graph::Graph;

/// Summary of a graph, as printed by `mnemograph stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub nodes: u64,
    pub edges: u64,
    /// Node count per hierarchy level; level 0 holds raw and blank nodes.
    pub by_level: BTreeMap<u32, u64>,
    pub blank_nodes: u64,
    pub sequential_edges: u64,
    pub structural_edges: u64,
    pub category_edges: u64,
    pub context_tags: u64,
    pub average_out_degree: f32,
    pub max_edge_weight: f32,
    pub adaptation_count: u64,
    pub wave: u32,
    pub file_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<String>,
}

/// Compute graph statistics.
///
/// `graph_path` is used for file size and modification time; pass None for
/// in-memory graphs.
pub fn graph_stats(graph: &Graph, graph_path: Option<&Path>) -> StatsResponse {
    let mut by_level = BTreeMap::new();
    let mut blank_nodes = 0;
    for (_, node) in graph.nodes() {
        *by_level.entry(node.level).or_insert(0u64) += 1;
        if node.is_blank() {
            blank_nodes += 1;
        }
    }

    let (mut sequential, mut structural, mut category, mut tags) = (0, 0, 0, 0u64);
    for (_, edge) in graph.edges() {
        if edge.flags.contains(EdgeFlags::STRUCTURAL) {
            structural += 1;
        } else if edge.flags.contains(EdgeFlags::SIMILARITY) {
            category += 1;
        } else {
            sequential += 1;
        }
        tags += edge.tags.len() as u64;
    }

    let metadata = graph_path.and_then(|p| std::fs::metadata(p).ok());
    let file_size_bytes = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
    let last_saved = metadata
        .and_then(|m| m.modified().ok())
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

    StatsResponse {
        nodes: graph.node_count() as u64,
        edges: graph.edge_count() as u64,
        by_level,
        blank_nodes,
        sequential_edges: sequential,
        structural_edges: structural,
        category_edges: category,
        context_tags: tags,
        average_out_degree: graph.average_out_degree(),
        max_edge_weight: graph.stats().max_edge_weight,
        adaptation_count: graph.adaptation_count(),
        wave: graph.wave(),
        file_size_bytes,
        last_saved,
    }
}
