//! Blank (category) nodes.
//!
//! When a node fans out to unusually many successors, the successors are
//! gathered under a blank node: `source → blank` and `blank → member` links
//! carry [`EdgeFlags::SIMILARITY`]. Blank nodes have an empty payload, so
//! several of them share the trie root and are told apart by context.

use crate::error::GraphResult;

use super::types::{EdgeFlags, EdgeId, NodeId, Weight};
use super::Graph;

impl Graph {
    /// The blank node serving as `source`'s category, if one exists.
    pub fn category_of(&self, source: NodeId) -> Option<NodeId> {
        self.out_edges(source)
            .filter(|(_, e)| e.flags.contains(EdgeFlags::SIMILARITY))
            .map(|(_, e)| e.to)
            .find(|to| self.node(*to).is_some_and(|n| n.is_blank()))
    }

    /// Members of a category, with the membership edge.
    pub fn category_members(&self, blank: NodeId) -> Vec<(EdgeId, NodeId)> {
        self.out_edges(blank)
            .filter(|(_, e)| e.flags.contains(EdgeFlags::SIMILARITY))
            .map(|(id, e)| (id, e.to))
            .collect()
    }

    /// Fold `source`'s successors into its category once its sequential
    /// fan-out reaches the statistics-derived threshold. Existing categories
    /// pick up new members. Returns the category node, if any.
    pub fn update_category(&mut self, source: NodeId) -> GraphResult<Option<NodeId>> {
        if self.sequential_degree(source) < self.stats.category_fanout() {
            return Ok(self.category_of(source));
        }
        let blank = match self.category_of(source) {
            Some(blank) => blank,
            None => {
                let blank = self.create_node(b"")?;
                let channel = self.node(source).map_or(0, |n| n.channel);
                if let Some(node) = self.node_mut(blank) {
                    node.channel = channel;
                }
                self.find_or_create_edge(source, blank, EdgeFlags::SIMILARITY)?;
                tracing::debug!(%source, %blank, "category formed");
                blank
            }
        };

        let members: Vec<(NodeId, Weight)> = self
            .sequential_out(source)
            .map(|(_, e)| (e.to, e.weight()))
            .collect();
        for (member, weight) in members {
            let (edge, fresh) = self.find_or_create_edge(blank, member, EdgeFlags::SIMILARITY)?;
            if fresh {
                self.set_weight(edge, weight);
            }
        }
        Ok(Some(blank))
    }
}
