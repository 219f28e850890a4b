//! Hierarchy compression.
//!
//! After each learning pass, strongly reinforced sequence edges are followed
//! forward into chains, and each chain becomes one node a level above its
//! highest child. Small hierarchies store a copy of their payload; large ones
//! keep only child references and rebuild the bytes on demand.

use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use crate::error::GraphResult;

use super::content_hash;
use super::stats::mean_variance;
use super::types::{EdgeFlags, EdgeId, Node, NodeId, Weight};
use super::Graph;

impl Graph {
    // ── Payload reconstruction ───────────────────────────────────────────────

    /// Concatenated child payloads of a reference-only hierarchy, memoized
    /// until the next structural removal.
    pub(crate) fn rebuilt_payload(&self, id: NodeId) -> Option<Rc<[u8]>> {
        let node = self.nodes.get(id)?;
        if let Some((epoch, bytes)) = &*node.rebuilt.borrow() {
            if *epoch == self.structure_epoch {
                return Some(Rc::clone(bytes));
            }
        }
        let mut out = Vec::with_capacity(node.payload_len);
        for child in &node.children {
            out.extend_from_slice(&self.payload(*child)?);
        }
        let bytes: Rc<[u8]> = out.into();
        *node.rebuilt.borrow_mut() = Some((self.structure_epoch, Rc::clone(&bytes)));
        Some(bytes)
    }

    /// Drop a node's memoized payload so the next read rebuilds it.
    pub fn invalidate_payload(&self, id: NodeId) {
        if let Some(node) = self.nodes.get(id) {
            node.rebuilt.borrow_mut().take();
        }
    }

    // ── Formation ────────────────────────────────────────────────────────────

    /// An edge qualifies for compression when it has been reinforced at least
    /// once past creation and is either strong against the whole graph or an
    /// outlier among its source's own outgoing weights.
    pub fn is_strong_edge(&self, id: EdgeId) -> bool {
        let Some(edge) = self.edge(id) else {
            return false;
        };
        if !edge.flags.is_sequential() {
            return false;
        }
        let w = edge.weight().as_f32();
        if w < 2.0 * Weight::NEUTRAL.as_f32() {
            return false;
        }
        if w >= 0.5 * self.stats.max_edge_weight {
            return true;
        }
        let siblings: Vec<f32> = self
            .sequential_out(edge.from)
            .map(|(_, e)| e.weight().as_f32())
            .collect();
        let (mean, var) = mean_variance(&siblings);
        siblings.len() > 1 && w > mean + var.sqrt()
    }

    /// Follow the strongest sequence edge from `to` onward. The walk stops
    /// when that edge is weak, when it leads back into the chain, or at
    /// `bound` nodes.
    fn walk_chain(&self, from: NodeId, to: NodeId, bound: usize) -> Vec<NodeId> {
        let mut chain = vec![from, to];
        let mut at = to;
        while chain.len() < bound {
            let mut strongest: Option<(EdgeId, NodeId, Weight)> = None;
            for (id, edge) in self.sequential_out(at) {
                if strongest.map_or(true, |(_, _, w)| edge.weight() > w) {
                    strongest = Some((id, edge.to, edge.weight()));
                }
            }
            match strongest {
                Some((id, next, _)) if !chain.contains(&next) && self.is_strong_edge(id) => {
                    chain.push(next);
                    at = next;
                }
                _ => break,
            }
        }
        chain
    }

    /// One compressor pass over the edges touched by the last learning pass.
    /// Returns the hierarchy nodes created.
    pub fn compress(&mut self, touched: &[EdgeId]) -> GraphResult<Vec<NodeId>> {
        let bound = self.stats.chain_bound();
        let mut claimed: HashSet<NodeId> = HashSet::new();
        let mut created = Vec::new();

        for &edge_id in touched {
            let Some(edge) = self.edge(edge_id) else { continue };
            let (from, to) = (edge.from, edge.to);
            if claimed.contains(&from) || !self.is_strong_edge(edge_id) {
                continue;
            }
            let chain = self.walk_chain(from, to, bound);
            if let Some(id) = self.create_hierarchy(&chain)? {
                claimed.extend(chain.iter().copied());
                created.push(id);
            }
        }
        Ok(created)
    }

    /// Fold `chain` into a single node. Returns `None` when the chain is too
    /// short or a hierarchy with the same payload already exists.
    pub fn create_hierarchy(&mut self, chain: &[NodeId]) -> GraphResult<Option<NodeId>> {
        if chain.len() < 2 {
            return Ok(None);
        }
        let mut payload = Vec::new();
        let mut level = 0;
        for &child in chain {
            let Some(bytes) = self.payload(child) else {
                return Ok(None);
            };
            payload.extend_from_slice(&bytes);
            level = level.max(self.node(child).map_or(0, |n| n.level));
        }
        if self
            .lookup(&payload)
            .iter()
            .any(|id| self.node(*id).is_some_and(|n| n.is_hierarchy()))
        {
            return Ok(None);
        }

        let stored = (payload.len() <= self.config().inline_payload_limit)
            .then(|| payload.clone().into_boxed_slice());
        let mut node = Node::new(self.next_key, content_hash(&payload), stored, payload.len());
        node.level = level + 1;
        node.children = chain.to_vec();
        if let Some(first) = self.node(chain[0]) {
            node.channel = first.channel;
            node.trace = first.trace;
        }
        let id = self.commit_node(node, &payload)?;

        for &child in chain {
            self.find_or_create_edge(id, child, EdgeFlags::STRUCTURAL | EdgeFlags::DESCENDING)?;
            self.find_or_create_edge(child, id, EdgeFlags::STRUCTURAL)?;
        }

        // The new node continues wherever its last child continued.
        let last = chain[chain.len() - 1];
        let successors: Vec<(NodeId, Weight)> = self
            .sequential_out(last)
            .map(|(_, e)| (e.to, e.weight()))
            .collect();
        for (next, weight) in successors {
            if next == id {
                continue;
            }
            let (edge, fresh) = self.find_or_create_edge(id, next, EdgeFlags::empty())?;
            if fresh {
                self.set_weight(edge, weight);
            }
        }

        debug!(
            %id,
            level = level + 1,
            children = chain.len(),
            len = payload.len(),
            "hierarchy formed"
        );
        Ok(Some(id))
    }
}
