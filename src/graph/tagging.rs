//! Context tags on edges and context-sensitive edge scoring.

use crate::error::{GraphError, GraphResult};

use super::context::{ContextTag, SparseContext};
use super::stats::mean_variance;
use super::types::{EdgeId, NodeId};
use super::Graph;

/// Tags contributing less than this share of the edge's average are dropped
/// the next time the tag list would have to grow.
const PRUNE_FRACTION: f32 = 0.1;

/// Merge threshold used before an edge has two tags to compare.
const INITIAL_MERGE_THRESHOLD: f32 = 0.5;

/// An outgoing edge scored against a live context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredEdge {
    pub edge: EdgeId,
    pub to: NodeId,
    pub score: f32,
    /// Similarity of the best-matching tag, 0 when the edge has no tags.
    pub match_strength: f32,
}

/// Overlap level above which a new context counts as "the same" as an
/// existing tag: the mean plus one deviation of the overlaps between
/// neighbouring tags already on the edge.
fn merge_threshold(tags: &[ContextTag], graph: &Graph) -> f32 {
    if tags.len() < 2 {
        return INITIAL_MERGE_THRESHOLD;
    }
    let overlaps: Vec<f32> = tags
        .windows(2)
        .map(|pair| pair[0].context.similarity(&pair[1].context, graph))
        .collect();
    let (mean, var) = mean_variance(&overlaps);
    (mean + var.sqrt()).clamp(f32::EPSILON, 1.0)
}

fn prune_tags(tags: &mut Vec<ContextTag>) {
    if tags.is_empty() {
        return;
    }
    let average = tags.iter().map(|t| t.contribution).sum::<f32>() / tags.len() as f32;
    let floor = average * PRUNE_FRACTION;
    tags.retain(|t| t.contribution >= floor);
}

impl Graph {
    /// Record that `edge` fired in `context`, merging into the closest
    /// existing tag or appending a new one.
    pub fn add_context_tag(
        &mut self,
        edge: EdgeId,
        context: &SparseContext,
        contribution: f32,
    ) -> GraphResult<()> {
        self.prune_dead_tag_entries(edge);
        let existing = self.edges.try_get(edge)?;
        let best = existing
            .tags
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.context.similarity(context, self)))
            .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((i, s)),
            });
        let threshold = merge_threshold(&existing.tags, self);

        let mut captured = context.clone();
        captured.truncate_strongest(self.config().max_context_nodes);
        let wave = self.wave;
        let Some(target) = self.edges.get_mut(edge) else {
            return Ok(());
        };

        match best {
            Some((i, strength)) if strength >= threshold => {
                let tag = &mut target.tags[i];
                tag.context.absorb(&captured, strength * 0.5);
                tag.contribution += contribution * strength;
                tag.last_used = wave;
            }
            _ => {
                if target.tags.len() == target.tags.capacity() {
                    prune_tags(&mut target.tags);
                }
                target
                    .tags
                    .try_reserve(1)
                    .map_err(GraphError::capacity("context tags"))?;
                target.tags.push(ContextTag {
                    context: captured,
                    contribution,
                    created: wave,
                    last_used: wave,
                });
            }
        }
        Ok(())
    }

    /// Drop tag entries on `edge` whose node no longer exists, and tags left
    /// with no entries. Returns the number of entries dropped.
    pub(crate) fn prune_dead_tag_entries(&mut self, edge: EdgeId) -> usize {
        let Some(e) = self.edges.get(edge) else {
            return 0;
        };
        let dead: Vec<NodeId> = e
            .tags
            .iter()
            .flat_map(|t| t.context.entries().iter().map(|c| c.node))
            .filter(|n| self.nodes.get(*n).is_none())
            .collect();
        if dead.is_empty() {
            return 0;
        }
        if let Some(e) = self.edges.get_mut(edge) {
            for tag in &mut e.tags {
                tag.context.retain(|n| !dead.contains(&n));
            }
            e.tags.retain(|t| !t.context.is_empty());
        }
        dead.len()
    }

    /// Best-matching tag on `edge` for `context`: (similarity, tag).
    fn best_tag<'a>(&'a self, edge: EdgeId, context: &SparseContext) -> Option<(f32, &'a ContextTag)> {
        self.edge(edge)?
            .tags
            .iter()
            .map(|t| (t.context.similarity(context, self), t))
            .fold(None, |best, (s, t)| match best {
                Some((bs, _)) if bs >= s => best,
                _ => Some((s, t)),
            })
    }

    /// Score every outgoing sequence edge of `node` against `context`.
    ///
    /// Each score is the edge's base weight plus its best tag's contribution,
    /// amplified by the squared match strength, by how abstract the tag's
    /// context is, and by how ambiguous the choice between siblings is.
    pub fn score_outgoing(&self, node: NodeId, context: &SparseContext) -> Vec<ScoredEdge> {
        let level_span = self.max_level() as f32 + 1.0;
        let candidates: Vec<(EdgeId, NodeId, f32, Option<(f32, &ContextTag)>)> = self
            .sequential_out(node)
            .map(|(id, e)| (id, e.to, e.weight().as_f32(), self.best_tag(id, context)))
            .collect();

        let matches: Vec<f32> = candidates
            .iter()
            .map(|(_, _, _, tag)| tag.map_or(0.0, |(s, _)| s))
            .collect();
        let ambiguity = ambiguity_multiplier(&matches);

        candidates
            .into_iter()
            .map(|(edge, to, base, tag)| {
                let (match_strength, bonus) = match tag {
                    Some((s, t)) => {
                        let level_boost = 1.0 + t.context.mean_level() / level_span;
                        (s, t.contribution * s * s * level_boost * ambiguity)
                    }
                    None => (0.0, 0.0),
                };
                ScoredEdge {
                    edge,
                    to,
                    score: base + bonus,
                    match_strength,
                }
            })
            .collect()
    }

    /// Context-sensitive score of a single edge.
    pub fn context_weight(&self, edge: EdgeId, context: &SparseContext) -> f32 {
        let Some(e) = self.edge(edge) else {
            return 0.0;
        };
        if e.flags.is_sequential() {
            if let Some(scored) = self
                .score_outgoing(e.from, context)
                .into_iter()
                .find(|s| s.edge == edge)
            {
                return scored.score;
            }
        }
        let base = e.weight().as_f32();
        match self.best_tag(edge, context) {
            Some((s, t)) => base + t.contribution * s * s,
            None => base,
        }
    }
}

/// In `[1, 2]`: close to 2 when siblings match the context about equally well
/// (the context has to break the tie), close to 1 when one clearly dominates.
fn ambiguity_multiplier(matches: &[f32]) -> f32 {
    if matches.len() < 2 {
        return 1.0;
    }
    let (mean, var) = mean_variance(matches);
    if mean <= 0.0 {
        return 1.0;
    }
    1.0 + 1.0 / (1.0 + var / (mean * mean))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::arena::ArenaHandle;
    use crate::graph::context::ContextEntry;
    use crate::graph::types::EdgeFlags;

    fn ctx(graph: &Graph, ids: &[NodeId]) -> SparseContext {
        SparseContext::from_entries(ids.iter().filter_map(|id| graph.context_entry(*id, 1.0)))
    }

    #[test]
    fn similar_contexts_merge_into_one_tag() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let (e, _) = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        let c = ctx(&graph, &[a]);
        graph.add_context_tag(e, &c, 1.0).unwrap();
        graph.add_context_tag(e, &c, 1.0).unwrap();
        let tags = &graph.edge(e).unwrap().tags;
        assert_eq!(tags.len(), 1);
        assert!((tags[0].contribution - 2.0).abs() < 1e-6);
    }

    #[test]
    fn distinct_contexts_get_their_own_tags() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let x = graph.create_node(b"x").unwrap();
        let y = graph.create_node(b"y").unwrap();
        let (e, _) = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        graph.add_context_tag(e, &ctx(&graph, &[x]), 1.0).unwrap();
        graph.add_context_tag(e, &ctx(&graph, &[y]), 1.0).unwrap();
        assert_eq!(graph.edge(e).unwrap().tags.len(), 2);
    }

    #[test]
    fn matching_context_raises_score() {
        let mut graph = Graph::default();
        let src = graph.create_node(b"o").unwrap();
        let space = graph.create_node(b" ").unwrap();
        let r = graph.create_node(b"r").unwrap();
        let hell = graph.create_node(b"h").unwrap();
        let wor = graph.create_node(b"w").unwrap();
        let (to_space, _) = graph.find_or_create_edge(src, space, EdgeFlags::empty()).unwrap();
        let (to_r, _) = graph.find_or_create_edge(src, r, EdgeFlags::empty()).unwrap();
        graph.add_context_tag(to_space, &ctx(&graph, &[hell]), 1.0).unwrap();
        graph.add_context_tag(to_r, &ctx(&graph, &[wor]), 1.0).unwrap();

        let after_w = ctx(&graph, &[wor]);
        assert!(graph.context_weight(to_r, &after_w) > graph.context_weight(to_space, &after_w));
        let after_h = ctx(&graph, &[hell]);
        assert!(graph.context_weight(to_space, &after_h) > graph.context_weight(to_r, &after_h));
        // Without any context, only base weights count.
        let empty = SparseContext::new();
        assert_eq!(graph.context_weight(to_r, &empty), graph.context_weight(to_space, &empty));
    }

    #[test]
    fn weak_tags_are_pruned_when_list_is_full() {
        let mut tags: Vec<ContextTag> = (0..4)
            .map(|i| ContextTag {
                context: SparseContext::from_entries([ContextEntry {
                    node: NodeId::from_parts(i, 0),
                    strength: 1.0,
                    channel: 0,
                    level: 0,
                }]),
                contribution: if i == 0 { 0.001 } else { 10.0 },
                created: 0,
                last_used: 0,
            })
            .collect();
        prune_tags(&mut tags);
        assert_eq!(tags.len(), 3);
        assert!(tags.iter().all(|t| t.contribution >= 10.0));
    }

    #[test]
    fn ambiguity_is_bounded() {
        assert_eq!(ambiguity_multiplier(&[0.5]), 1.0);
        assert!((ambiguity_multiplier(&[0.5, 0.5]) - 2.0).abs() < 1e-6);
        let spread = ambiguity_multiplier(&[0.9, 0.01]);
        assert!(spread > 1.0 && spread < 2.0);
    }

    #[test]
    fn entries_for_removed_nodes_are_pruned() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let x = graph.create_node(b"x").unwrap();
        let y = graph.create_node(b"y").unwrap();
        let (e, _) = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        graph.add_context_tag(e, &ctx(&graph, &[x]), 1.0).unwrap();
        graph.add_context_tag(e, &ctx(&graph, &[x, y]), 1.0).unwrap();

        graph.remove_node(x).unwrap();
        let entries = |g: &Graph| -> usize {
            g.edge(e).unwrap().tags.iter().map(|t| t.context.len()).sum()
        };
        let before = entries(&graph);
        assert!(before > 0);

        let dropped = graph.prune_dead_tag_entries(e);
        assert!(dropped > 0);
        let tags = &graph.edge(e).unwrap().tags;
        assert!(tags.iter().all(|t| !t.context.contains(x)));
        assert!(tags.iter().all(|t| !t.context.is_empty()));
        assert_eq!(entries(&graph), before - dropped);
        assert_eq!(graph.prune_dead_tag_entries(e), 0);
    }

    #[test]
    fn sweep_prunes_tags_of_evicted_nodes() {
        let mut graph = Graph::default();
        let a = graph.create_node(b"a").unwrap();
        let b = graph.create_node(b"b").unwrap();
        let x = graph.create_node(b"x").unwrap();
        let (e, _) = graph.find_or_create_edge(a, b, EdgeFlags::empty()).unwrap();
        graph.add_context_tag(e, &ctx(&graph, &[x]), 1.0).unwrap();
        graph.remove_node(x).unwrap();

        let result = graph.sweep(16);
        assert_eq!(result.tag_entries_pruned, 1);
        assert!(graph.edge(e).unwrap().tags.is_empty());
    }
}
