//! Byte trie over node payloads.
//!
//! Trie nodes live in one flat pool addressed by `u32` offsets. Each trie node
//! keeps its children as a byte-sorted vector and, if some payload ends there,
//! the list of graph nodes carrying that payload. The root terminal holds the
//! blank nodes (empty payload).

use crate::error::{GraphError, GraphResult};

use super::types::NodeId;

const ROOT: u32 = 0;

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: Vec<(u8, u32)>,
    terminals: Vec<NodeId>,
}

impl TrieNode {
    fn child(&self, byte: u8) -> Option<u32> {
        self.children
            .binary_search_by_key(&byte, |(b, _)| *b)
            .ok()
            .map(|i| self.children[i].1)
    }
}

#[derive(Debug, Clone)]
pub struct ByteTrie {
    pool: Vec<TrieNode>,
}

impl Default for ByteTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteTrie {
    pub fn new() -> Self {
        Self {
            pool: vec![TrieNode::default()],
        }
    }

    /// Number of trie nodes in the pool, root included.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    fn walk(&self, payload: &[u8]) -> Option<u32> {
        let mut at = ROOT;
        for &b in payload {
            at = self.pool[at as usize].child(b)?;
        }
        Some(at)
    }

    /// Candidates whose payload equals `payload` exactly. Never mutates.
    pub fn lookup(&self, payload: &[u8]) -> &[NodeId] {
        match self.walk(payload) {
            Some(at) => &self.pool[at as usize].terminals,
            None => &[],
        }
    }

    /// Reserve room for inserting `payload`: every missing trie node plus one
    /// terminal slot.
    pub fn reserve_for(&mut self, payload: &[u8]) -> GraphResult<()> {
        let mut at = ROOT;
        let mut missing = 0usize;
        for (depth, &b) in payload.iter().enumerate() {
            match self.pool[at as usize].child(b) {
                Some(next) => at = next,
                None => {
                    missing = payload.len() - depth;
                    self.pool[at as usize]
                        .children
                        .try_reserve(1)
                        .map_err(GraphError::capacity("trie"))?;
                    break;
                }
            }
        }
        if missing > 0 {
            self.pool
                .try_reserve(missing)
                .map_err(GraphError::capacity("trie"))?;
        } else {
            self.pool[at as usize]
                .terminals
                .try_reserve(1)
                .map_err(GraphError::capacity("trie"))?;
        }
        Ok(())
    }

    pub fn insert(&mut self, payload: &[u8], id: NodeId) {
        let mut at = ROOT;
        for &b in payload {
            at = match self.pool[at as usize].child(b) {
                Some(next) => next,
                None => {
                    let next = self.pool.len() as u32;
                    self.pool.push(TrieNode::default());
                    let children = &mut self.pool[at as usize].children;
                    let pos = children.partition_point(|(c, _)| *c < b);
                    children.insert(pos, (b, next));
                    next
                }
            };
        }
        let terminals = &mut self.pool[at as usize].terminals;
        if !terminals.contains(&id) {
            terminals.push(id);
        }
    }

    /// Remove `id` from the terminal list of `payload`. Trie nodes are kept;
    /// an emptied path costs nothing but pool space.
    pub fn remove(&mut self, payload: &[u8], id: NodeId) -> bool {
        let Some(at) = self.walk(payload) else {
            return false;
        };
        let terminals = &mut self.pool[at as usize].terminals;
        match terminals.iter().position(|n| *n == id) {
            Some(pos) => {
                terminals.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Every non-empty prefix of `input` that is some node's payload, shortest
    /// first, as `(prefix length, candidates)`.
    pub fn prefix_matches<'a>(&'a self, input: &'a [u8]) -> impl Iterator<Item = (usize, &'a [NodeId])> + 'a {
        let mut at = Some(ROOT);
        input.iter().enumerate().map_while(move |(i, &b)| {
            let next = self.pool[at? as usize].child(b)?;
            at = Some(next);
            Some((i + 1, self.pool[next as usize].terminals.as_slice()))
        })
        .filter(|(_, terminals)| !terminals.is_empty())
    }

    /// Longest non-empty prefix of `input` that is some node's payload.
    pub fn longest_match<'a>(&'a self, input: &'a [u8]) -> Option<(usize, &'a [NodeId])> {
        self.prefix_matches(input).last()
    }
}
