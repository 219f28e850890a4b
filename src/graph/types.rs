//! Core record types: handles, weights, nodes, and edges.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use super::arena::ArenaHandle;
use super::context::ContextTag;

// ── Handles ──────────────────────────────────────────────────────────────────

/// Generational handle to a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Generational handle to an edge in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId {
    index: u32,
    generation: u32,
}

macro_rules! impl_handle {
    ($ty:ident, $kind:literal) => {
        impl ArenaHandle for $ty {
            const KIND: &'static str = $kind;

            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }
            fn index(self) -> u32 {
                self.index
            }
            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl $ty {
            /// 64-bit mix of index and generation, used as a probe-table key.
            pub fn mix(self) -> u64 {
                ((self.generation as u64) << 32) | self.index as u64
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}:{}", $kind, self.index, self.generation)
            }
        }
    };
}

impl_handle!(NodeId, "node");
impl_handle!(EdgeId, "edge");

// ── Weight ───────────────────────────────────────────────────────────────────

/// Fixed-point, saturating edge weight. `UNIT` raw steps make 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Weight(u16);

impl Weight {
    pub const UNIT: u16 = 256;
    /// Weight given to a freshly created edge.
    pub const NEUTRAL: Weight = Weight(Self::UNIT);
    pub const MAX: Weight = Weight(u16::MAX);
    /// Smallest non-zero weight; feedback never pushes an edge below this.
    pub const MIN: Weight = Weight(1);

    pub const fn from_raw(raw: u16) -> Self {
        Weight(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub fn as_f32(self) -> f32 {
        self.0 as f32 / Self::UNIT as f32
    }

    /// Convert from a real value, rounding and clamping into the representable range.
    pub fn from_f32(value: f32) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Weight(0);
        }
        let raw = (value * Self::UNIT as f32).round();
        if raw >= u16::MAX as f32 {
            Self::MAX
        } else {
            Weight(raw as u16)
        }
    }

    /// Add a real-valued increment, saturating at [`Weight::MAX`].
    pub fn saturating_add_f32(self, delta: f32) -> Self {
        let step = Weight::from_f32(delta).0;
        Weight(self.0.saturating_add(step))
    }
}

// ── Edge flags ───────────────────────────────────────────────────────────────

/// Bit flags carried on every edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EdgeFlags(u8);

impl EdgeFlags {
    /// Scheduled for removal by the eviction sweep.
    pub const MARKED: EdgeFlags = EdgeFlags(0b0001);
    /// Category membership (source→blank, blank→member), not sequence.
    pub const SIMILARITY: EdgeFlags = EdgeFlags(0b0010);
    /// Link between a hierarchy node and one of its children.
    pub const STRUCTURAL: EdgeFlags = EdgeFlags(0b0100);
    /// Direction of a structural link: set for parent→child.
    pub const DESCENDING: EdgeFlags = EdgeFlags(0b1000);

    pub const fn empty() -> Self {
        EdgeFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        EdgeFlags(bits & 0b1111)
    }

    pub const fn contains(self, other: EdgeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EdgeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EdgeFlags) {
        self.0 &= !other.0;
    }

    /// Sequence edges are the ones the generator may follow.
    pub const fn is_sequential(self) -> bool {
        self.0 & (Self::SIMILARITY.0 | Self::STRUCTURAL.0) == 0
    }
}

impl std::ops::BitOr for EdgeFlags {
    type Output = EdgeFlags;

    fn bitor(self, rhs: Self) -> Self {
        EdgeFlags(self.0 | rhs.0)
    }
}

// ── Context trace ────────────────────────────────────────────────────────────

pub const TRACE_LEN: usize = 4;

/// Rolling record of the last few bytes seen immediately before a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextTrace {
    bytes: [u8; TRACE_LEN],
    len: u8,
}

impl ContextTrace {
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut trace = ContextTrace::default();
        for &b in bytes.iter().rev().take(TRACE_LEN).rev() {
            trace.push(b);
        }
        trace
    }

    pub fn push(&mut self, byte: u8) {
        if (self.len as usize) < TRACE_LEN {
            self.bytes[self.len as usize] = byte;
            self.len += 1;
        } else {
            self.bytes.rotate_left(1);
            self.bytes[TRACE_LEN - 1] = byte;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ── Node ─────────────────────────────────────────────────────────────────────

/// A byte-sequence fragment. Identity is its payload's content hash; several
/// nodes may share a payload and are then told apart by context.
#[derive(Debug, Clone)]
pub struct Node {
    /// Persistent id, unique for the lifetime of the graph file.
    pub key: u64,
    /// Content hash of the logical payload.
    pub hash: u64,
    /// Stored payload. `None` for large hierarchies, whose payload is rebuilt
    /// from `children` on demand.
    pub(crate) payload: Option<Box<[u8]>>,
    /// Logical payload length, known even when the payload is not stored.
    pub payload_len: usize,
    /// Child references, in order. Empty for raw and blank nodes.
    pub children: Vec<NodeId>,
    /// 0 for raw nodes, `max(child levels) + 1` for hierarchies.
    pub level: u32,
    /// Input channel the node was first seen on (0 = unspecified).
    pub channel: u8,
    pub(crate) outgoing: Vec<EdgeId>,
    pub(crate) incoming: Vec<EdgeId>,
    /// Sum of outgoing weights, in raw weight units.
    pub(crate) out_weight_sum: u64,
    /// Sum of incoming weights, in raw weight units.
    pub(crate) in_weight_sum: u64,
    /// Number of times the node has been matched, learned, or emitted.
    pub usage: u32,
    /// Wave stamp of the last time the node took part in anything.
    pub last_seen: u32,
    /// Learned probability that a sequence ends at this node.
    pub stop_weight: f32,
    /// Last activation level the pipeline assigned.
    pub activation: f32,
    pub trace: ContextTrace,
    /// Number of hierarchies that list this node as a child.
    pub(crate) parent_count: u32,
    /// Memoized reconstruction: (structure epoch it was built at, bytes).
    pub(crate) rebuilt: RefCell<Option<(u64, Rc<[u8]>)>>,
}

impl Node {
    pub(crate) fn new(key: u64, hash: u64, payload: Option<Box<[u8]>>, payload_len: usize) -> Self {
        Self {
            key,
            hash,
            payload,
            payload_len,
            children: Vec::new(),
            level: 0,
            channel: 0,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            out_weight_sum: 0,
            in_weight_sum: 0,
            usage: 0,
            last_seen: 0,
            stop_weight: 0.0,
            activation: 0.0,
            trace: ContextTrace::default(),
            parent_count: 0,
            rebuilt: RefCell::new(None),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.payload_len == 0
    }

    pub fn is_hierarchy(&self) -> bool {
        self.level > 0
    }

    /// Stored payload, if this node keeps one inline.
    pub fn stored_payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn outgoing(&self) -> &[EdgeId] {
        &self.outgoing
    }

    pub fn incoming(&self) -> &[EdgeId] {
        &self.incoming
    }

    pub fn out_weight_sum(&self) -> f32 {
        self.out_weight_sum as f32 / Weight::UNIT as f32
    }

    pub fn in_weight_sum(&self) -> f32 {
        self.in_weight_sum as f32 / Weight::UNIT as f32
    }

    pub fn degree(&self) -> usize {
        self.outgoing.len() + self.incoming.len()
    }

    pub fn parent_count(&self) -> u32 {
        self.parent_count
    }

    /// Waves elapsed since the node was last touched.
    pub fn inactivity(&self, now: u32) -> u32 {
        now.saturating_sub(self.last_seen)
    }
}

// ── Edge ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub(crate) weight: Weight,
    /// Wave stamp of the last traversal or reinforcement.
    pub generation: u32,
    pub flags: EdgeFlags,
    pub tags: Vec<ContextTag>,
}

impl Edge {
    pub(crate) fn new(from: NodeId, to: NodeId, weight: Weight, flags: EdgeFlags, now: u32) -> Self {
        Self {
            from,
            to,
            weight,
            generation: now,
            flags,
            tags: Vec::new(),
        }
    }

    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn inactivity(&self, now: u32) -> u32 {
        now.saturating_sub(self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_saturates_at_max() {
        let w = Weight::from_raw(u16::MAX - 10);
        assert_eq!(w.saturating_add_f32(5.0), Weight::MAX);
        assert_eq!(Weight::from_f32(1e9), Weight::MAX);
        assert_eq!(Weight::from_f32(-3.0).raw(), 0);
        assert_eq!(Weight::from_f32(f32::NAN).raw(), 0);
    }

    #[test]
    fn neutral_weight_is_one() {
        assert!((Weight::NEUTRAL.as_f32() - 1.0).abs() < f32::EPSILON);
        assert_eq!(Weight::NEUTRAL.saturating_add_f32(1.0).raw(), 2 * Weight::UNIT);
    }

    #[test]
    fn trace_keeps_last_bytes() {
        let mut trace = ContextTrace::from_slice(b"hello world");
        assert_eq!(trace.as_slice(), b"orld");
        trace.push(b'!');
        assert_eq!(trace.as_slice(), b"rld!");
        assert_eq!(ContextTrace::from_slice(b"ab").as_slice(), b"ab");
    }

    #[test]
    fn flags_classify_sequence_edges() {
        let structural = EdgeFlags::STRUCTURAL | EdgeFlags::DESCENDING;
        assert!(!structural.is_sequential());
        assert!(structural.contains(EdgeFlags::DESCENDING));
        assert!(EdgeFlags::empty().is_sequential());
        assert!(!EdgeFlags::SIMILARITY.is_sequential());

        let mut marked = EdgeFlags::MARKED;
        assert!(marked.is_sequential());
        marked.remove(EdgeFlags::MARKED);
        assert_eq!(marked, EdgeFlags::empty());
    }
}
