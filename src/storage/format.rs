//! Binary graph image.
//!
//! ```text
//! header      magic "MNGRAPH1", node count, edge count,
//!             node section offset, edge section offset, meta block
//! node index  (key u64, record offset u64) × node count
//! nodes       one record per node, children before parents
//! edges       one record per edge, endpoints by node key
//! ```
//!
//! All integers are little-endian. Variable-length fields (payloads, child
//! lists, tags) carry their length in front.

use std::io::{self, Read, Write};

use thiserror::Error;

pub const MAGIC: &[u8; 8] = b"MNGRAPH1";

/// Fixed part of the header, before the meta block.
const PREFIX_LEN: u64 = 8 + 8 * 4;
/// Running statistics persisted in the meta block.
pub const STAT_COUNT: usize = 4;
const META_LEN: u64 = 4 + 8 + 8 + (STAT_COUNT as u64) * 24 + 4;
pub const HEADER_LEN: u64 = PREFIX_LEN + META_LEN;
pub const INDEX_ENTRY_LEN: u64 = 16;

const NODE_INLINE: u8 = 0b01;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not a graph file (bad magic)")]
    BadMagic,

    #[error("truncated {section}")]
    Truncated { section: &'static str },

    #[error("{what} refers to missing node {key}")]
    DanglingReference { what: &'static str, key: u64 },

    #[error("node {key} payload does not match its content hash")]
    HashMismatch { key: u64 },

    #[error("section offset {offset} out of bounds")]
    BadOffset { offset: u64 },

    #[error("failed to rebuild graph")]
    Graph(#[from] crate::error::GraphError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn truncated(section: &'static str) -> impl Fn(io::Error) -> FormatError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated { section }
        } else {
            FormatError::Io(e)
        }
    }
}

// ── Primitive codec ──────────────────────────────────────────────────────────

struct Decoder<'a, R> {
    inner: &'a mut R,
    section: &'static str,
}

macro_rules! read_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            fn $name(&mut self) -> Result<$ty, FormatError> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                self.inner.read_exact(&mut buf).map_err(truncated(self.section))?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        )*
    };
}

impl<'a, R: Read> Decoder<'a, R> {
    fn new(inner: &'a mut R, section: &'static str) -> Self {
        Self { inner, section }
    }

    read_le!(u8: u8, u16: u16, u32: u32, u64: u64, f32: f32, f64: f64);

    /// Read exactly `len` bytes without trusting `len` for preallocation.
    fn bytes(&mut self, len: usize) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::new();
        self.inner
            .by_ref()
            .take(len as u64)
            .read_to_end(&mut out)
            .map_err(truncated(self.section))?;
        if out.len() != len {
            return Err(FormatError::Truncated {
                section: self.section,
            });
        }
        Ok(out)
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Graph-wide counters and statistics carried in the header.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Meta {
    pub wave: u32,
    pub adaptations: u64,
    pub next_key: u64,
    /// (count, mean, m2) per running statistic: out-degree, chunk length,
    /// output length, bloat.
    pub stats: [(u64, f64, f64); STAT_COUNT],
    pub max_edge_weight: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Header {
    pub node_count: u64,
    pub edge_count: u64,
    pub node_offset: u64,
    pub edge_offset: u64,
    pub meta: Meta,
}

impl Header {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(MAGIC)?;
        for v in [self.node_count, self.edge_count, self.node_offset, self.edge_offset] {
            w.write_all(&v.to_le_bytes())?;
        }
        let m = &self.meta;
        w.write_all(&m.wave.to_le_bytes())?;
        w.write_all(&m.adaptations.to_le_bytes())?;
        w.write_all(&m.next_key.to_le_bytes())?;
        for (count, mean, m2) in m.stats {
            w.write_all(&count.to_le_bytes())?;
            w.write_all(&mean.to_le_bytes())?;
            w.write_all(&m2.to_le_bytes())?;
        }
        w.write_all(&m.max_edge_weight.to_le_bytes())
    }

    pub fn read(r: &mut impl Read) -> Result<Self, FormatError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(truncated("header"))?;
        if &magic != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let mut d = Decoder::new(r, "header");
        let node_count = d.u64()?;
        let edge_count = d.u64()?;
        let node_offset = d.u64()?;
        let edge_offset = d.u64()?;
        let wave = d.u32()?;
        let adaptations = d.u64()?;
        let next_key = d.u64()?;
        let mut stats = [(0u64, 0f64, 0f64); STAT_COUNT];
        for s in &mut stats {
            *s = (d.u64()?, d.f64()?, d.f64()?);
        }
        let max_edge_weight = d.f32()?;

        let index_end = node_count
            .checked_mul(INDEX_ENTRY_LEN)
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or(FormatError::BadOffset { offset: node_offset })?;
        if node_offset != index_end {
            return Err(FormatError::BadOffset { offset: node_offset });
        }
        if edge_offset < node_offset {
            return Err(FormatError::BadOffset { offset: edge_offset });
        }
        Ok(Self {
            node_count,
            edge_count,
            node_offset,
            edge_offset,
            meta: Meta {
                wave,
                adaptations,
                next_key,
                stats,
                max_edge_weight,
            },
        })
    }
}

/// Read the node index that follows the header: (key, record offset) pairs.
pub fn read_index(r: &mut impl Read, header: &Header) -> Result<Vec<(u64, u64)>, FormatError> {
    let mut d = Decoder::new(r, "node index");
    let mut index = Vec::new();
    for _ in 0..header.node_count {
        let key = d.u64()?;
        let offset = d.u64()?;
        if offset < header.node_offset || offset >= header.edge_offset {
            return Err(FormatError::BadOffset { offset });
        }
        index.push((key, offset));
    }
    Ok(index)
}

// ── Node records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub key: u64,
    pub hash: u64,
    pub level: u32,
    pub channel: u8,
    /// Stored payload; `None` for hierarchies rebuilt from their children.
    pub payload: Option<Vec<u8>>,
    pub payload_len: u32,
    pub children: Vec<u64>,
    pub usage: u32,
    pub last_seen: u32,
    pub stop_weight: f32,
    pub activation: f32,
    pub trace: Vec<u8>,
}

impl NodeRecord {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.key.to_le_bytes())?;
        w.write_all(&self.hash.to_le_bytes())?;
        w.write_all(&self.level.to_le_bytes())?;
        w.write_all(&[self.channel])?;
        let flags = if self.payload.is_some() { NODE_INLINE } else { 0 };
        w.write_all(&[flags])?;
        w.write_all(&self.payload_len.to_le_bytes())?;
        if let Some(payload) = &self.payload {
            w.write_all(payload)?;
        }
        w.write_all(&(self.children.len() as u32).to_le_bytes())?;
        for child in &self.children {
            w.write_all(&child.to_le_bytes())?;
        }
        w.write_all(&self.usage.to_le_bytes())?;
        w.write_all(&self.last_seen.to_le_bytes())?;
        w.write_all(&self.stop_weight.to_le_bytes())?;
        w.write_all(&self.activation.to_le_bytes())?;
        w.write_all(&[self.trace.len() as u8])?;
        w.write_all(&self.trace)
    }

    pub fn read(r: &mut impl Read) -> Result<Self, FormatError> {
        let mut d = Decoder::new(r, "node record");
        let key = d.u64()?;
        let hash = d.u64()?;
        let level = d.u32()?;
        let channel = d.u8()?;
        let flags = d.u8()?;
        let payload_len = d.u32()?;
        let payload = if flags & NODE_INLINE != 0 {
            Some(d.bytes(payload_len as usize)?)
        } else {
            None
        };
        let child_count = d.u32()?;
        let mut children = Vec::new();
        for _ in 0..child_count {
            children.push(d.u64()?);
        }
        let usage = d.u32()?;
        let last_seen = d.u32()?;
        let stop_weight = d.f32()?;
        let activation = d.f32()?;
        let trace_len = d.u8()?;
        let trace = d.bytes(trace_len as usize)?;
        Ok(Self {
            key,
            hash,
            level,
            channel,
            payload,
            payload_len,
            children,
            usage,
            last_seen,
            stop_weight,
            activation,
            trace,
        })
    }
}

// ── Edge records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagEntryRecord {
    pub key: u64,
    pub strength: f32,
    pub channel: u8,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagRecord {
    pub contribution: f32,
    pub created: u32,
    pub last_used: u32,
    pub entries: Vec<TagEntryRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub from: u64,
    pub to: u64,
    pub weight: u16,
    pub generation: u32,
    pub flags: u8,
    pub tags: Vec<TagRecord>,
}

impl EdgeRecord {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.from.to_le_bytes())?;
        w.write_all(&self.to.to_le_bytes())?;
        w.write_all(&self.weight.to_le_bytes())?;
        w.write_all(&self.generation.to_le_bytes())?;
        w.write_all(&[self.flags])?;
        w.write_all(&(self.tags.len() as u16).to_le_bytes())?;
        for tag in &self.tags {
            w.write_all(&tag.contribution.to_le_bytes())?;
            w.write_all(&tag.created.to_le_bytes())?;
            w.write_all(&tag.last_used.to_le_bytes())?;
            w.write_all(&(tag.entries.len() as u16).to_le_bytes())?;
            for e in &tag.entries {
                w.write_all(&e.key.to_le_bytes())?;
                w.write_all(&e.strength.to_le_bytes())?;
                w.write_all(&[e.channel])?;
                w.write_all(&e.level.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Self, FormatError> {
        let mut d = Decoder::new(r, "edge record");
        let from = d.u64()?;
        let to = d.u64()?;
        let weight = d.u16()?;
        let generation = d.u32()?;
        let flags = d.u8()?;
        let tag_count = d.u16()?;
        let mut tags = Vec::new();
        for _ in 0..tag_count {
            let contribution = d.f32()?;
            let created = d.u32()?;
            let last_used = d.u32()?;
            let entry_count = d.u16()?;
            let mut entries = Vec::new();
            for _ in 0..entry_count {
                entries.push(TagEntryRecord {
                    key: d.u64()?,
                    strength: d.f32()?,
                    channel: d.u8()?,
                    level: d.u32()?,
                });
            }
            tags.push(TagRecord {
                contribution,
                created,
                last_used,
                entries,
            });
        }
        Ok(Self {
            from,
            to,
            weight,
            generation,
            flags,
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header() -> Header {
        Header {
            node_count: 2,
            edge_count: 1,
            node_offset: HEADER_LEN + 2 * INDEX_ENTRY_LEN,
            edge_offset: HEADER_LEN + 2 * INDEX_ENTRY_LEN + 100,
            meta: Meta {
                wave: 7,
                adaptations: 3,
                next_key: 9,
                stats: [(2, 1.5, 0.25); STAT_COUNT],
                max_edge_weight: 2.0,
            },
        }
    }

    #[test]
    fn header_has_fixed_length() {
        let mut buf = Vec::new();
        header().write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(&buf[..8], MAGIC);
        assert_eq!(Header::read(&mut Cursor::new(&buf)).unwrap(), header());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        header().write(&mut buf).unwrap();
        buf[0] = b'X';
        assert!(matches!(
            Header::read(&mut Cursor::new(&buf)),
            Err(FormatError::BadMagic)
        ));
    }

    #[test]
    fn truncated_header_is_reported() {
        let mut buf = Vec::new();
        header().write(&mut buf).unwrap();
        buf.truncate(20);
        assert!(matches!(
            Header::read(&mut Cursor::new(&buf)),
            Err(FormatError::Truncated { section: "header" })
        ));
    }

    #[test]
    fn inconsistent_offsets_are_rejected() {
        let mut h = header();
        h.node_offset += 1;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert!(matches!(
            Header::read(&mut Cursor::new(&buf)),
            Err(FormatError::BadOffset { .. })
        ));
    }

    #[test]
    fn node_record_without_payload_keeps_children() {
        let record = NodeRecord {
            key: 5,
            hash: 0xdead_beef,
            level: 2,
            channel: 1,
            payload: None,
            payload_len: 300,
            children: vec![1, 2, 3],
            usage: 4,
            last_seen: 6,
            stop_weight: 0.25,
            activation: 0.5,
            trace: b"xy".to_vec(),
        };
        let mut buf = Vec::new();
        record.write(&mut buf).unwrap();
        assert_eq!(NodeRecord::read(&mut Cursor::new(&buf)).unwrap(), record);
    }

    #[test]
    fn oversized_length_is_truncation_not_allocation() {
        let record = NodeRecord {
            key: 1,
            hash: 0,
            level: 0,
            channel: 0,
            payload: Some(b"abc".to_vec()),
            payload_len: 3,
            children: vec![],
            usage: 0,
            last_seen: 0,
            stop_weight: 0.0,
            activation: 0.0,
            trace: vec![],
        };
        let mut buf = Vec::new();
        record.write(&mut buf).unwrap();
        // payload_len sits after key, hash, level, channel, flags
        buf[22..26].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            NodeRecord::read(&mut Cursor::new(&buf)),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn edge_record_carries_tags() {
        let record = EdgeRecord {
            from: 1,
            to: 2,
            weight: 512,
            generation: 3,
            flags: 0,
            tags: vec![TagRecord {
                contribution: 1.5,
                created: 1,
                last_used: 3,
                entries: vec![TagEntryRecord {
                    key: 4,
                    strength: 0.5,
                    channel: 0,
                    level: 1,
                }],
            }],
        };
        let mut buf = Vec::new();
        record.write(&mut buf).unwrap();
        assert_eq!(EdgeRecord::read(&mut Cursor::new(&buf)).unwrap(), record);
    }
}
