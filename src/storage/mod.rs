//! Graph persistence: one flat binary image per graph.
//!
//! [`save`] writes the image to a sibling temporary file and renames it into
//! place. [`load`] rebuilds every index from the records; a file that cannot
//! be decoded yields an empty graph rather than an error.

pub mod format;
pub mod health;

pub use self::format::FormatError;
pub use self::health::{check_file_health, HealthReport};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::graph::context::{ContextEntry, ContextTag, SparseContext};
use crate::graph::stats::RunningStat;
use crate::graph::types::{ContextTrace, Edge, EdgeFlags, Node, NodeId, Weight};
use crate::graph::{content_hash, Graph, GraphConfig};

use self::format::{
    EdgeRecord, Header, Meta, NodeRecord, TagEntryRecord, TagRecord, HEADER_LEN, INDEX_ENTRY_LEN,
};

// ── Encoding ─────────────────────────────────────────────────────────────────

fn node_record(graph: &Graph, node: &Node) -> NodeRecord {
    NodeRecord {
        key: node.key,
        hash: node.hash,
        level: node.level,
        channel: node.channel,
        payload: node.stored_payload().map(<[u8]>::to_vec),
        payload_len: node.payload_len as u32,
        children: node
            .children
            .iter()
            .filter_map(|c| graph.node(*c))
            .map(|c| c.key)
            .collect(),
        usage: node.usage,
        last_seen: node.last_seen,
        stop_weight: node.stop_weight,
        activation: node.activation,
        trace: node.trace.as_slice().to_vec(),
    }
}

fn edge_record(graph: &Graph, edge: &Edge) -> Option<EdgeRecord> {
    let key = |id: NodeId| graph.node(id).map(|n| n.key);
    let tags = edge
        .tags
        .iter()
        .map(|t| TagRecord {
            contribution: t.contribution,
            created: t.created,
            last_used: t.last_used,
            // Entries for evicted nodes are dropped.
            entries: t
                .context
                .entries()
                .iter()
                .filter_map(|e| {
                    Some(TagEntryRecord {
                        key: key(e.node)?,
                        strength: e.strength,
                        channel: e.channel,
                        level: e.level,
                    })
                })
                .collect(),
        })
        .collect();
    Some(EdgeRecord {
        from: key(edge.from)?,
        to: key(edge.to)?,
        weight: edge.weight().raw(),
        generation: edge.generation,
        flags: edge.flags.bits(),
        tags,
    })
}

fn meta(graph: &Graph) -> Meta {
    let s = graph.stats();
    Meta {
        wave: graph.wave(),
        adaptations: graph.adaptation_count(),
        next_key: graph.next_key,
        stats: [
            s.out_degree.parts(),
            s.chunk_length.parts(),
            s.output_length.parts(),
            s.bloat.parts(),
        ],
        max_edge_weight: s.max_edge_weight,
    }
}

/// Serialize `graph` into `w`. Nodes are written children first so that a
/// loader can resolve child keys in one pass.
pub fn encode_graph(graph: &Graph, w: &mut impl Write) -> Result<(), FormatError> {
    let mut nodes: Vec<&Node> = graph.nodes().map(|(_, n)| n).collect();
    nodes.sort_by_key(|n| (n.level, n.key));

    let index_start = HEADER_LEN;
    let node_offset = index_start + nodes.len() as u64 * INDEX_ENTRY_LEN;

    let mut node_section = Vec::new();
    let mut index = Vec::with_capacity(nodes.len());
    for node in &nodes {
        index.push((node.key, node_offset + node_section.len() as u64));
        node_record(graph, node).write(&mut node_section)?;
    }

    let mut edge_section = Vec::new();
    let mut edge_count = 0u64;
    for (_, edge) in graph.edges() {
        if let Some(record) = edge_record(graph, edge) {
            record.write(&mut edge_section)?;
            edge_count += 1;
        }
    }

    let header = Header {
        node_count: nodes.len() as u64,
        edge_count,
        node_offset,
        edge_offset: node_offset + node_section.len() as u64,
        meta: meta(graph),
    };
    header.write(w)?;
    for (key, offset) in index {
        w.write_all(&key.to_le_bytes())?;
        w.write_all(&offset.to_le_bytes())?;
    }
    w.write_all(&node_section)?;
    w.write_all(&edge_section)?;
    Ok(())
}

// ── Decoding ─────────────────────────────────────────────────────────────────

fn insert_node(
    graph: &mut Graph,
    record: NodeRecord,
    keys: &HashMap<u64, NodeId>,
) -> Result<NodeId, FormatError> {
    let mut children = Vec::with_capacity(record.children.len());
    for key in &record.children {
        let id = keys.get(key).ok_or(FormatError::DanglingReference {
            what: "hierarchy",
            key: *key,
        })?;
        children.push(*id);
    }

    let logical = match &record.payload {
        Some(bytes) => bytes.clone(),
        None => {
            let mut bytes = Vec::with_capacity(record.payload_len as usize);
            for child in &children {
                if let Some(p) = graph.payload(*child) {
                    bytes.extend_from_slice(&p);
                }
            }
            bytes
        }
    };
    if logical.len() != record.payload_len as usize || content_hash(&logical) != record.hash {
        return Err(FormatError::HashMismatch { key: record.key });
    }

    let mut node = Node::new(
        record.key,
        record.hash,
        record.payload.map(Vec::into_boxed_slice),
        logical.len(),
    );
    node.level = record.level;
    node.channel = record.channel;
    node.children = children;
    let id = graph.commit_node(node, &logical)?;

    if let Some(n) = graph.node_mut(id) {
        n.usage = record.usage;
        n.last_seen = record.last_seen;
        n.stop_weight = record.stop_weight;
        n.activation = record.activation;
        n.trace = ContextTrace::from_slice(&record.trace);
    }
    Ok(id)
}

fn insert_edge(
    graph: &mut Graph,
    record: EdgeRecord,
    keys: &HashMap<u64, NodeId>,
) -> Result<(), FormatError> {
    let endpoint = |key: u64| {
        keys.get(&key)
            .copied()
            .ok_or(FormatError::DanglingReference { what: "edge", key })
    };
    let (from, to) = (endpoint(record.from)?, endpoint(record.to)?);
    let edge = Edge::new(
        from,
        to,
        Weight::from_raw(record.weight),
        EdgeFlags::from_bits(record.flags),
        record.generation,
    );
    let id = graph.commit_edge(edge)?;

    let tags: Vec<ContextTag> = record
        .tags
        .into_iter()
        .map(|t| ContextTag {
            context: SparseContext::from_entries(t.entries.into_iter().filter_map(|e| {
                Some(ContextEntry {
                    node: keys.get(&e.key).copied()?,
                    strength: e.strength,
                    channel: e.channel,
                    level: e.level,
                })
            })),
            contribution: t.contribution,
            created: t.created,
            last_used: t.last_used,
        })
        .collect();
    if let Some(edge) = graph.edge_mut(id) {
        edge.tags = tags;
    }
    Ok(())
}

/// Rebuild a graph from an image produced by [`encode_graph`].
pub fn decode_graph(bytes: &[u8], config: GraphConfig) -> Result<Graph, FormatError> {
    let mut cursor = Cursor::new(bytes);
    let header = Header::read(&mut cursor)?;
    let index = format::read_index(&mut cursor, &header)?;
    if header.edge_offset > bytes.len() as u64 {
        return Err(FormatError::BadOffset {
            offset: header.edge_offset,
        });
    }

    let mut graph = Graph::new(config);
    graph.wave = header.meta.wave;

    let mut keys: HashMap<u64, NodeId> = HashMap::with_capacity(index.len());
    for (key, offset) in index {
        cursor.set_position(offset);
        let record = NodeRecord::read(&mut cursor)?;
        if record.key != key {
            return Err(FormatError::BadOffset { offset });
        }
        let id = insert_node(&mut graph, record, &keys)?;
        keys.insert(key, id);
    }

    cursor.set_position(header.edge_offset);
    for _ in 0..header.edge_count {
        let record = EdgeRecord::read(&mut cursor)?;
        insert_edge(&mut graph, record, &keys)?;
    }

    // Restored last so that rebuilding edges does not count as new samples.
    let [out_degree, chunk_length, output_length, bloat] = header.meta.stats;
    let stats = &mut graph.stats;
    stats.out_degree = RunningStat::from_parts(out_degree.0, out_degree.1, out_degree.2);
    stats.chunk_length = RunningStat::from_parts(chunk_length.0, chunk_length.1, chunk_length.2);
    stats.output_length = RunningStat::from_parts(output_length.0, output_length.1, output_length.2);
    stats.bloat = RunningStat::from_parts(bloat.0, bloat.1, bloat.2);
    stats.max_edge_weight = header.meta.max_edge_weight;
    graph.adaptations = header.meta.adaptations;
    graph.next_key = graph.next_key.max(header.meta.next_key);
    Ok(graph)
}

// ── Files ────────────────────────────────────────────────────────────────────

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `graph` to `path`, replacing any previous image atomically.
pub fn save(graph: &Graph, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let tmp = temp_path(path);
    let file = File::create(&tmp)
        .with_context(|| format!("failed to create {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    encode_graph(graph, &mut writer).context("failed to encode graph")?;
    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("failed to flush graph file")?;
    file.sync_all().context("failed to sync graph file")?;
    drop(file);

    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move graph into place at {}", path.display()))?;
    debug!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "graph saved"
    );
    Ok(())
}

/// Load the graph at `path`. A missing file is a new, empty graph; so is a
/// file with a bad magic tag or a truncated or inconsistent body.
pub fn load(path: impl AsRef<Path>, config: GraphConfig) -> Result<Graph> {
    let path = path.as_ref();
    if !path.exists() {
        info!("no graph file at {}, starting empty", path.display());
        return Ok(Graph::new(config));
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read graph file {}", path.display()))?;
    match decode_graph(&bytes, config.clone()) {
        Ok(graph) => Ok(graph),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "graph file unreadable, starting empty");
            Ok(Graph::new(config))
        }
    }
}

// ── Partial loads ────────────────────────────────────────────────────────────

/// Random access to node records without loading the whole graph.
pub struct FileIndex {
    reader: BufReader<File>,
    header: Header,
    offsets: HashMap<u64, u64>,
    order: Vec<u64>,
}

impl FileIndex {
    /// Read only the header and the node index of the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open graph file {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let header = Header::read(&mut reader).context("failed to read header")?;
        let index = format::read_index(&mut reader, &header).context("failed to read node index")?;
        let order = index.iter().map(|(k, _)| *k).collect();
        Ok(Self {
            reader,
            header,
            offsets: index.into_iter().collect(),
            order,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node keys in file order (children before parents).
    pub fn keys(&self) -> &[u64] {
        &self.order
    }

    /// Read the record for `key`, or `None` if the file has no such node.
    pub fn read_node(&mut self, key: u64) -> Result<Option<NodeRecord>> {
        let Some(&offset) = self.offsets.get(&key) else {
            return Ok(None);
        };
        self.reader
            .seek(SeekFrom::Start(offset))
            .context("failed to seek to node record")?;
        let record = NodeRecord::read(&mut self.reader)
            .with_context(|| format!("failed to read node {key}"))?;
        Ok(Some(record))
    }

    /// Iterate the edge section from the start. Used by health checks.
    pub(crate) fn edge_reader(&mut self) -> Result<impl Read + '_> {
        self.reader
            .seek(SeekFrom::Start(self.header.edge_offset))
            .context("failed to seek to edge section")?;
        Ok(&mut self.reader)
    }
}
