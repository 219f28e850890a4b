//! A self-organizing graph that learns byte sequences and continues them.
//!
//! Mnemograph stores byte fragments as nodes and observed successions as
//! weighted edges. Repeated successions are compressed into hierarchy nodes,
//! frequent fan-outs grow category nodes, and rarely useful structure is
//! evicted. Generation runs an encode → refine → decode pipeline over the
//! graph, and caller feedback reshapes the edges it followed.
//!
//! | Node kind | Payload | Level |
//! |-----------|---------|-------|
//! | **Raw** | one or more input bytes | 0 |
//! | **Hierarchy** | concatenation of its children | max(child levels) + 1 |
//! | **Blank** | empty; groups the successors of one node | 0 |
//!
//! # Architecture
//!
//! - **Storage**: generational arenas with a content hash table, a byte trie,
//!   a pair index and a per-level index, all updated in the same step
//! - **Learning**: Hebbian reinforcement of adjacent units, context tags on
//!   edges, thresholds derived from running statistics of the graph itself
//! - **Generation**: an ordered chain of predictors (hierarchy, category,
//!   edge) with statistics-bounded cycle detection
//! - **Persistence**: a flat little-endian image, saved atomically
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`engine`]: Caller API: input and output buffers, learning, feedback
//! - [`error`]: Errors raised by structural graph operations
//! - [`graph`]: The node/edge store and its indices, compression, eviction
//! - [`pipeline`]: Encode, refine and decode
//! - [`storage`]: Binary file format, partial loads and health checks

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod storage;
