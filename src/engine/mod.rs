//! The caller-facing engine: an input buffer, an output buffer, and the graph
//! they teach and query.
//!
//! A typical session writes bytes, calls [`Engine::process`], reads
//! [`Engine::output`], and optionally rates the result with
//! [`Engine::feedback`]. Every `process` call learns from the buffered input
//! before (optionally) generating from it.

pub mod feedback;
pub mod learn;
pub mod stats;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MnemoConfig;
use crate::graph::eviction::SweepResult;
use crate::graph::types::{EdgeId, NodeId};
use crate::graph::{Graph, GraphConfig};
use crate::pipeline::decode::StopReason;
use crate::pipeline::predictors::{default_chain, Predictor};
use crate::pipeline::{self, Generation};
use crate::storage;

use self::feedback::FeedbackResult;
use self::learn::LearnResult;

/// Slots examined by the sweep per learned unit.
const SWEEP_SLOTS_PER_UNIT: usize = 2;

/// Engine tunables, usually taken from [`MnemoConfig`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub graph: GraphConfig,
    /// Save after every `process` and `feedback` call when backed by a file.
    pub autosave: bool,
    /// Whether `process` generates output after learning.
    pub generate: bool,
    /// Smallest cycle-detection window decode will use.
    pub min_cycle_window: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&MnemoConfig::default())
    }
}

impl From<&MnemoConfig> for EngineOptions {
    fn from(config: &MnemoConfig) -> Self {
        Self {
            graph: GraphConfig {
                inline_payload_limit: config.learning.inline_payload_limit,
                max_context_nodes: config.learning.max_context_nodes,
            },
            autosave: config.storage.autosave,
            generate: config.generation.enabled,
            min_cycle_window: config.generation.min_cycle_window,
        }
    }
}

/// What one `process` call did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessResult {
    pub learned: LearnResult,
    pub swept: SweepResult,
    /// Bytes appended to the output buffer.
    pub output_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,
}

pub struct Engine {
    graph: Graph,
    path: Option<PathBuf>,
    options: EngineOptions,
    chain: Vec<Box<dyn Predictor>>,
    channel: u8,
    input: Vec<u8>,
    output: Vec<u8>,
    /// Edges followed by the most recent generation, for feedback.
    last_path: Vec<EdgeId>,
    last_final: Option<NodeId>,
}

impl Engine {
    /// Open the graph file at `path`, or start an empty graph if it does not
    /// exist yet. A corrupt file is reported and replaced by an empty graph.
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let path = path.as_ref();
        let graph = storage::load(path, options.graph.clone())
            .with_context(|| format!("failed to open graph at {}", path.display()))?;
        info!(
            path = %path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "graph opened"
        );
        let mut engine = Self::with_graph(graph, options);
        engine.path = Some(path.to_path_buf());
        Ok(engine)
    }

    /// An engine with no backing file; `save` is a no-op.
    pub fn in_memory(options: EngineOptions) -> Self {
        let graph = Graph::new(options.graph.clone());
        Self::with_graph(graph, options)
    }

    fn with_graph(graph: Graph, options: EngineOptions) -> Self {
        Self {
            graph,
            path: None,
            options,
            chain: default_chain(),
            channel: 0,
            input: Vec::new(),
            output: Vec::new(),
            last_path: Vec::new(),
            last_final: None,
        }
    }

    /// Replace the predictor chain decode consults.
    pub fn set_predictors(&mut self, chain: Vec<Box<dyn Predictor>>) {
        self.chain = chain;
    }

    /// Channel new nodes are tagged with and generation is restricted to.
    /// Zero means any.
    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn adaptation_count(&self) -> u64 {
        self.graph.adaptation_count()
    }

    // ── Buffers ──────────────────────────────────────────────────────────────

    pub fn write_input(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    pub fn pending_input(&self) -> &[u8] {
        &self.input
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    /// Edges followed by the last generation.
    pub fn last_path(&self) -> &[EdgeId] {
        &self.last_path
    }

    // ── Processing ───────────────────────────────────────────────────────────

    /// Learn from the buffered input, run an eviction sweep, and generate
    /// when `options.generate` is set. The input buffer is consumed.
    pub fn process(&mut self) -> Result<ProcessResult> {
        let generate = self.options.generate;
        self.process_with(generate)
    }

    /// As [`Engine::process`], choosing explicitly whether to generate.
    pub fn process_with(&mut self, generate: bool) -> Result<ProcessResult> {
        let input = std::mem::take(&mut self.input);
        let mut result = ProcessResult::default();
        if input.is_empty() {
            return Ok(result);
        }

        result.learned = learn::learn_chunk(&mut self.graph, &input, self.channel)
            .context("learning failed")?;
        let budget = result.learned.units.max(1) * SWEEP_SLOTS_PER_UNIT;
        result.swept = self.graph.sweep(budget);
        debug!(
            units = result.learned.units,
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "input learned"
        );

        if generate {
            if let Some(generation) = pipeline::generate(
                &self.graph,
                &input,
                &self.chain,
                self.options.min_cycle_window,
                self.channel,
            ) {
                result.output_len = generation.decoded.bytes.len();
                result.stop = generation.decoded.stop;
                self.absorb_generation(generation);
            }
        }

        self.autosave()?;
        Ok(result)
    }

    /// Apply a generation's side effects: emitted nodes are used, pattern
    /// nodes keep their activation, and the path is kept for feedback.
    fn absorb_generation(&mut self, generation: Generation) {
        let Generation {
            pattern, decoded, ..
        } = generation;
        for (id, activation) in pattern.iter() {
            if let Some(node) = self.graph.node_mut(id) {
                node.activation = activation;
            }
        }
        for &id in &decoded.nodes {
            self.graph.touch(id);
        }
        self.graph
            .stats
            .output_length
            .push(decoded.nodes.len() as f64);
        debug!(
            bytes = decoded.bytes.len(),
            stop = ?decoded.stop,
            "output generated"
        );
        self.output.extend_from_slice(&decoded.bytes);
        self.last_final = decoded.nodes.last().copied();
        self.last_path = decoded.path;
    }

    /// Rate the last generation: 0 is wrong, 1 is right, 0.5 is no opinion.
    pub fn feedback(&mut self, signal: f32) -> Result<FeedbackResult> {
        let result =
            feedback::apply_feedback(&mut self.graph, &self.last_path, self.last_final, signal);
        debug!(
            signal = result.signal,
            strengthened = result.edges_strengthened,
            weakened = result.edges_weakened,
            "feedback applied"
        );
        self.autosave()?;
        Ok(result)
    }

    /// Teach that `sequence[prefix_len..]` is the right continuation of
    /// `sequence[..prefix_len]`. Returns the number of edges strengthened.
    pub fn strengthen_continuation(&mut self, sequence: &[u8], prefix_len: usize) -> Result<usize> {
        let n = learn::strengthen_continuation(&mut self.graph, sequence, prefix_len, self.channel)
            .context("strengthening failed")?;
        self.autosave()?;
        Ok(n)
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Write the graph to its file. No-op for in-memory engines.
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => storage::save(&self.graph, path),
            None => Ok(()),
        }
    }

    fn autosave(&self) -> Result<()> {
        if self.options.autosave {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::in_memory(EngineOptions {
            autosave: false,
            ..EngineOptions::default()
        })
    }

    #[test]
    fn empty_process_is_a_no_op() {
        let mut e = engine();
        let r = e.process().unwrap();
        assert_eq!(r.learned.units, 0);
        assert_eq!(e.adaptation_count(), 0);
        assert!(e.output().is_empty());
    }

    #[test]
    fn process_consumes_input() {
        let mut e = engine();
        e.write_input(b"abc");
        assert_eq!(e.pending_input(), b"abc");
        e.process_with(false).unwrap();
        assert!(e.pending_input().is_empty());
        assert_eq!(e.node_count(), 3);
        assert_eq!(e.adaptation_count(), 1);
    }

    #[test]
    fn generation_fills_output_and_path() {
        let mut e = engine();
        e.write_input(b"abcd");
        e.process_with(false).unwrap();
        e.write_input(b"ab");
        let r = e.process_with(true).unwrap();
        assert_eq!(r.output_len, e.output().len());
        assert!(e.output().starts_with(b"c"));
        assert!(!e.last_path().is_empty());

        let out = e.take_output();
        assert!(!out.is_empty());
        assert!(e.output().is_empty());
    }

    #[test]
    fn feedback_without_generation_touches_nothing() {
        let mut e = engine();
        e.write_input(b"ab");
        e.process_with(false).unwrap();
        let r = e.feedback(0.0).unwrap();
        assert_eq!(r.edges_weakened, 0);
    }

    #[test]
    fn in_memory_save_is_a_no_op() {
        let e = engine();
        assert!(e.path().is_none());
        e.save().unwrap();
    }
}
