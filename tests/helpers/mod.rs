#![allow(dead_code)]

use mnemograph::engine::{Engine, EngineOptions};
use mnemograph::graph::types::NodeId;
use mnemograph::graph::Graph;
use std::path::Path;

/// Options for tests: no autosave, generation only when asked for.
pub fn test_options() -> EngineOptions {
    EngineOptions {
        autosave: false,
        generate: false,
        ..EngineOptions::default()
    }
}

/// A fresh engine with no backing file.
pub fn test_engine() -> Engine {
    Engine::in_memory(test_options())
}

/// An engine backed by `path`, saving after every call.
pub fn file_engine(path: &Path) -> Engine {
    Engine::open(
        path,
        EngineOptions {
            autosave: true,
            ..test_options()
        },
    )
    .unwrap()
}

/// Learn `text` (without generating) `times` times.
pub fn train(engine: &mut Engine, text: &str, times: usize) {
    for _ in 0..times {
        engine.write_input(text.as_bytes());
        engine.process_with(false).unwrap();
    }
}

/// Learn from `text` and return what the engine generates for it.
pub fn prompt(engine: &mut Engine, text: &str) -> Vec<u8> {
    engine.clear_output();
    engine.write_input(text.as_bytes());
    engine.process_with(true).unwrap();
    engine.take_output()
}

/// The unique raw node carrying `payload`.
pub fn raw(graph: &Graph, payload: &[u8]) -> NodeId {
    graph
        .lookup(payload)
        .iter()
        .copied()
        .find(|id| !graph.node(*id).unwrap().is_hierarchy())
        .unwrap()
}
