pub mod doctor;
pub mod inspect;
pub mod prompt;
pub mod stats;
pub mod train;

use anyhow::Result;
use mnemograph::config::MnemoConfig;
use mnemograph::engine::{Engine, EngineOptions};

/// Open the configured graph file with options taken from `config`.
pub fn open_engine(config: &MnemoConfig) -> Result<Engine> {
    let path = config.resolved_graph_path();
    Engine::open(&path, EngineOptions::from(config))
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
