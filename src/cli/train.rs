//! CLI `train` command: feed a file to the graph, chunk by chunk.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use mnemograph::config::MnemoConfig;

/// Learn from `file`, one chunk per line when `lines` is set, otherwise the
/// whole file as one chunk. Saves once at the end.
pub fn train(config: &MnemoConfig, file: &Path, lines: bool) -> Result<()> {
    let data = std::fs::read(file)
        .with_context(|| format!("failed to read training file {}", file.display()))?;

    let mut engine = super::open_engine(config)?;
    let before = (engine.node_count(), engine.edge_count());

    let chunks: Vec<&[u8]> = if lines {
        data.split(|b| *b == b'\n').filter(|l| !l.is_empty()).collect()
    } else {
        vec![data.as_slice()]
    };

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("##-"),
    );

    let mut hierarchies = 0;
    let mut evicted = 0;
    for chunk in &chunks {
        engine.write_input(chunk);
        let result = engine.process_with(false)?;
        hierarchies += result.learned.hierarchies_formed;
        evicted += result.swept.nodes_evicted;
        pb.inc(chunk.len() as u64 + u64::from(lines));
    }
    pb.finish_and_clear();

    engine.save().context("failed to save graph")?;

    println!("Trained on {} chunk(s) from {}", chunks.len(), file.display());
    println!(
        "  Nodes:        {} (+{})",
        engine.node_count(),
        engine.node_count().saturating_sub(before.0)
    );
    println!(
        "  Edges:        {} (+{})",
        engine.edge_count(),
        engine.edge_count().saturating_sub(before.1)
    );
    println!("  Hierarchies:  +{hierarchies}");
    println!("  Evicted:      {evicted}");
    println!("  Adaptations:  {}", engine.adaptation_count());
    Ok(())
}
