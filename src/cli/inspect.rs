//! CLI `inspect` command: display one node record straight from the file.

use anyhow::{bail, Result};

use mnemograph::config::MnemoConfig;
use mnemograph::storage::FileIndex;

/// Inspect a single node by key without loading the graph.
pub fn inspect(config: &MnemoConfig, key: u64) -> Result<()> {
    let path = config.resolved_graph_path();
    let mut index = FileIndex::open(&path)?;

    let Some(record) = index.read_node(key)? else {
        bail!("no node with key {key} in {}", path.display());
    };

    println!("Node: {}", record.key);
    println!("{}", "=".repeat(50));
    println!("  Hash:           {:016x}", record.hash);
    println!("  Level:          {}", record.level);
    println!("  Channel:        {}", record.channel);
    println!("  Length:         {} bytes", record.payload_len);
    println!("  Usage:          {}", record.usage);
    println!("  Last seen:      wave {}", record.last_seen);
    println!("  Stop weight:    {:.3}", record.stop_weight);
    println!("  Activation:     {:.3}", record.activation);
    if !record.trace.is_empty() {
        println!("  Preceded by:    {:?}", String::from_utf8_lossy(&record.trace));
    }
    println!();
    match &record.payload {
        Some(bytes) => {
            println!("Payload:");
            println!("  {:?}", String::from_utf8_lossy(bytes));
        }
        None => println!("Payload:          (rebuilt from children)"),
    }

    if !record.children.is_empty() {
        println!();
        println!("Children:");
        for child in &record.children {
            match index.read_node(*child)? {
                Some(c) => {
                    let preview = c
                        .payload
                        .as_deref()
                        .map(|p| format!("{:?}", String::from_utf8_lossy(p)))
                        .unwrap_or_else(|| format!("({} bytes)", c.payload_len));
                    println!("  {} (level {}): {}", c.key, c.level, preview);
                }
                None => println!("  {child} (missing)"),
            }
        }
    }

    Ok(())
}
