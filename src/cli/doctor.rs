//! CLI `doctor` command: validate the graph file and print a health report.

use anyhow::{Context, Result};

use mnemograph::config::MnemoConfig;
use mnemograph::storage;

/// Run file diagnostics and print a health report.
pub fn doctor(config: &MnemoConfig) -> Result<()> {
    let path = config.resolved_graph_path();

    if !path.exists() {
        println!("Graph: not found at {}", path.display());
        println!("Run `mnemograph train <file>` to create one.");
        return Ok(());
    }

    let report = storage::check_file_health(&path).context("failed to run health check")?;

    println!("Mnemograph Health Report");
    println!("========================");
    println!();
    println!("Graph file:        {}", report.path.display());
    println!("File size:         {}", super::format_bytes(report.file_size));
    println!("Header:            {}", if report.header_ok { "OK" } else { "INVALID" });
    println!();
    println!("Records:");
    println!("  Nodes:           {}/{}", report.nodes_readable, report.node_count);
    println!("  Edges:           {}/{}", report.edges_readable, report.edge_count);
    println!("  Dangling refs:   {}", report.dangling_references);
    println!();
    if report.is_healthy() {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED");
        for problem in &report.problems {
            println!("  - {problem}");
        }
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.mng {}", path.display());
        println!("  2. Or move the file aside; the next run starts an empty graph.");
    }

    Ok(())
}
