use anyhow::Result;

use mnemograph::config::MnemoConfig;
use mnemograph::engine::stats::graph_stats;
use mnemograph::engine::EngineOptions;
use mnemograph::storage;

/// Display graph statistics in the terminal, or as JSON.
pub fn stats(config: &MnemoConfig, json: bool) -> Result<()> {
    let path = config.resolved_graph_path();
    let graph = storage::load(&path, EngineOptions::from(config).graph)?;

    let response = graph_stats(&graph, Some(&path));
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("Graph Statistics");
    println!("{}", "=".repeat(40));
    println!("  Nodes:               {}", response.nodes);
    println!("  Edges:               {}", response.edges);
    println!("  Blank nodes:         {}", response.blank_nodes);
    println!();

    println!("By Level:");
    for (level, count) in &response.by_level {
        println!("  {:<12} {}", level, count);
    }
    println!();

    println!("By Edge Kind:");
    println!("  {:<12} {}", "sequence", response.sequential_edges);
    println!("  {:<12} {}", "structural", response.structural_edges);
    println!("  {:<12} {}", "category", response.category_edges);
    println!();

    println!("Context tags:          {}", response.context_tags);
    println!("Average out-degree:    {:.2}", response.average_out_degree);
    println!("Max edge weight:       {:.2}", response.max_edge_weight);
    println!("Adaptations:           {}", response.adaptation_count);
    println!("File size:             {}", super::format_bytes(response.file_size_bytes));

    if let Some(ref saved) = response.last_saved {
        println!("Last saved:            {saved}");
    }

    Ok(())
}
