mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mnemograph::config::MnemoConfig;

#[derive(Parser)]
#[command(name = "mnemograph", version, about = "Self-organizing byte-sequence graph")]
struct Cli {
    /// Graph file to use instead of the configured one
    #[arg(long, global = true)]
    graph: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Learn from a file
    Train {
        file: PathBuf,
        /// Treat every line as a separate chunk
        #[arg(long)]
        lines: bool,
    },
    /// Learn from a prompt and print what the graph continues it with
    Prompt {
        text: String,
        /// Rate the output: 0 (wrong) to 1 (right)
        #[arg(long)]
        feedback: Option<f32>,
    },
    /// Show graph statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one node record by key
    Inspect { key: u64 },
    /// Validate the graph file
    Doctor,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MnemoConfig::load()?;
    if let Some(path) = cli.graph {
        config.storage.graph_path = path.to_string_lossy().into_owned();
    }

    // Log to stderr so stdout stays clean for generated bytes.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Train { file, lines } => cli::train::train(&config, &file, lines)?,
        Command::Prompt { text, feedback } => cli::prompt::prompt(&config, &text, feedback)?,
        Command::Stats { json } => cli::stats::stats(&config, json)?,
        Command::Inspect { key } => cli::inspect::inspect(&config, key)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
