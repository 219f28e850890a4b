//! CLI `prompt` command: learn from a prompt and print the continuation.

use anyhow::Result;
use std::io::Write;

use mnemograph::config::MnemoConfig;

/// Process `text` with generation on and write the output bytes to stdout.
/// An optional `feedback` signal rates the output right away.
pub fn prompt(config: &MnemoConfig, text: &str, feedback: Option<f32>) -> Result<()> {
    let mut engine = super::open_engine(config)?;
    engine.write_input(text.as_bytes());
    let result = engine.process_with(true)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(engine.output())?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;

    if let Some(stop) = result.stop {
        tracing::info!(bytes = result.output_len, %stop, "generation finished");
    }

    if let Some(signal) = feedback {
        let applied = engine.feedback(signal)?;
        eprintln!(
            "feedback {:.2}: {} edge(s) strengthened, {} weakened",
            applied.signal, applied.edges_strengthened, applied.edges_weakened
        );
    }

    engine.save()?;
    Ok(())
}
