use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MnemoConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub learning: LearningConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub graph_path: String,
    pub autosave: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LearningConfig {
    /// Hierarchies up to this many bytes keep a copy of their payload.
    pub inline_payload_limit: usize,
    pub max_context_nodes: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub min_cycle_window: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let graph_path = default_mnemo_dir()
            .join("graph.mng")
            .to_string_lossy()
            .into_owned();
        Self {
            graph_path,
            autosave: true,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            inline_payload_limit: 64,
            max_context_nodes: 16,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_cycle_window: 8,
        }
    }
}

/// Returns `~/.mnemograph/`
pub fn default_mnemo_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnemograph")
}

/// Returns the default config file path: `~/.mnemograph/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemo_dir().join("config.toml")
}

impl MnemoConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemoConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMO_GRAPH, MNEMO_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMO_GRAPH") {
            self.storage.graph_path = val;
        }
        if let Ok(val) = std::env::var("MNEMO_LOG_LEVEL") {
            self.logging.log_level = val;
        }
    }

    /// Resolve the graph file path, expanding `~` if needed.
    pub fn resolved_graph_path(&self) -> PathBuf {
        expand_tilde(&self.storage.graph_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MnemoConfig::default();
        assert_eq!(config.logging.log_level, "info");
        assert!(config.storage.autosave);
        assert_eq!(config.learning.inline_payload_limit, 64);
        assert_eq!(config.generation.min_cycle_window, 8);
        assert!(config.storage.graph_path.ends_with("graph.mng"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[logging]
log_level = "debug"

[storage]
graph_path = "/tmp/test.mng"
autosave = false

[learning]
max_context_nodes = 32
"#;
        let config: MnemoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.storage.graph_path, "/tmp/test.mng");
        assert!(!config.storage.autosave);
        assert_eq!(config.learning.max_context_nodes, 32);
        // defaults still apply for unset fields
        assert_eq!(config.learning.inline_payload_limit, 64);
        assert!(config.generation.enabled);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MnemoConfig::default();
        std::env::set_var("MNEMO_GRAPH", "/tmp/override.mng");
        std::env::set_var("MNEMO_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.graph_path, "/tmp/override.mng");
        assert_eq!(config.logging.log_level, "trace");

        // Clean up
        std::env::remove_var("MNEMO_GRAPH");
        std::env::remove_var("MNEMO_LOG_LEVEL");
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/g.mng"), home.join("g.mng"));
        assert_eq!(expand_tilde("/abs/g.mng"), PathBuf::from("/abs/g.mng"));
    }
}
