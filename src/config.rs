use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Location of the SQLite database file.
    pub db_path: PathBuf,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub auto_reindex: AutoReindexConfig,
    pub watcher: WatcherConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".tmp/rifflux/rifflux.db"),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            auto_reindex: AutoReindexConfig::default(),
            watcher: WatcherConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_chars: usize,
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
            min_chunk_chars: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Reciprocal rank fusion constant.
    pub rrf_k: u32,
    /// Each modality fetches `top_k * candidate_factor` candidates before
    /// fusion. Raising this helps small corpora at some cost per query.
    pub candidate_factor: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            candidate_factor: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `auto`, `onnx`, or `hash`.
    pub backend: String,
    pub model: String,
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            model: "BAAI/bge-small-en-v1.5".to_string(),
            dim: 384,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            include_globs: vec!["*.md".to_string()],
            exclude_globs: vec![
                "**/.git/**".to_string(),
                "**/.venv/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/__pycache__/**".to_string(),
                "**/.cache/**".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AutoReindexConfig {
    pub enabled: bool,
    pub paths: Vec<PathBuf>,
    pub min_interval_seconds: f64,
}

impl Default for AutoReindexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: vec![PathBuf::from(".")],
            min_interval_seconds: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub paths: Vec<PathBuf>,
    pub debounce_ms: u64,
    pub max_crash_restarts: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: Vec::new(),
            debounce_ms: 500,
            max_crash_restarts: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

/// Load and validate a TOML config file. A missing file yields the defaults;
/// a present-but-invalid file is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("failed to read config {}: {e}", path.display())))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::InvalidInput(format!("failed to parse config {}: {e}", path.display())))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_chars == 0 {
        return Err(Error::InvalidInput(
            "chunking.max_chunk_chars must be > 0".to_string(),
        ));
    }
    if config.chunking.min_chunk_chars > config.chunking.max_chunk_chars {
        return Err(Error::InvalidInput(
            "chunking.min_chunk_chars must not exceed max_chunk_chars".to_string(),
        ));
    }
    if config.retrieval.candidate_factor == 0 {
        return Err(Error::InvalidInput(
            "retrieval.candidate_factor must be >= 1".to_string(),
        ));
    }
    if config.embedding.dim == 0 {
        return Err(Error::InvalidInput("embedding.dim must be > 0".to_string()));
    }
    match config.embedding.backend.as_str() {
        "auto" | "onnx" | "hash" => {}
        other => {
            return Err(Error::InvalidInput(format!(
                "unknown embedding backend: '{other}'. Use auto, onnx, or hash."
            )))
        }
    }
    if config.watcher.enabled && config.watcher.paths.is_empty() {
        return Err(Error::InvalidInput(
            "watcher.paths must be set when the watcher is enabled".to_string(),
        ));
    }
    if config.watcher.debounce_ms == 0 {
        return Err(Error::InvalidInput(
            "watcher.debounce_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.rrf_k, 60);
        assert_eq!(config.embedding.dim, 384);
        assert_eq!(config.index.include_globs, vec!["*.md"]);
        assert!(!config.watcher.enabled);
    }

    #[test]
    fn parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/x.db"

            [embedding]
            backend = "hash"
            dim = 64

            [chunking]
            max_chunk_chars = 500
            min_chunk_chars = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.embedding.backend, "hash");
        assert_eq!(config.embedding.dim, 64);
        assert_eq!(config.chunking.max_chunk_chars, 500);
        // Untouched sections keep their defaults.
        assert_eq!(config.retrieval.rrf_k, 60);
        validate(&config).unwrap();
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = Config::default();
        config.embedding.backend = "gguf".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn watcher_without_paths_rejected() {
        let mut config = Config::default();
        config.watcher.enabled = true;
        assert!(validate(&config).is_err());
    }
}
