//! Configuration management for neograph

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the neograph service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Indexing pipeline configuration
    pub indexer: IndexerConfig,

    /// Embedding backend configuration
    pub embedding: EmbeddingConfig,

    /// Repository checkout configuration
    pub repos: ReposConfig,

    /// Similarity search configuration
    pub search: SearchConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            cors_enabled: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("neograph.db"),
            pool_size: 8,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact, full)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "full".to_string(),
        }
    }
}

/// Indexing pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Number of files processed concurrently
    pub concurrency: usize,

    /// Entities per embedding request
    pub embed_batch_size: usize,

    /// Files larger than this are reported as failures
    pub max_file_bytes: u64,

    /// Directory names pruned during discovery
    pub ignore_dirs: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            embed_batch_size: 32,
            max_file_bytes: 2 * 1024 * 1024,
            ignore_dirs: [
                ".git",
                "node_modules",
                "vendor",
                "__pycache__",
                ".venv",
                "venv",
                "dist",
                "build",
                "target",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of a text-embeddings-inference server; unset disables embedding
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
        }
    }
}

/// Repository checkout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReposConfig {
    /// Directory that receives git clones
    pub checkout_dir: PathBuf,
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            checkout_dir: PathBuf::from("./repos"),
        }
    }
}

/// Similarity search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,

    /// Results scoring below this are dropped
    pub min_score: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            min_score: None,
        }
    }
}

impl SearchConfig {
    /// Requested limit, or the default when absent or out of range
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(limit) if (1..=self.max_limit).contains(&limit) => limit,
            _ => self.default_limit,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// File (or defaults) with environment overrides applied
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `BACKEND_PORT`, `DATABASE_PATH`, `TEI_URL` and `REPOS_PATH`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(port) = lookup("BACKEND_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid BACKEND_PORT {:?}: {}", port, e))?;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = lookup("TEI_URL") {
            self.embedding.url = (!url.is_empty()).then_some(url);
        }
        if let Some(path) = lookup("REPOS_PATH") {
            self.repos.checkout_dir = PathBuf::from(path);
        }
        Ok(())
    }
}
