//! TOML configuration parsing and validation.
//!
//! Every section is optional; an empty file yields a working setup that
//! uses the local fastembed model with a SQLite collection under `./data`.
//!
//! ```toml
//! [embedding]
//! provider = "local"            # local | openai | ollama | hash
//! model = "all-MiniLM-L6-v2"
//!
//! [chunking]
//! overlap_tokens = 20           # max_tokens defaults to the model's budget
//!
//! [store]
//! backend = "sqlite"            # memory | flat | sqlite | pinecone
//! dir = "./data"
//!
//! [watch]
//! workers = 4
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use vecsync_core::chunk::{token_budget_for_model, DEFAULT_OVERLAP_TOKENS};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Configured model name, or the provider's default.
    pub fn model_name(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "openai" => "text-embedding-3-small".to_string(),
            "ollama" => "nomic-embed-text".to_string(),
            "hash" => "feature-hash".to_string(),
            _ => "all-MiniLM-L6-v2".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token budget per chunk. Defaults to the embedding model's budget.
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_overlap() -> usize {
    DEFAULT_OVERLAP_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub pinecone: PineconeConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dir: default_data_dir(),
            pinecone: PineconeConfig::default(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PineconeConfig {
    #[serde(default = "default_cloud")]
    pub cloud: String,
    /// Serverless region. Falls back to the `PINECONE_ENV` environment variable.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_control_url")]
    pub control_url: String,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            cloud: default_cloud(),
            region: None,
            metric: default_metric(),
            control_url: default_control_url(),
        }
    }
}

fn default_cloud() -> String {
    "aws".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_control_url() -> String {
    "https://api.pinecone.io".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LedgerConfig {
    /// Directory for the ledger snapshot. Defaults to `store.dir`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_load_attempts")]
    pub load_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            load_attempts: default_load_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_load_attempts() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_call_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub recursive: bool,
    /// When non-empty, only matching file names/relative paths are ingested.
    #[serde(default)]
    pub include_globs: Vec<String>,
    /// Extra ignore patterns, added to the housekeeping defaults.
    #[serde(default)]
    pub ignore_globs: Vec<String>,
    #[serde(default = "default_open_attempts")]
    pub open_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub open_retry_delay_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            recursive: false,
            include_globs: Vec::new(),
            ignore_globs: Vec::new(),
            open_attempts: default_open_attempts(),
            open_retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_open_attempts() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Token budget per chunk: explicit setting or the model's budget.
    pub fn max_tokens(&self) -> usize {
        self.chunking
            .max_tokens
            .unwrap_or_else(|| token_budget_for_model(&self.embedding.model_name()))
    }

    pub fn ledger_dir(&self) -> &Path {
        self.ledger.dir.as_deref().unwrap_or(&self.store.dir)
    }
}

/// Read and validate a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("[config] {} not found, using defaults", path.display());
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate config from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == Some(0) {
        bail!("chunking.max_tokens must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hash.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.dims.unwrap_or(0) == 0
    {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.store.backend.as_str() {
        "memory" | "flat" | "sqlite" | "pinecone" => {}
        other => bail!(
            "Unknown store backend: '{}'. Must be memory, flat, sqlite, or pinecone.",
            other
        ),
    }

    if config.pipeline.load_attempts == 0 {
        bail!("pipeline.load_attempts must be >= 1");
    }
    if config.pipeline.call_timeout_secs == 0 {
        bail!("pipeline.call_timeout_secs must be >= 1");
    }
    if config.watch.workers == 0 {
        bail!("watch.workers must be >= 1");
    }
    if config.watch.open_attempts == 0 {
        bail!("watch.open_attempts must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.store.backend, "sqlite");
        assert_eq!(config.chunking.overlap_tokens, 20);
        assert_eq!(config.pipeline.load_attempts, 5);
        assert_eq!(config.pipeline.retry_delay_ms, 1000);
        assert_eq!(config.max_tokens(), 384);
        assert_eq!(config.ledger_dir(), Path::new("./data"));
    }

    #[test]
    fn test_explicit_max_tokens_wins() {
        let config = parse_config("[chunking]\nmax_tokens = 100\n").unwrap();
        assert_eq!(config.max_tokens(), 100);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = parse_config("[store]\nbackend = \"redis\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown store backend"));
    }

    #[test]
    fn test_openai_requires_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        assert!(parse_config("[chunking]\nmax_tokens = 0\n").is_err());
    }

    #[test]
    fn test_ledger_dir_override() {
        let config = parse_config("[ledger]\ndir = \"/tmp/ledger\"\n").unwrap();
        assert_eq!(config.ledger_dir(), Path::new("/tmp/ledger"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.store.backend, "sqlite");
    }
}
