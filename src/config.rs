use anyhow::{bail, Context, Result};
use odoo_rag_core::session::{ModelCatalog, ModelTier};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/odoo-rag.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Persistence directory; holds `index.sqlite`.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Extraction worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            workers: default_workers(),
            include_globs: default_include_globs(),
            exclude_globs: default_exclude_globs(),
            follow_symlinks: false,
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./odoo_index")
}
fn default_workers() -> usize {
    4
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.py".to_string(),
        "**/*.xml".to_string(),
        "**/*.js".to_string(),
    ]
}
fn default_exclude_globs() -> Vec<String> {
    vec![
        "**/__pycache__/**".to_string(),
        "**/static/lib/**".to_string(),
        "**/node_modules/**".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_true")]
    pub expand_inheritance: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            expand_inheritance: true,
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama server or OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub default_tier: ModelTier,
    #[serde(default)]
    pub models: ModelsConfig,
    /// Messages endpoint override.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            default_tier: ModelTier::default(),
            models: ModelsConfig::default(),
            url: None,
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_retries(),
        }
    }
}

fn default_generation_provider() -> String {
    "anthropic".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_generation_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_fast_model")]
    pub fast: String,
    #[serde(default = "default_balanced_model")]
    pub balanced: String,
    #[serde(default = "default_best_model")]
    pub best: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_model(),
            balanced: default_balanced_model(),
            best: default_best_model(),
        }
    }
}

impl ModelsConfig {
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog {
            fast: self.fast.clone(),
            balanced: self.balanced.clone(),
            best: self.best.clone(),
        }
    }
}

fn default_fast_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}
fn default_balanced_model() -> String {
    "claude-3-sonnet-20240229".to_string()
}
fn default_best_model() -> String {
    "claude-3-opus-20240229".to_string()
}

impl Config {
    /// Defaults for every section; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn db_path(&self) -> PathBuf {
        self.index.dir.join("index.sqlite")
    }
}

/// Load the config at `path`, or [`Config::minimal`] when `path` is the
/// default location and no file exists there.
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path == Path::new(DEFAULT_CONFIG_PATH) && !path.exists() {
        return Ok(Config::minimal());
    }
    load_config(path)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.index.workers == 0 {
        bail!("index.workers must be > 0");
    }

    if config.retrieval.k == 0 {
        bail!("retrieval.k must be >= 1");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" => {
            if embedding.dims.is_none() || embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or ollama.",
            other
        ),
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "anthropic" | "echo" | "disabled" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be anthropic, echo, or disabled.",
            other
        ),
    }
    if !(0.0..=1.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 1.0]");
    }

    Ok(())
}
