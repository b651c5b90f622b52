//! TOML configuration.
//!
//! Every section is optional except `[index]`; missing keys fall back to
//! the defaults below. [`load_config`] parses and validates in one step.

use anyhow::{bail, Context, Result};
use apidoc_rag_core::cache::CacheCapacity;
use apidoc_rag_core::chunk::BoundaryMode;
use apidoc_rag_core::embedding::BatchPolicy;
use apidoc_rag_core::retrieval::RetrievalParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalParams,
    #[serde(default)]
    pub cache: CacheCapacity,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the persisted index pair of each category.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub boundary: BoundaryMode,
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
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
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
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    10
}
fn default_max_tokens() -> usize {
    8192
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            batch_size: self.batch_size,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let embedding = &config.embedding;
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if embedding.max_tokens == 0 {
        bail!("embedding.max_tokens must be > 0");
    }

    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if embedding.is_enabled() {
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

    let retrieval = &config.retrieval;
    if retrieval.class_top_k == 0 || retrieval.method_top_k == 0 {
        bail!("retrieval.class_top_k and retrieval.method_top_k must be >= 1");
    }
    if retrieval.max_classes == 0 || retrieval.max_methods == 0 {
        bail!("retrieval.max_classes and retrieval.max_methods must be >= 1");
    }
    if retrieval.class_max_chars == 0 || retrieval.method_max_chars == 0 {
        bail!("retrieval.class_max_chars and retrieval.method_max_chars must be > 0");
    }

    if config.cache.embedding_capacity == 0 || config.cache.query_capacity == 0 {
        bail!("cache.embedding_capacity and cache.query_capacity must be > 0");
    }

    Ok(())
}
