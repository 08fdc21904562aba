//! Configuration parsing and validation.
//!
//! rowscout is configured by a single TOML file (default
//! `./config/rowscout.toml`). Every section is optional and falls back to
//! the defaults below; [`load_config`] validates the result before any
//! provider or store is created.
//!
//! ```toml
//! [store]
//! dir = "./data"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [completion]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [retrieval]
//! score_cutoff = 60
//! top_k = 6
//! ```

use anyhow::{bail, Context, Result};
use rowscout_core::Settings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub graph: GraphConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Root of the header cache and persisted indexes.
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
    /// How long a writer waits for another writer's lock on the same index.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_lock_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or an OpenAI-compatible gateway).
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
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: 0.0,
            max_retries: default_max_retries(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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
fn default_completion_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub fuzzy_limit: usize,
    #[serde(default = "default_limit")]
    pub vector_limit: usize,
    #[serde(default = "default_score_cutoff")]
    pub score_cutoff: f64,
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fuzzy_limit: default_limit(),
            vector_limit: default_limit(),
            score_cutoff: default_score_cutoff(),
            max_distance: default_max_distance(),
            top_k: default_top_k(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_score_cutoff() -> f64 {
    60.0
}
fn default_max_distance() -> f32 {
    10.0
}
fn default_top_k() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_max_edges_per_group")]
    pub max_edges_per_group: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_edges_per_group: default_max_edges_per_group(),
        }
    }
}

fn default_max_edges_per_group() -> usize {
    5000
}

impl Config {
    /// Retrieval tuning handed to the core crate.
    pub fn settings(&self) -> Settings {
        Settings {
            fuzzy_limit: self.retrieval.fuzzy_limit,
            vector_limit: self.retrieval.vector_limit,
            score_cutoff: self.retrieval.score_cutoff,
            max_distance: self.retrieval.max_distance,
            top_k: self.retrieval.top_k,
            batch_size: self.embedding.batch_size,
            max_edges_per_group: self.graph.max_edges_per_group,
        }
    }
}

/// Read, parse and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.fuzzy_limit == 0 || r.vector_limit == 0 || r.top_k == 0 {
        bail!("retrieval.fuzzy_limit, vector_limit and top_k must be >= 1");
    }
    if !(0.0..=100.0).contains(&r.score_cutoff) {
        bail!("retrieval.score_cutoff must be in [0, 100]");
    }
    if r.max_distance.is_nan() || r.max_distance <= 0.0 {
        bail!("retrieval.max_distance must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.graph.max_edges_per_group == 0 {
        bail!("graph.max_edges_per_group must be > 0");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
            if e.dims.is_none() || e.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if e.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    let c = &config.completion;
    match c.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if c.model.is_none() {
                bail!(
                    "completion.model must be specified when provider is '{}'",
                    c.provider
                );
            }
        }
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&c.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
