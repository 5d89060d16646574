//! TOML configuration.
//!
//! Every section and field has a default, so an empty file is valid.
//! [`load_config`] parses and validates; [`Config::minimal`] is the built-in
//! fallback used when the default config path does not exist.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl Config {
    /// Built-in defaults: local Qdrant, local models, Gemini.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Env var holding an API key. Empty means no key is sent.
    #[serde(default)]
    pub api_key_env: String,
    /// Named vector for text points. Empty selects the unnamed vector.
    #[serde(default = "default_text_vector")]
    pub text_vector: String,
    #[serde(default = "default_image_vector")]
    pub image_vector: String,
    #[serde(default = "default_qdrant_timeout")]
    pub timeout_secs: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key_env: String::new(),
            text_vector: default_text_vector(),
            image_vector: default_image_vector(),
            timeout_secs: default_qdrant_timeout(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "articles_collection".to_string()
}
fn default_text_vector() -> String {
    "text".to_string()
}
fn default_image_vector() -> String {
    "image".to_string()
}
fn default_qdrant_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local` (fastembed) or `fake` (deterministic hashing, no models).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_crossmodal_model")]
    pub crossmodal_model: String,
    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,
    #[serde(default)]
    pub document_prefix: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_fake_dims")]
    pub fake_dims: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            text_model: default_text_model(),
            crossmodal_model: default_crossmodal_model(),
            query_prefix: default_query_prefix(),
            document_prefix: String::new(),
            batch_size: default_batch_size(),
            fake_dims: default_fake_dims(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_text_model() -> String {
    "multilingual-e5-base".to_string()
}
fn default_crossmodal_model() -> String {
    "clip-vit-b-32".to_string()
}
fn default_query_prefix() -> String {
    "query: ".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_fake_dims() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_provider")]
    pub provider: String,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_generator_provider(),
            model: default_generator_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_generator_timeout(),
        }
    }
}

fn default_generator_provider() -> String {
    "gemini".to_string()
}
fn default_generator_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_generator_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched per modality.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    mmrag_core::store::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    /// Metric rank cutoff. Not the same knob as `retrieval.top_k`.
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_k() -> usize {
    mmrag_core::pipeline::DEFAULT_K
}
fn default_concurrency() -> usize {
    1
}

/// Turn an empty vector name into "use the unnamed vector".
pub fn vector_name(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Read and validate the config at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.qdrant.url.trim().is_empty() {
        bail!("qdrant.url must not be empty");
    }
    if config.qdrant.collection.trim().is_empty() {
        bail!("qdrant.collection must not be empty");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.evaluation.k < 1 {
        bail!("evaluation.k must be >= 1");
    }
    if config.evaluation.concurrency < 1 {
        bail!("evaluation.concurrency must be >= 1");
    }

    if config.embedding.batch_size < 1 {
        bail!("embedding.batch_size must be >= 1");
    }
    if config.embedding.fake_dims < 1 {
        bail!("embedding.fake_dims must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "local" | "fake" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or fake.",
            other
        ),
    }

    match config.generator.provider.as_str() {
        "gemini" => {}
        other => bail!("Unknown generator provider: '{}'. Must be gemini.", other),
    }

    Ok(())
}
