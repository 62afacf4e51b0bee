//! Configuration for the saga workspace.
//!
//! Maps directly to `saga.toml`. Every field has a serde default so an empty
//! file (or no file at all) yields a working offline configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level saga configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Durable memory store settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Similarity retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Language model settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Story pipeline settings.
    #[serde(default)]
    pub story: StoryConfig,
}

impl SagaConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MemoryError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::MemoryError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Durable memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding `characters.json`, `plots.json` and `counters.json`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Number of query-text embeddings kept in the LRU cache.
    #[serde(default = "default_64")]
    pub query_cache_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            query_cache_size: 64,
        }
    }
}

/// Which embedding backend feeds the derived index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local feature hashing; deterministic and offline.
    #[default]
    Hashing,
    /// The language model backend's embeddings endpoint.
    Remote,
    /// Local ONNX model (requires the `onnx` feature).
    Onnx,
    /// Zero vectors; every similarity is 0.
    Stub,
}

/// Similarity retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Records fed to each generator and critic prompt.
    #[serde(default = "default_5_usize")]
    pub top_k: usize,
    /// Embedding backend.
    #[serde(default)]
    pub embedding_provider: EmbeddingBackend,
    /// Model name for remote and ONNX providers.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Vector width for the hashing and stub providers.
    #[serde(default = "default_256")]
    pub embedding_dimensions: usize,
    /// Whether resolved and abandoned plot points are eligible results.
    #[serde(default)]
    pub include_closed_plots: bool,
    /// Script excerpts fed to each generator prompt.
    #[serde(default = "default_5_usize")]
    pub excerpt_top_k: usize,
    /// Maximum characters per script excerpt.
    #[serde(default = "default_1000")]
    pub excerpt_chars: usize,
    /// Characters repeated from the end of one excerpt at the start of the next.
    #[serde(default = "default_200")]
    pub excerpt_overlap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            embedding_provider: EmbeddingBackend::Hashing,
            embedding_model: default_embedding_model(),
            embedding_dimensions: 256,
            include_closed_plots: false,
            excerpt_top_k: 5,
            excerpt_chars: 1000,
            excerpt_overlap: 200,
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "openai", "ollama", "none".
    #[serde(default = "default_openai")]
    pub provider: String,
    /// Base URL for the API.
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model used to draft the story plan.
    #[serde(default = "default_large_model")]
    pub planner_model: String,
    /// Model used to write episode scripts.
    #[serde(default = "default_large_model")]
    pub generator_model: String,
    /// Model used to critique scripts.
    #[serde(default = "default_large_model")]
    pub critic_model: String,
    /// Model used to extract memory deltas.
    #[serde(default = "default_small_model")]
    pub extractor_model: String,
    /// Hard timeout for any model call in milliseconds.
    #[serde(default = "default_120000")]
    pub request_timeout_ms: u64,
    /// Retries on retryable failures. Zero means fail on first error.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_openai(),
            base_url: default_openai_url(),
            api_key_env: default_api_key_env(),
            planner_model: default_large_model(),
            generator_model: default_large_model(),
            critic_model: default_large_model(),
            extractor_model: default_small_model(),
            request_timeout_ms: 120_000,
            max_retries: 0,
        }
    }
}

/// Story pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Episode count used when none is given.
    #[serde(default = "default_5_u32")]
    pub default_episode_count: u32,
    /// Scripts longer than this are truncated before delta extraction.
    #[serde(default = "default_12000")]
    pub max_extraction_chars: usize,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            default_episode_count: 5,
            max_extraction_chars: 12_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_log_level() -> String { "info".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from("memory/db") }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_openai() -> String { "openai".to_string() }
fn default_openai_url() -> String { "https://api.openai.com".to_string() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }
fn default_large_model() -> String { "gpt-4-turbo-preview".to_string() }
fn default_small_model() -> String { "gpt-3.5-turbo-0125".to_string() }
fn default_5_usize() -> usize { 5 }
fn default_5_u32() -> u32 { 5 }
fn default_64() -> usize { 64 }
fn default_200() -> usize { 200 }
fn default_256() -> usize { 256 }
fn default_1000() -> usize { 1000 }
fn default_12000() -> usize { 12_000 }
fn default_120000() -> u64 { 120_000 }
