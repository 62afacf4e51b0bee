//! Wiring from [`SagaConfig`] to a ready client, embedder and store.

use std::sync::Arc;

use saga_core::config::{EmbeddingBackend, LlmConfig};
use saga_core::embedding::{EmbeddingProvider, HashingEmbeddingProvider, StubEmbeddingProvider};
use saga_core::{MemoryError, MemoryStore, SagaConfig};
use saga_llm::{LlmClient, LlmError, RoleModels};
use tracing::info;

use crate::embedder::RemoteEmbeddingProvider;

/// Build the model client. The API key is read from the environment
/// variable named by `llm.api_key_env`.
///
/// # Errors
///
/// `ConfigError` for an unknown provider or a missing API key.
pub fn build_client(config: &LlmConfig) -> Result<LlmClient, LlmError> {
    let api_key = std::env::var(&config.api_key_env).ok();
    let provider = LlmClient::provider_from_parts(&config.provider, &config.base_url, api_key)
        .map_err(|e| match e {
            LlmError::ConfigError(msg) if msg.contains("API key") => LlmError::ConfigError(format!(
                "{msg}; set {} in the environment or a .env file",
                config.api_key_env
            )),
            other => other,
        })?;
    let models = RoleModels {
        planner: config.planner_model.clone(),
        generator: config.generator_model.clone(),
        critic: config.critic_model.clone(),
        extractor: config.extractor_model.clone(),
    };
    info!(provider = %config.provider, base_url = %config.base_url, "LLM client configured");
    Ok(LlmClient::new(provider, models, config.max_retries))
}

/// Build the embedding provider selected by `retrieval.embedding_provider`.
///
/// # Errors
///
/// `Config` when the ONNX backend is selected without the `onnx` feature;
/// `Embedding` when the ONNX model fails to load.
pub fn build_embedder(
    config: &SagaConfig,
    client: Arc<LlmClient>,
) -> Result<Arc<dyn EmbeddingProvider>, MemoryError> {
    let retrieval = &config.retrieval;
    let embedder: Arc<dyn EmbeddingProvider> = match retrieval.embedding_provider {
        EmbeddingBackend::Hashing => Arc::new(HashingEmbeddingProvider::new(retrieval.embedding_dimensions)),
        EmbeddingBackend::Stub => Arc::new(StubEmbeddingProvider::new(retrieval.embedding_dimensions)),
        EmbeddingBackend::Remote => Arc::new(RemoteEmbeddingProvider::new(
            client,
            retrieval.embedding_model.clone(),
            retrieval.embedding_dimensions,
            config.llm.request_timeout_ms,
        )),
        EmbeddingBackend::Onnx => onnx_embedder()?,
    };
    info!(
        model = embedder.model_name(),
        dimensions = embedder.dimensions(),
        "Embedding provider ready"
    );
    Ok(embedder)
}

#[cfg(feature = "onnx")]
fn onnx_embedder() -> Result<Arc<dyn EmbeddingProvider>, MemoryError> {
    Ok(Arc::new(saga_core::embedding::OnnxEmbeddingProvider::new()?))
}

#[cfg(not(feature = "onnx"))]
fn onnx_embedder() -> Result<Arc<dyn EmbeddingProvider>, MemoryError> {
    Err(MemoryError::Config(
        "embedding_provider = \"onnx\" requires building with the `onnx` feature".into(),
    ))
}

/// Open the memory store described by `config`.
///
/// # Errors
///
/// Any error from [`build_embedder`] or [`MemoryStore::open`].
pub fn open_store(config: &SagaConfig, client: Arc<LlmClient>) -> Result<MemoryStore, MemoryError> {
    MemoryStore::open(config, build_embedder(config, client)?)
}
