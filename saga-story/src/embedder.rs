//! Embedding provider backed by the language model service's embeddings
//! endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use saga_core::embedding::{EmbeddingProvider, check_dimensions};
use saga_core::error::Result;
use saga_core::{Embedding, MemoryError};
use saga_llm::LlmClient;
use tracing::debug;

/// Remote embeddings through an [`LlmClient`].
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingProvider {
    client: Arc<LlmClient>,
    model: String,
    dimensions: usize,
    timeout_ms: u64,
}

impl RemoteEmbeddingProvider {
    /// A provider asking `model` for `dimensions`-wide vectors.
    #[must_use]
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>, dimensions: usize, timeout_ms: u64) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
            timeout_ms,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let vector = self
            .client
            .embed(&self.model, text, Some(self.dimensions), self.timeout_ms)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let embedding = Embedding(vector);
        check_dimensions(&embedding, self.dimensions)?;
        debug!(model = %self.model, chars = text.len(), "remote embedding");
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
