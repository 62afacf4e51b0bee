//! Vector embedding abstraction layer.
//!
//! Provides a trait-based interface for generating text embeddings used by
//! the derived index for similarity retrieval.
//!
//! The default implementation is a local feature-hashing provider: it needs
//! no model download, is fully deterministic, and gives lexical-overlap
//! similarity that is good enough to surface the characters and plot threads
//! an episode talks about. The remote provider lives in `saga-story`; the
//! ONNX provider is behind the `onnx` feature.

use async_trait::async_trait;

use crate::error::{MemoryError, Result};
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync` for use from async contexts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// Returns a vector of `dimensions()` floats.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`] if the backend fails to produce an
    /// embedding.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of texts.
    ///
    /// Default implementation calls `embed` in a loop.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding in the batch fails.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model (e.g. `"feature-hashing"`).
    fn model_name(&self) -> &str;
}

/// Reject a vector whose width does not match the provider.
///
/// # Errors
///
/// Returns [`MemoryError::Embedding`] on a dimension mismatch.
pub fn check_dimensions(embedding: &Embedding, expected: usize) -> Result<()> {
    if embedding.dimensions() == expected {
        Ok(())
    } else {
        Err(MemoryError::Embedding(format!(
            "expected {expected} dimensions, got {}",
            embedding.dimensions()
        )))
    }
}

// ---------------------------------------------------------------------------
// Feature-hashing provider (default)
// ---------------------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "in", "into", "is", "it", "its", "of", "on", "or", "she", "that", "the",
    "their", "them", "they", "this", "to", "was", "were", "with",
];

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Deterministic bag-of-words embeddings via signed feature hashing.
///
/// Each lowercase alphanumeric token (stopwords dropped) is hashed with
/// FNV-1a into one of `dimensions` buckets, with the sign taken from a high
/// hash bit. The result is L2-normalized; text with no tokens yields a zero
/// vector.
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    /// Create a hashing provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dims: dimensions.max(1),
        }
    }

    /// Synchronous core of [`EmbeddingProvider::embed`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut v = vec![0.0_f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let mag: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag >= f32::EPSILON {
            for x in &mut v {
                *x /= mag;
            }
        }
        Embedding(v)
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

// ---------------------------------------------------------------------------
// Stub / Zero-cost provider (for tests)
// ---------------------------------------------------------------------------

/// A stub embedding provider that returns zero-vectors.
///
/// Every similarity is 0, so retrieval order falls back entirely to the
/// revision and identifier tie-breakers.
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    /// Create a new stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding(vec![0.0; self.dims]))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// ONNX provider
// ---------------------------------------------------------------------------

/// Local `all-MiniLM-L6-v2` embeddings via `fastembed`.
#[cfg(feature = "onnx")]
pub struct OnnxEmbeddingProvider {
    model: fastembed::TextEmbedding,
}

#[cfg(feature = "onnx")]
impl OnnxEmbeddingProvider {
    /// Load the model, downloading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`] if the model cannot be loaded.
    pub fn new() -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        Ok(Self { model })
    }
}

#[cfg(feature = "onnx")]
#[async_trait]
impl EmbeddingProvider for OnnxEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut out = self
            .model
            .embed(vec![text], None)
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        out.pop()
            .map(Embedding)
            .ok_or_else(|| MemoryError::Embedding("model returned no vector".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let out = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        Ok(out.into_iter().map(Embedding).collect())
    }

    fn dimensions(&self) -> usize {
        384
    }

    fn model_name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
