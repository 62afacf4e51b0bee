//! Script excerpt index.
//!
//! Committed episode scripts and the story overview are split into
//! overlapping chunks and embedded with the store's provider. Generation of a
//! later episode retrieves the chunks most similar to its outline.
//!
//! The index is derived: it holds no authoritative state and can be rebuilt
//! from the plan and the latest script of each episode at any time.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingProvider, check_dimensions};
use crate::error::Result;
use crate::retrieval::scoring;
use crate::types::{Embedding, EpisodeIndex};

/// What a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExcerptSource {
    /// Title, premise and setting of the plan.
    Overview,
    /// The script of the given episode.
    Episode(EpisodeIndex),
}

impl ExcerptSource {
    /// Whether the source existed before `episode` was written.
    #[must_use]
    pub fn is_before(self, episode: EpisodeIndex) -> bool {
        match self {
            Self::Overview => true,
            Self::Episode(n) => n < episode,
        }
    }
}

/// One chunk of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    /// Where it came from.
    pub source: ExcerptSource,
    /// Position within the source, from 0.
    pub ordinal: usize,
    /// The chunk itself.
    pub text: String,
}

impl Excerpt {
    /// Heading naming the source, e.g. `Episode 2, part 1`.
    #[must_use]
    pub fn label(&self) -> String {
        match self.source {
            ExcerptSource::Overview => "Story overview".to_string(),
            ExcerptSource::Episode(n) => format!("Episode {}, part {}", n + 1, self.ordinal + 1),
        }
    }
}

/// A retrieved chunk with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevantExcerpt {
    /// The chunk.
    pub excerpt: Excerpt,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

/// Chunks of one source, embedded but not yet in the index.
#[derive(Debug, Clone)]
pub struct PreparedExcerpts {
    source: ExcerptSource,
    entries: Vec<(Excerpt, Embedding)>,
}

impl PreparedExcerpts {
    /// The source these chunks replace.
    #[must_use]
    pub fn source(&self) -> ExcerptSource {
        self.source
    }

    /// Number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the source produced no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Split `text` into chunks of at most `chunk_chars` characters.
///
/// Lines are packed greedily; a line longer than a chunk is cut at character
/// boundaries. Each chunk after the first starts with up to `overlap`
/// characters of trailing lines from the one before. Blank input gives no
/// chunks.
#[must_use]
pub fn split_text(text: &str, chunk_chars: usize, overlap: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let overlap = overlap.min(chunk_chars / 2);

    let mut pieces: Vec<String> = Vec::new();
    for line in text.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
        let chars: Vec<char> = line.chars().collect();
        for part in chars.chunks(chunk_chars) {
            pieces.push(part.iter().collect());
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;
    for piece in &pieces {
        let len = piece.chars().count();
        let joined = if current.is_empty() { len } else { current_len + 1 + len };
        if joined > chunk_chars && !current.is_empty() {
            chunks.push(current.join("\n"));
            let mut carried: Vec<&str> = Vec::new();
            let mut carried_len = 0;
            for kept in current.iter().rev() {
                let kept_len = kept.chars().count();
                if carried_len + kept_len + 1 + len > chunk_chars || carried_len + kept_len > overlap {
                    break;
                }
                carried.insert(0, *kept);
                carried_len += kept_len + 1;
            }
            current = carried;
            current_len = carried_len.saturating_sub(1);
        }
        current_len = if current.is_empty() { len } else { current_len + 1 + len };
        current.push(piece.as_str());
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Embedded chunks of the overview and committed scripts.
#[derive(Debug, Clone)]
pub struct ExcerptIndex {
    chunk_chars: usize,
    overlap: usize,
    entries: Vec<(Excerpt, Embedding)>,
}

impl ExcerptIndex {
    /// An empty index cutting chunks of `chunk_chars` with `overlap`.
    #[must_use]
    pub fn new(chunk_chars: usize, overlap: usize) -> Self {
        Self {
            chunk_chars,
            overlap,
            entries: Vec::new(),
        }
    }

    /// An empty index sized from the retrieval settings.
    #[must_use]
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.excerpt_chars, config.excerpt_overlap)
    }

    /// Chunk and embed `text` without touching the index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::Embedding`] if the provider fails or
    /// returns a vector of the wrong width.
    pub async fn prepare(
        &self,
        source: ExcerptSource,
        text: &str,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<PreparedExcerpts> {
        let chunks = split_text(text, self.chunk_chars, self.overlap);
        if chunks.is_empty() {
            return Ok(PreparedExcerpts { source, entries: Vec::new() });
        }
        let embeddings = embedder.embed_batch(&chunks).await?;
        let dims = embedder.dimensions();
        for embedding in &embeddings {
            check_dimensions(embedding, dims)?;
        }
        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| (Excerpt { source, ordinal, text }, embedding))
            .collect();
        Ok(PreparedExcerpts { source, entries })
    }

    /// Replace every chunk of the prepared source.
    pub fn install(&mut self, prepared: PreparedExcerpts) {
        self.remove(prepared.source);
        debug!(source = ?prepared.source, chunks = prepared.entries.len(), "Excerpts indexed");
        self.entries.extend(prepared.entries);
    }

    /// Chunk, embed and install `text` in one step.
    ///
    /// # Errors
    ///
    /// As [`Self::prepare`]; the index is unchanged on error.
    pub async fn replace(
        &mut self,
        source: ExcerptSource,
        text: &str,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<usize> {
        let prepared = self.prepare(source, text, embedder).await?;
        let count = prepared.len();
        self.install(prepared);
        Ok(count)
    }

    /// Drop every chunk of `source`.
    pub fn remove(&mut self, source: ExcerptSource) {
        self.entries.retain(|(e, _)| e.source != source);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of indexed chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexed chunks of `source`, in order.
    pub fn excerpts_of(&self, source: ExcerptSource) -> impl Iterator<Item = &Excerpt> {
        self.entries.iter().map(|(e, _)| e).filter(move |e| e.source == source)
    }

    /// The `k` chunks most similar to `text` among sources written before
    /// `episode`.
    ///
    /// Ties go to the later episode, then the earlier chunk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::Embedding`] if the provider fails.
    pub async fn query(
        &self,
        text: &str,
        episode: EpisodeIndex,
        k: usize,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Vec<RelevantExcerpt>> {
        if k == 0 || !self.entries.iter().any(|(e, _)| e.source.is_before(episode)) {
            return Ok(Vec::new());
        }
        let query = embedder.embed(text).await?;
        check_dimensions(&query, embedder.dimensions())?;

        let mut scored: Vec<(OrderedFloat<f32>, &Excerpt)> = self
            .entries
            .iter()
            .filter(|(e, _)| e.source.is_before(episode))
            .map(|(e, embedding)| (OrderedFloat(scoring::similarity(&query, embedding)), e))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| rank(*sa, a, *sb, b));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(similarity, excerpt)| RelevantExcerpt {
                excerpt: excerpt.clone(),
                similarity: similarity.into_inner(),
            })
            .collect())
    }
}

fn rank(sa: OrderedFloat<f32>, a: &Excerpt, sb: OrderedFloat<f32>, b: &Excerpt) -> Ordering {
    sb.cmp(&sa)
        .then_with(|| b.source.cmp(&a.source))
        .then_with(|| a.ordinal.cmp(&b.ordinal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbeddingProvider;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(
            split_text("INT. DOCKS - NIGHT\n\nMARA\nTalk.", 100, 20),
            vec!["INT. DOCKS - NIGHT\nMARA\nTalk."]
        );
        assert!(split_text("  \n\n ", 100, 20).is_empty());
    }

    #[test]
    fn chunks_respect_the_size_and_overlap() {
        let text = (1..=30)
            .map(|i| format!("Line number {i:02} of the scene"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_text(&text, 120, 40);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 120, "{chunk:?}");
        }
        for pair in chunks.windows(2) {
            let last_line = pair[0].lines().last().expect("line");
            assert!(pair[1].starts_with(last_line), "overlap carries the last line");
        }
        assert!(chunks.last().expect("last").ends_with("Line number 30 of the scene"));
    }

    #[test]
    fn long_lines_are_cut() {
        let line = "é".repeat(250);
        let chunks = split_text(&line, 100, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 50);
    }

    #[tokio::test]
    async fn only_earlier_sources_are_returned() {
        let embedder = HashingEmbeddingProvider::default();
        let mut index = ExcerptIndex::new(200, 40);
        index
            .replace(ExcerptSource::Overview, "STORY TITLE: Rain City\nSETTING: a drowned port", &embedder)
            .await
            .expect("overview");
        index
            .replace(ExcerptSource::Episode(0), "MARA\nThe harbor ledger is gone.", &embedder)
            .await
            .expect("episode 0");
        index
            .replace(ExcerptSource::Episode(1), "TEO\nI sold the harbor ledger.", &embedder)
            .await
            .expect("episode 1");

        let hits = index.query("harbor ledger", 1, 5, &embedder).await.expect("query");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].excerpt.source, ExcerptSource::Episode(0));
        assert!(hits.iter().all(|h| h.excerpt.source.is_before(1)));

        let overview_only = index.query("harbor ledger", 0, 5, &embedder).await.expect("query");
        assert_eq!(overview_only.len(), 1);
        assert_eq!(overview_only[0].excerpt.source, ExcerptSource::Overview);
        assert!(index.query("harbor ledger", 1, 0, &embedder).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn replacing_a_source_drops_its_old_chunks() {
        let embedder = HashingEmbeddingProvider::default();
        let mut index = ExcerptIndex::new(200, 40);
        index.replace(ExcerptSource::Episode(0), "First draft.", &embedder).await.expect("draft");
        index.replace(ExcerptSource::Episode(0), "Second draft.", &embedder).await.expect("redraft");

        let texts: Vec<&str> = index
            .excerpts_of(ExcerptSource::Episode(0))
            .map(|e| e.text.as_str())
            .collect();
        assert_eq!(texts, vec!["Second draft."]);

        index.remove(ExcerptSource::Episode(0));
        assert!(index.is_empty());
    }

    #[test]
    fn labels_are_one_based() {
        let excerpt = Excerpt { source: ExcerptSource::Episode(1), ordinal: 0, text: String::new() };
        assert_eq!(excerpt.label(), "Episode 2, part 1");
    }
}
