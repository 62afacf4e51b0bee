//! Ranking key for similarity retrieval.
//!
//! Results sort by:
//!   1. cosine similarity, descending (NaN treated as 0)
//!   2. revision, descending (more recently updated first)
//!   3. record reference, ascending (lower id first, characters before plots)

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use crate::types::{Embedding, RecordRef};

/// Cosine similarity with NaN mapped to zero.
#[must_use]
pub fn similarity(query: &Embedding, record: &Embedding) -> f32 {
    let s = query.cosine_similarity(record);
    if s.is_nan() { 0.0 } else { s }
}

/// Total order over retrieval candidates; `Less` means "ranks first".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankKey {
    /// Similarity to the query.
    pub similarity: OrderedFloat<f32>,
    /// Revision of the record's last update.
    pub revision: u64,
    /// The record.
    pub reference: RecordRef,
}

impl RankKey {
    /// Build a key for one candidate.
    #[must_use]
    pub fn new(similarity: f32, revision: u64, reference: RecordRef) -> Self {
        Self {
            similarity: OrderedFloat(similarity),
            revision,
            reference,
        }
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .cmp(&self.similarity)
            .then_with(|| other.revision.cmp(&self.revision))
            .then_with(|| self.reference.cmp(&other.reference))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
