//! Derived embedding index.
//!
//! A side table from [`RecordRef`] to the record's embedding and a
//! fingerprint of the text it was computed from. Never persisted; any entry
//! may be dropped and recomputed from the authoritative records.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::{Embedding, RecordRef};

/// Fingerprint of an embedding source text.
#[must_use]
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// One cached embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The record embedding.
    pub embedding: Embedding,
    /// Fingerprint of the text the embedding was computed from.
    pub fingerprint: u64,
}

/// In-memory map of record embeddings.
#[derive(Debug, Default)]
pub struct DerivedIndex {
    entries: HashMap<RecordRef, IndexEntry>,
}

impl DerivedIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedding for `reference` if it was computed from text with the
    /// given fingerprint.
    #[must_use]
    pub fn fresh(&self, reference: RecordRef, fingerprint: u64) -> Option<&Embedding> {
        self.entries
            .get(&reference)
            .filter(|e| e.fingerprint == fingerprint)
            .map(|e| &e.embedding)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, reference: RecordRef, embedding: Embedding, fingerprint: u64) {
        self.entries.insert(
            reference,
            IndexEntry {
                embedding,
                fingerprint,
            },
        );
    }

    /// Drop entries whose record no longer exists.
    pub fn retain(&mut self, mut keep: impl FnMut(RecordRef) -> bool) {
        self.entries.retain(|r, _| keep(*r));
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
