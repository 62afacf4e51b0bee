//! Similarity retrieval over the derived index.
//!
//! Exact brute-force cosine ranking: every eligible record is scored, so
//! results are deterministic for a given embedding provider.

pub mod scoring;

use crate::types::{Embedding, RecordRef};

use self::scoring::RankKey;

/// One record eligible for retrieval.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// The record.
    pub reference: RecordRef,
    /// Revision of the record's last update.
    pub revision: u64,
    /// The record's embedding.
    pub embedding: &'a Embedding,
}

/// A ranked hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// The record.
    pub reference: RecordRef,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

/// Return the top `k` candidates by [`RankKey`] order.
#[must_use]
pub fn rank<'a>(
    query: &Embedding,
    candidates: impl IntoIterator<Item = Candidate<'a>>,
    k: usize,
) -> Vec<Hit> {
    if k == 0 {
        return Vec::new();
    }

    let mut keys: Vec<RankKey> = candidates
        .into_iter()
        .map(|c| RankKey::new(scoring::similarity(query, c.embedding), c.revision, c.reference))
        .collect();

    if keys.len() > k {
        keys.select_nth_unstable(k - 1);
        keys.truncate(k);
    }
    keys.sort_unstable();

    keys.into_iter()
        .map(|key| Hit {
            reference: key.reference,
            similarity: key.similarity.into_inner(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CharacterId, PlotId};

    #[test]
    fn returns_at_most_k_in_order() {
        let near = Embedding(vec![1.0, 0.0]);
        let mid = Embedding(vec![1.0, 1.0]);
        let far = Embedding(vec![0.0, 1.0]);
        let query = Embedding(vec![1.0, 0.0]);
        let candidates = [
            Candidate { reference: RecordRef::Plot(PlotId(1)), revision: 1, embedding: &far },
            Candidate { reference: RecordRef::Plot(PlotId(2)), revision: 2, embedding: &mid },
            Candidate { reference: RecordRef::Character(CharacterId(3)), revision: 3, embedding: &near },
        ];

        let hits = rank(&query, candidates, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].reference, RecordRef::Character(CharacterId(3)));
        assert_eq!(hits[1].reference, RecordRef::Plot(PlotId(2)));
    }

    #[test]
    fn zero_k_and_empty_candidates() {
        let query = Embedding(vec![1.0]);
        let e = Embedding(vec![1.0]);
        let one = [Candidate { reference: RecordRef::Plot(PlotId(1)), revision: 1, embedding: &e }];
        assert!(rank(&query, one, 0).is_empty());
        assert!(rank(&query, Vec::new(), 3).is_empty());
    }
}
