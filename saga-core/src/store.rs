//! The memory store: authoritative character and plot records, durable id
//! counters, and the derived embedding index.
//!
//! Every mutating call persists before returning. A batch of deltas is
//! applied all-or-nothing: on any failure the pre-batch records are restored
//! in memory and on disk. Allocated ids are never handed out again, even when
//! the batch that allocated them is rolled back.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use lru::LruCache;
use tracing::{debug, error, info, warn};

use crate::config::SagaConfig;
use crate::delta::{AppliedDelta, DeltaKind, DeltaOp, MemoryDelta};
use crate::embedding::{EmbeddingProvider, check_dimensions};
use crate::error::{MemoryError, Result};
use crate::index::{DerivedIndex, fingerprint};
use crate::persistence::{Counters, JsonStore};
use crate::retrieval::{self, Candidate};
use crate::types::{
    Character, CharacterFields, CharacterId, CharacterSnapshot, Embedding, IdKind, MemoryRecord,
    Moment, PlotFields, PlotId, PlotPoint, PlotStatus, RecordRef, RelevantRecord, StatusChange,
};

/// Handle to an open memory store.
pub struct MemoryStore {
    files: JsonStore,
    characters: BTreeMap<CharacterId, Character>,
    plots: BTreeMap<PlotId, PlotPoint>,
    counters: Counters,
    index: DerivedIndex,
    query_cache: LruCache<String, Embedding>,
    embedder: Arc<dyn EmbeddingProvider>,
    include_closed_plots: bool,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("dir", &self.files.dir())
            .field("characters", &self.characters.len())
            .field("plots", &self.plots.len())
            .field("counters", &self.counters)
            .field("embedder", &self.embedder.model_name())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open the store under `config.memory.data_dir`, loading every record
    /// file and recovering counters that lag behind the records.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] or [`MemoryError::Serialization`] if
    /// a record file cannot be read or decoded.
    pub fn open(config: &SagaConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let start = Instant::now();
        let files = JsonStore::open(&config.memory.data_dir)?;
        let characters = files.load_characters()?;
        let plots = files.load_plots()?;
        let mut counters = files.load_counters()?;
        if counters.reconcile(&characters, &plots) {
            files.save_counters(&counters)?;
        }

        let cache_size =
            NonZeroUsize::new(config.memory.query_cache_size).unwrap_or(NonZeroUsize::MIN);

        let store = Self {
            files,
            characters: characters.into_iter().map(|c| (c.id, c)).collect(),
            plots: plots.into_iter().map(|p| (p.id, p)).collect(),
            counters,
            index: DerivedIndex::new(),
            query_cache: LruCache::new(cache_size),
            embedder,
            include_closed_plots: config.retrieval.include_closed_plots,
        };

        info!(
            characters = store.characters.len(),
            plots = store.plots.len(),
            embedder = store.embedder.model_name(),
            elapsed_ms = start.elapsed().as_millis(),
            "Memory store opened"
        );
        Ok(store)
    }

    // ------------------------------------------------------------------
    // Identifiers
    // ------------------------------------------------------------------

    /// Allocate the next unused identifier for `kind`.
    ///
    /// The increment is persisted before the id is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] if the counter file cannot be written;
    /// no id is consumed in that case.
    pub fn allocate_id(&mut self, kind: IdKind) -> Result<u64> {
        let before = self.counters;
        let id = self.counters.bump(kind);
        if let Err(e) = self.files.save_counters(&self.counters) {
            self.counters = before;
            return Err(e);
        }
        debug!(%kind, id, "Allocated id");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Single-record writes
    // ------------------------------------------------------------------

    /// Create (when `id` is `None`) or update a character, recording a
    /// snapshot tagged with `at`.
    ///
    /// Repeating the same state at the same moment appends nothing.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidRecord`] when creating without a name.
    /// - [`MemoryError::CharacterNotFound`] when `id` is unknown.
    /// - [`MemoryError::OutOfOrderSnapshot`] when `at` precedes the latest
    ///   snapshot.
    /// - [`MemoryError::Storage`] on write failure; the record is left as it
    ///   was.
    pub fn upsert_character(
        &mut self,
        id: Option<CharacterId>,
        fields: CharacterFields,
        at: Moment,
    ) -> Result<CharacterId> {
        let (id, changed) = self.transact(|store| store.write_character(id, &fields, at))?;
        if changed {
            info!(character = %id, %at, "Character upserted");
        } else {
            debug!(character = %id, %at, "Character unchanged; nothing written");
        }
        Ok(id)
    }

    /// Create (when `id` is `None`) or update a plot point.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidRecord`] when creating without a description.
    /// - [`MemoryError::PlotNotFound`] when `id` is unknown.
    /// - [`MemoryError::InvalidTransition`] when the plot is already
    ///   resolved or abandoned; a closed plot takes no further writes.
    /// - [`MemoryError::Storage`] on write failure.
    pub fn upsert_plot(
        &mut self,
        id: Option<PlotId>,
        fields: PlotFields,
        status: PlotStatus,
        at: Moment,
    ) -> Result<PlotId> {
        let (id, changed) = self.transact(|store| store.write_plot(id, &fields, status, at))?;
        if changed {
            info!(plot = %id, %status, %at, "Plot point upserted");
        } else {
            debug!(plot = %id, %at, "Plot point unchanged; nothing written");
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    /// Apply `deltas` as one unit tagged with `at`.
    ///
    /// Every delta's shape is validated before anything changes; deltas are
    /// then applied in order against the evolving in-memory state and the
    /// result is persisted once. On any failure the records are restored to
    /// their pre-batch state.
    ///
    /// Character updates without an id resolve by case-insensitive name.
    /// Plot character lists are resolved by name; unknown names are skipped.
    ///
    /// # Errors
    ///
    /// The first validation, lookup, transition, or storage error.
    pub fn apply_batch(&mut self, deltas: &[MemoryDelta], at: Moment) -> Result<Vec<AppliedDelta>> {
        for delta in deltas {
            delta.validate_shape()?;
        }

        let start = Instant::now();
        let applied = self
            .transact(|store| {
                let applied = deltas
                    .iter()
                    .map(|delta| store.apply_one(delta, at))
                    .collect::<Result<Vec<_>>>()?;
                Ok((applied, true))
            })
            .map(|(applied, _)| applied);

        match &applied {
            Ok(applied) => info!(
                deltas = applied.len(),
                %at,
                elapsed_us = start.elapsed().as_micros(),
                "Delta batch committed"
            ),
            Err(e) => warn!(error = %e, %at, "Delta batch rejected"),
        }
        applied
    }

    /// Run `op` against the in-memory records and persist when it reports a
    /// change. On any failure the records are restored, and when the failure
    /// came from storage the restored records are written back so no file
    /// keeps a half-applied change.
    fn transact<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<(T, bool)>) -> Result<(T, bool)> {
        let backup = (self.characters.clone(), self.plots.clone());
        let outcome = op(self).and_then(|(value, changed)| {
            if changed {
                self.persist()?;
            }
            Ok((value, changed))
        });

        if let Err(e) = &outcome {
            debug!(error = %e, "Restoring records after failed write");
            self.characters = backup.0;
            self.plots = backup.1;
            let characters = &self.characters;
            let plots = &self.plots;
            self.index.retain(|r| match r {
                RecordRef::Character(id) => characters.contains_key(&id),
                RecordRef::Plot(id) => plots.contains_key(&id),
            });
            if e.is_storage() {
                if let Err(restore) = self.persist() {
                    error!(error = %restore, "Failed to rewrite records after rollback");
                }
            }
        }
        outcome
    }

    fn apply_one(&mut self, delta: &MemoryDelta, at: Moment) -> Result<AppliedDelta> {
        let mut resolved = delta.clone();
        let record = match delta.kind {
            DeltaKind::Character => {
                let mut fields = CharacterFields {
                    name: delta.fields.name.clone(),
                    description: delta.fields.description.clone(),
                    state: delta.fields.state.clone(),
                };
                let target = match (delta.op, delta.id) {
                    (DeltaOp::Create, _) => None,
                    (_, Some(id)) => Some(CharacterId(id)),
                    (_, None) => {
                        let name = delta.fields.name.as_deref().unwrap_or_default();
                        let found = self.find_character_by_name(name).ok_or_else(|| {
                            MemoryError::InvalidRecord(format!("no character named {name:?}"))
                        })?;
                        // The name only located the record; keep its stored spelling.
                        fields.name = None;
                        Some(found.id)
                    }
                };
                let (id, _) = self.write_character(target, &fields, at)?;
                resolved.id = Some(id.0);
                RecordRef::Character(id)
            }
            DeltaKind::Plot => {
                let target = match delta.op {
                    DeltaOp::Create => None,
                    _ => delta.id.map(PlotId),
                };
                let status = match (delta.target_status(), target) {
                    (Some(status), _) => status,
                    (None, Some(id)) => self
                        .plots
                        .get(&id)
                        .map_or(PlotStatus::Open, |p| p.status),
                    (None, None) => PlotStatus::Open,
                };
                let fields = PlotFields {
                    description: delta.fields.description.clone(),
                    characters: delta
                        .fields
                        .characters
                        .iter()
                        .filter_map(|name| {
                            let id = self.find_character_by_name(name).map(|c| c.id);
                            if id.is_none() {
                                debug!(name = %name, "Skipping unknown character in plot delta");
                            }
                            id
                        })
                        .collect(),
                };
                let (id, _) = self.write_plot(target, &fields, status, at)?;
                resolved.id = Some(id.0);
                RecordRef::Plot(id)
            }
        };
        Ok(AppliedDelta {
            delta: resolved,
            record,
        })
    }

    // ------------------------------------------------------------------
    // In-memory mutation (no persistence)
    // ------------------------------------------------------------------

    fn write_character(
        &mut self,
        id: Option<CharacterId>,
        fields: &CharacterFields,
        at: Moment,
    ) -> Result<(CharacterId, bool)> {
        let now = Utc::now();
        let Some(id) = id else {
            let name = non_blank(fields.name.as_deref())
                .ok_or_else(|| MemoryError::InvalidRecord("character requires a name".into()))?
                .to_string();
            let description = non_blank(fields.description.as_deref()).unwrap_or_default();
            let state = non_blank(fields.state.as_deref()).or(non_blank(Some(description)));
            let snapshots = state
                .map(|s| CharacterSnapshot {
                    at,
                    state: s.to_string(),
                    recorded_at: now,
                })
                .into_iter()
                .collect();
            let description = description.to_string();

            let id = CharacterId(self.allocate_id(IdKind::Character)?);
            let revision = self.counters.next_revision();
            self.characters.insert(
                id,
                Character {
                    id,
                    name,
                    description,
                    first_appearance: at,
                    snapshots,
                    revision,
                    updated_at: now,
                },
            );
            return Ok((id, true));
        };

        let existing = self
            .characters
            .get(&id)
            .ok_or(MemoryError::CharacterNotFound(id))?;

        let state = non_blank(fields.state.as_deref()).or(non_blank(fields.description.as_deref()));
        if let (Some(_), Some(latest)) = (state, existing.latest_snapshot()) {
            if at < latest.at {
                return Err(MemoryError::OutOfOrderSnapshot {
                    character: id,
                    at,
                    latest: latest.at,
                });
            }
        }

        let mut updated = existing.clone();
        let mut changed = false;
        if let Some(name) = non_blank(fields.name.as_deref()) {
            if name != updated.name {
                updated.name = name.to_string();
                changed = true;
            }
        }
        if let Some(description) = non_blank(fields.description.as_deref()) {
            if description != updated.description {
                updated.description = description.to_string();
                changed = true;
            }
        }
        if let Some(state) = state {
            let duplicate = updated
                .snapshots
                .iter()
                .any(|s| s.at == at && s.state == state);
            if !duplicate {
                updated.snapshots.push(CharacterSnapshot {
                    at,
                    state: state.to_string(),
                    recorded_at: now,
                });
                changed = true;
            }
        }

        if changed {
            updated.revision = self.counters.next_revision();
            updated.updated_at = now;
            self.characters.insert(id, updated);
        }
        Ok((id, changed))
    }

    fn write_plot(
        &mut self,
        id: Option<PlotId>,
        fields: &PlotFields,
        status: PlotStatus,
        at: Moment,
    ) -> Result<(PlotId, bool)> {
        let now = Utc::now();
        let Some(id) = id else {
            let description = non_blank(fields.description.as_deref())
                .ok_or_else(|| {
                    MemoryError::InvalidRecord("plot point requires a description".into())
                })?
                .to_string();
            let mut characters = Vec::new();
            merge_characters(&mut characters, &fields.characters);

            let id = PlotId(self.allocate_id(IdKind::Plot)?);
            let revision = self.counters.next_revision();
            self.plots.insert(
                id,
                PlotPoint {
                    id,
                    description,
                    status,
                    origin: at,
                    closed_at: status.is_closed().then_some(at),
                    status_history: vec![StatusChange { at, status }],
                    characters,
                    revision,
                    updated_at: now,
                },
            );
            return Ok((id, true));
        };

        let existing = self.plots.get(&id).ok_or(MemoryError::PlotNotFound(id))?;
        if !existing.status.can_become(status) {
            warn!(
                plot = %id,
                from = %existing.status,
                to = %status,
                "Rejected plot status transition"
            );
            return Err(MemoryError::InvalidTransition {
                plot: id,
                from: existing.status,
                to: status,
            });
        }

        let mut updated = existing.clone();
        let mut changed = false;
        if let Some(description) = non_blank(fields.description.as_deref()) {
            if description != updated.description {
                updated.description = description.to_string();
                changed = true;
            }
        }
        changed |= merge_characters(&mut updated.characters, &fields.characters);
        if status != updated.status {
            updated.status = status;
            updated.closed_at = Some(at);
            updated.status_history.push(StatusChange { at, status });
            changed = true;
        }

        if changed {
            updated.revision = self.counters.next_revision();
            updated.updated_at = now;
            self.plots.insert(id, updated);
        }
        Ok((id, changed))
    }

    fn persist(&self) -> Result<()> {
        let characters: Vec<&Character> = self.characters.values().collect();
        let plots: Vec<&PlotPoint> = self.plots.values().collect();
        self.files.save_characters(&characters)?;
        self.files.save_plots(&plots)?;
        self.files.save_counters(&self.counters)
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// The `k` eligible records most similar to `text`.
    ///
    /// Embeddings for records whose index entry is missing or stale are
    /// computed first; records themselves are never modified.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`] if the provider fails or returns a
    /// vector of the wrong width.
    pub async fn query_relevant(&mut self, text: &str, k: usize) -> Result<Vec<RelevantRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let embedder = Arc::clone(&self.embedder);
        let dims = embedder.dimensions();

        let cached = self.query_cache.get(text).cloned();
        let query = match cached {
            Some(cached) => cached,
            None => {
                let embedding = embedder.embed(text).await?;
                check_dimensions(&embedding, dims)?;
                self.query_cache.put(text.to_string(), embedding.clone());
                embedding
            }
        };

        let eligible = self.eligible_texts();
        self.fill_index(&eligible).await?;

        let candidates = eligible.iter().filter_map(|(reference, text)| {
            let embedding = self.index.fresh(*reference, fingerprint(text))?;
            Some(Candidate {
                reference: *reference,
                revision: self.revision_of(*reference)?,
                embedding,
            })
        });
        let hits = retrieval::rank(&query, candidates, k);

        let results: Vec<RelevantRecord> = hits
            .into_iter()
            .filter_map(|hit| {
                self.record(hit.reference).map(|record| RelevantRecord {
                    record,
                    similarity: hit.similarity,
                })
            })
            .collect();

        debug!(
            k,
            eligible = eligible.len(),
            returned = results.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Relevant memory query"
        );
        Ok(results)
    }

    /// Drop and recompute every derived embedding.
    ///
    /// Returns the number of records embedded.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`] if the provider fails.
    pub async fn rebuild_index(&mut self) -> Result<usize> {
        let start = Instant::now();
        self.index.clear();
        self.query_cache.clear();

        let all: Vec<(RecordRef, String)> = self
            .characters
            .values()
            .map(|c| (RecordRef::Character(c.id), c.embedding_text()))
            .chain(self.plots.values().map(|p| (RecordRef::Plot(p.id), p.embedding_text())))
            .collect();
        self.fill_index(&all).await?;

        info!(
            records = all.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Derived index rebuilt"
        );
        Ok(all.len())
    }

    async fn fill_index(&mut self, records: &[(RecordRef, String)]) -> Result<()> {
        let stale: Vec<&(RecordRef, String)> = records
            .iter()
            .filter(|(r, text)| self.index.fresh(*r, fingerprint(text)).is_none())
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        let embedder = Arc::clone(&self.embedder);
        let texts: Vec<String> = stale.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        for ((reference, text), embedding) in stale.into_iter().zip(embeddings) {
            check_dimensions(&embedding, embedder.dimensions())?;
            self.index.insert(*reference, embedding, fingerprint(text));
        }
        debug!(embedded = texts.len(), "Filled derived index");
        Ok(())
    }

    /// Embedding source text of every record retrieval may return.
    fn eligible_texts(&self) -> Vec<(RecordRef, String)> {
        let include_closed = self.include_closed_plots;
        self.characters
            .values()
            .map(|c| (RecordRef::Character(c.id), c.embedding_text()))
            .chain(
                self.plots
                    .values()
                    .filter(|p| include_closed || !p.status.is_closed())
                    .map(|p| (RecordRef::Plot(p.id), p.embedding_text())),
            )
            .collect()
    }

    fn revision_of(&self, reference: RecordRef) -> Option<u64> {
        match reference {
            RecordRef::Character(id) => self.characters.get(&id).map(|c| c.revision),
            RecordRef::Plot(id) => self.plots.get(&id).map(|p| p.revision),
        }
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    /// Clone of the record behind `reference`.
    #[must_use]
    pub fn record(&self, reference: RecordRef) -> Option<MemoryRecord> {
        match reference {
            RecordRef::Character(id) => self.characters.get(&id).cloned().map(MemoryRecord::Character),
            RecordRef::Plot(id) => self.plots.get(&id).cloned().map(MemoryRecord::Plot),
        }
    }

    /// A character by id.
    #[must_use]
    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    /// A plot point by id.
    #[must_use]
    pub fn plot(&self, id: PlotId) -> Option<&PlotPoint> {
        self.plots.get(&id)
    }

    /// All characters in id order.
    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    /// All plot points in id order.
    pub fn plots(&self) -> impl Iterator<Item = &PlotPoint> {
        self.plots.values()
    }

    /// First character whose name matches `name`, ignoring case and
    /// surrounding whitespace.
    #[must_use]
    pub fn find_character_by_name(&self, name: &str) -> Option<&Character> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.characters
            .values()
            .find(|c| c.name.trim().to_lowercase() == wanted)
    }

    /// Number of characters.
    #[must_use]
    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    /// Number of plot points.
    #[must_use]
    pub fn plot_count(&self) -> usize {
        self.plots.len()
    }

    /// Number of derived index entries currently cached.
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        self.index.len()
    }

    /// The provider embedding records and queries.
    #[must_use]
    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Current durable counters.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Flush every record file and release the store.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] if a file cannot be written.
    pub fn close(self) -> Result<()> {
        self.persist()?;
        info!(
            characters = self.characters.len(),
            plots = self.plots.len(),
            "Memory store closed"
        );
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Add ids not already present; returns whether anything was added.
fn merge_characters(into: &mut Vec<CharacterId>, extra: &[CharacterId]) -> bool {
    let mut added = false;
    for id in extra {
        if !into.contains(id) {
            into.push(*id);
            added = true;
        }
    }
    added
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
