//! Core type definitions for the saga continuity memory.
//!
//! All record types are serializable; they are the exact shape written to
//! the JSON record files by [`crate::persistence`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Zero-based position of an episode inside a story plan.
pub type EpisodeIndex = u32;

/// Identifier of a character record. Allocated from a durable counter and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub u64);

/// Identifier of a plot point record. Allocated from a durable counter and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlotId(pub u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Entity kinds that draw identifiers from a durable counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    /// Character identifiers.
    Character,
    /// Plot point identifiers.
    Plot,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Character => f.write_str("character"),
            Self::Plot => f.write_str("plot"),
        }
    }
}

/// Reference to one authoritative record, used as the derived-index key.
///
/// Ordered by numeric identifier first, then characters before plots, which
/// is the final tie-breaker of similarity retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum RecordRef {
    /// A character record.
    Character(CharacterId),
    /// A plot point record.
    Plot(PlotId),
}

impl RecordRef {
    /// The raw numeric identifier.
    #[must_use]
    pub fn raw_id(self) -> u64 {
        match self {
            Self::Character(id) => id.0,
            Self::Plot(id) => id.0,
        }
    }

    fn kind_rank(self) -> u8 {
        match self {
            Self::Character(_) => 0,
            Self::Plot(_) => 1,
        }
    }
}

impl Ord for RecordRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw_id()
            .cmp(&other.raw_id())
            .then_with(|| self.kind_rank().cmp(&other.kind_rank()))
    }
}

impl PartialOrd for RecordRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Character(id) => write!(f, "{id}"),
            Self::Plot(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Story time
// ---------------------------------------------------------------------------

/// The point in story time at which a memory fact was recorded.
///
/// `Planning` covers facts seeded from the story plan and sorts before every
/// episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Moment {
    /// Seeded from the story plan, before any episode was generated.
    Planning,
    /// Recorded while committing the given episode.
    Episode(EpisodeIndex),
}

impl Moment {
    /// Whether this moment lies strictly before the start of `episode`.
    #[must_use]
    pub fn is_before(self, episode: EpisodeIndex) -> bool {
        self < Moment::Episode(episode)
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => f.write_str("planning"),
            Self::Episode(n) => write!(f, "episode {n}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

/// One recorded state of a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    /// When in the story this state was recorded.
    pub at: Moment,
    /// Natural-language description of the character's state.
    pub state: String,
    /// Wall-clock time the snapshot was written.
    pub recorded_at: DateTime<Utc>,
}

/// A tracked character.
///
/// Snapshots are append-only and ordered by [`Moment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    /// Unique identifier.
    pub id: CharacterId,
    /// Display name; unique case-insensitively by convention, not enforced.
    pub name: String,
    /// Stable description (appearance, role, motivation).
    pub description: String,
    /// When the character first entered the memory.
    pub first_appearance: Moment,
    /// State history, oldest first.
    pub snapshots: Vec<CharacterSnapshot>,
    /// Global update sequence number of the last change.
    pub revision: u64,
    /// Wall-clock time of the last change.
    pub updated_at: DateTime<Utc>,
}

impl Character {
    /// The most recent snapshot, if any.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<&CharacterSnapshot> {
        self.snapshots.last()
    }

    /// Snapshots recorded strictly before `episode`.
    pub fn snapshots_before(&self, episode: EpisodeIndex) -> impl Iterator<Item = &CharacterSnapshot> {
        self.snapshots.iter().filter(move |s| s.at.is_before(episode))
    }

    /// Text used to compute this record's embedding.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        match self.latest_snapshot() {
            Some(s) => format!("{}: {} Current state: {}", self.name, self.description, s.state),
            None => format!("{}: {}", self.name, self.description),
        }
    }
}

/// Fields accepted by a character upsert. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterFields {
    /// New display name (required on create).
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// State to record as a snapshot; falls back to the description.
    #[serde(default)]
    pub state: Option<String>,
}

// ---------------------------------------------------------------------------
// Plot points
// ---------------------------------------------------------------------------

/// Lifecycle status of a plot point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotStatus {
    /// The thread is live.
    Open,
    /// The thread was concluded in the story.
    Resolved,
    /// The thread was dropped.
    Abandoned,
}

impl PlotStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub fn is_closed(self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Whether a plot in `self` may be written with status `next`.
    ///
    /// An open plot may stay open or close. A closed plot accepts no further
    /// writes, including a repeat of its own status.
    #[must_use]
    pub fn can_become(self, next: Self) -> bool {
        matches!((self, next), (Self::Open, _))
    }
}

impl fmt::Display for PlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Resolved => f.write_str("resolved"),
            Self::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// One entry of a plot point's status history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// When the status was set.
    pub at: Moment,
    /// The status from that moment on.
    pub status: PlotStatus,
}

/// A tracked plot thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotPoint {
    /// Unique identifier.
    pub id: PlotId,
    /// Summary of the thread.
    pub description: String,
    /// Current status.
    pub status: PlotStatus,
    /// When the thread was introduced.
    pub origin: Moment,
    /// When the thread was resolved or abandoned; `None` while open.
    pub closed_at: Option<Moment>,
    /// Every status the thread has held, oldest first.
    pub status_history: Vec<StatusChange>,
    /// Characters involved. Dangling ids are tolerated.
    #[serde(default)]
    pub characters: Vec<CharacterId>,
    /// Global update sequence number of the last change.
    pub revision: u64,
    /// Wall-clock time of the last change.
    pub updated_at: DateTime<Utc>,
}

impl PlotPoint {
    /// The latest status recorded strictly before `episode`.
    #[must_use]
    pub fn status_before(&self, episode: EpisodeIndex) -> Option<StatusChange> {
        self.status_history
            .iter()
            .rev()
            .find(|c| c.at.is_before(episode))
            .copied()
    }

    /// Text used to compute this record's embedding.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!("Plot thread ({}): {}", self.status, self.description)
    }
}

/// Fields accepted by a plot upsert. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotFields {
    /// New summary (required on create).
    #[serde(default)]
    pub description: Option<String>,
    /// Characters to associate; merged with existing ones.
    #[serde(default)]
    pub characters: Vec<CharacterId>,
}

// ---------------------------------------------------------------------------
// Unified record view
// ---------------------------------------------------------------------------

/// Either kind of authoritative record.
#[derive(Debug, Clone)]
pub enum MemoryRecord {
    /// A character.
    Character(Character),
    /// A plot point.
    Plot(PlotPoint),
}

impl MemoryRecord {
    /// Key of the record in the derived index.
    #[must_use]
    pub fn reference(&self) -> RecordRef {
        match self {
            Self::Character(c) => RecordRef::Character(c.id),
            Self::Plot(p) => RecordRef::Plot(p.id),
        }
    }

    /// Global update sequence number of the last change.
    #[must_use]
    pub fn revision(&self) -> u64 {
        match self {
            Self::Character(c) => c.revision,
            Self::Plot(p) => p.revision,
        }
    }

    /// Text used to compute the record embedding.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        match self {
            Self::Character(c) => c.embedding_text(),
            Self::Plot(p) => p.embedding_text(),
        }
    }

    /// One-line rendering for prompts.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Character(c) => {
                let state = c
                    .latest_snapshot()
                    .map_or(String::new(), |s| format!(" (as of {}: {})", s.at, s.state));
                format!("[character {}] {}: {}{state}", c.id.0, c.name, c.description)
            }
            Self::Plot(p) => format!("[plot {}] {} (status: {})", p.id.0, p.description, p.status),
        }
    }
}

/// A record returned by similarity retrieval.
#[derive(Debug, Clone)]
pub struct RelevantRecord {
    /// The authoritative record.
    pub record: MemoryRecord,
    /// Cosine similarity between the query and the record embedding.
    pub similarity: f32,
}

// ---------------------------------------------------------------------------
// Memory Embedding Vector
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Cosine similarity between two embeddings.
    /// Returns 0.0 if the dimensions differ or either vector is zero-length.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }
}
