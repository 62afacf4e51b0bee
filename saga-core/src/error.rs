//! Error types for the saga memory store.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{CharacterId, Moment, PlotId, PlotStatus};

/// Top-level error type for all memory store operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// A durable record or counter file could not be read or written.
    #[error("Storage error at {path}: {source}")]
    Storage {
        /// The file involved.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A record file exists but does not decode, or a record failed to encode.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A plot status change would leave a terminal status.
    #[error("Invalid status transition for plot {plot}: {from} -> {to}")]
    InvalidTransition {
        /// The plot point.
        plot: PlotId,
        /// Current status.
        from: PlotStatus,
        /// Requested status.
        to: PlotStatus,
    },

    /// An update referenced a character id that is not in the store.
    #[error("Character not found: {0}")]
    CharacterNotFound(CharacterId),

    /// An update referenced a plot id that is not in the store.
    #[error("Plot point not found: {0}")]
    PlotNotFound(PlotId),

    /// A snapshot would be recorded earlier than the character's latest one.
    #[error("Snapshot at {at} for character {character} precedes latest snapshot at {latest}")]
    OutOfOrderSnapshot {
        /// The character.
        character: CharacterId,
        /// Requested moment.
        at: Moment,
        /// Moment of the latest existing snapshot.
        latest: Moment,
    },

    /// Required fields are missing or malformed.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The embedding provider failed or returned an unusable vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Whether the error comes from durable storage rather than caller input.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Serialization(_) | Self::Io(_))
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MemoryError>;
