//! # Saga Core Library
//!
//! Continuity memory for episodic story generation.
//!
//! A [`MemoryStore`] owns two kinds of authoritative record:
//!
//! - **Characters**: name, description and an append-only history of
//!   states, each tagged with the [`Moment`] it was recorded at.
//! - **Plot points**: a thread's description and a status that only ever
//!   moves from open to resolved or abandoned.
//!
//! Records live in flat JSON files under a data directory, written
//! atomically on every change. Identifiers come from durable counters and
//! are never reused. A derived embedding index, rebuilt lazily, answers
//! "which records matter for this text" with exact cosine ranking.
//!
//! Committed scripts are chunked into an [`ExcerptIndex`], a second derived
//! index that surfaces passages of earlier episodes.
//!
//! Changes proposed by a model arrive as [`MemoryDelta`]s and are applied
//! all-or-nothing through [`MemoryStore::apply_batch`].

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod continuity;
pub mod delta;
pub mod embedding;
pub mod error;
pub mod excerpts;
pub mod index;
pub mod persistence;
pub mod retrieval;
pub mod store;
pub mod types;

pub use config::SagaConfig;
pub use delta::{AppliedDelta, DeltaFields, DeltaKind, DeltaOp, MemoryDelta};
pub use embedding::EmbeddingProvider;
pub use error::MemoryError;
pub use excerpts::{Excerpt, ExcerptIndex, ExcerptSource, RelevantExcerpt};
pub use store::MemoryStore;
pub use types::*;
