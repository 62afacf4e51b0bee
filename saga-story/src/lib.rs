//! # saga-story: episodic story pipeline
//!
//! Sequences planning, generation, critique and memory update one episode
//! at a time:
//!
//! ```text
//! premise --Planner--> StoryPlan --seed--> MemoryStore
//!                         |       --overview--> ExcerptIndex
//!            (per episode) v
//!   MemoryStore + ExcerptIndex --query--> Generator --script--> Refiner --deltas--> audit --> apply_batch
//!                                                      |           |
//!                                                      |           +--critique--> EpisodeArtifact
//!                                                      +--chunks (after commit)--> ExcerptIndex
//! ```
//!
//! Model calls go through [`saga_llm::LanguageModel`]; memory lives in a
//! [`saga_core::MemoryStore`] owned by the [`StoryPipeline`].

pub mod artifact;
pub mod audit;
pub mod bootstrap;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod plan;
pub mod planner;
pub mod refiner;

pub use artifact::EpisodeArtifact;
pub use embedder::RemoteEmbeddingProvider;
pub use error::{Step, StoryError};
pub use generator::{Generator, MemoryContext};
pub use pipeline::{PipelineSettings, PipelineState, StoryPipeline};
pub use plan::StoryPlan;
pub use planner::Planner;
pub use refiner::{ExtractionPayload, PriorMemory, Refinement, Refiner};
