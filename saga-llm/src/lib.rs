//! # saga-llm: Language Model Layer for Saga
//!
//! Provides a unified interface for model inference across backends:
//!   - **OpenAI-compatible API** (`/v1/chat/completions`, default)
//!   - **Ollama** (local, `/api/generate`)
//!   - **None** (every call fails with `Unavailable`)
//!
//! All model calls in saga go through the [`LanguageModel`] trait, which
//! gives:
//!   - a model per role (planner, generator, critic, extractor)
//!   - JSON mode for structured steps
//!   - an explicit timeout on every request
//!   - opt-in retries (off by default)
//!
//! # Roles
//!
//! ```text
//! Planner:   premise -> story plan (JSON)              [large model]
//! Generator: plan slice + memory -> episode script     [large model]
//! Critic:    script + continuity -> critique           [large model]
//! Extractor: script -> memory deltas (JSON)            [small model]
//! ```

pub mod client;
pub mod error;
pub mod model;
pub mod prompt;
pub mod types;

pub use client::{LlmClient, LlmProvider, RoleModels, UsageStats};
pub use error::LlmError;
pub use model::{LanguageModel, ScriptedModel};
pub use prompt::{PromptEngine, PromptId};
pub use types::{CharacterOutline, EpisodeOutline, LlmRequest, LlmResponse, ModelRole, PlanResponse};
