//! Story pipeline errors.

use std::fmt;

use saga_core::MemoryError;
use saga_llm::LlmError;
use thiserror::Error;

/// The pipeline step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Drafting or seeding the story plan.
    Plan,
    /// Writing an episode script.
    Generate,
    /// Critique and delta extraction.
    Refine,
    /// Auditing and committing memory deltas.
    Commit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plan => "plan",
            Self::Generate => "generate",
            Self::Refine => "refine",
            Self::Commit => "commit",
        })
    }
}

/// Errors surfaced by the story pipeline.
#[derive(Debug, Error)]
pub enum StoryError {
    /// The premise, episode count or model plan was rejected.
    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    /// An episode index outside the plan.
    #[error("Episode index {index} is out of range (plan has {episode_count} episodes)")]
    InvalidEpisodeIndex {
        /// Requested index.
        index: u32,
        /// Episodes in the plan.
        episode_count: u32,
    },

    /// The operation is not allowed in the pipeline's current state.
    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    /// A model reply could not be used.
    #[error("Malformed model output during {step}: {detail}")]
    MalformedOutput {
        /// Failing step.
        step: Step,
        /// What was wrong.
        detail: String,
    },

    /// A model call failed.
    #[error("Model call failed during {step}: {source}")]
    Llm {
        /// Failing step.
        step: Step,
        /// Underlying error.
        #[source]
        source: LlmError,
    },

    /// The memory store rejected or failed an operation.
    #[error("Memory store failed during {step}: {source}")]
    Store {
        /// Failing step.
        step: Step,
        /// Underlying error.
        #[source]
        source: MemoryError,
    },
}

impl StoryError {
    /// The step that failed, when the error belongs to one.
    #[must_use]
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::PlanValidation(_) => Some(Step::Plan),
            Self::InvalidEpisodeIndex { .. } => Some(Step::Generate),
            Self::InvalidState(_) => None,
            Self::MalformedOutput { step, .. } | Self::Llm { step, .. } | Self::Store { step, .. } => {
                Some(*step)
            }
        }
    }

    pub(crate) fn llm(step: Step) -> impl FnOnce(LlmError) -> Self {
        move |source| Self::Llm { step, source }
    }

    pub(crate) fn store(step: Step) -> impl FnOnce(MemoryError) -> Self {
        move |source| Self::Store { step, source }
    }

    pub(crate) fn malformed(step: Step, detail: impl Into<String>) -> Self {
        Self::MalformedOutput { step, detail: detail.into() }
    }
}

/// Convenience result type for story operations.
pub type Result<T> = std::result::Result<T, StoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_their_step() {
        let err = StoryError::llm(Step::Refine)(LlmError::Timeout(100));
        assert_eq!(err.step(), Some(Step::Refine));
        assert!(err.to_string().contains("during refine"));

        let err = StoryError::InvalidEpisodeIndex { index: 5, episode_count: 3 };
        assert_eq!(err.step(), Some(Step::Generate));
        assert!(StoryError::InvalidState("idle".into()).step().is_none());
    }
}
