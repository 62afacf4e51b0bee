//! Planner: premise -> story plan, in one JSON-mode exchange.

use std::time::Instant;

use saga_llm::{LanguageModel, LlmClient, PlanResponse, PromptEngine, PromptId};
use tracing::{debug, info};

use crate::error::{Result, Step, StoryError};
use crate::plan::StoryPlan;

/// Drafts story plans.
#[derive(Debug, Clone, Copy)]
pub struct Planner<'a> {
    prompts: &'a PromptEngine,
    timeout_ms: u64,
}

impl<'a> Planner<'a> {
    /// A planner rendering prompts from `prompts`.
    #[must_use]
    pub fn new(prompts: &'a PromptEngine, timeout_ms: u64) -> Self {
        Self { prompts, timeout_ms }
    }

    /// Ask the model for a plan with exactly `episode_count` episodes.
    ///
    /// # Errors
    ///
    /// `PlanValidation` for a blank premise, a zero count (both before any
    /// model call) or a reply that breaks the plan schema; `Llm` when the
    /// call fails.
    pub async fn plan(
        &self,
        model: &dyn LanguageModel,
        premise: &str,
        episode_count: u32,
    ) -> Result<StoryPlan> {
        let premise = premise.trim();
        if premise.is_empty() {
            return Err(StoryError::PlanValidation("premise is empty".into()));
        }
        if episode_count == 0 {
            return Err(StoryError::PlanValidation("episode count must be at least 1".into()));
        }

        let start = Instant::now();
        let count = episode_count.to_string();
        let request = self
            .prompts
            .request(PromptId::Planner, &[("premise", premise), ("episode_count", count.as_str())])
            .map_err(StoryError::llm(Step::Plan))?
            .with_timeout(self.timeout_ms);

        let response = model.generate(&request).await.map_err(StoryError::llm(Step::Plan))?;
        let parsed: PlanResponse = LlmClient::parse_structured(&response)
            .map_err(|e| StoryError::PlanValidation(e.to_string()))?;
        let plan = StoryPlan::from_response(parsed, episode_count)?;

        debug!(elapsed_us = start.elapsed().as_micros(), "plan parsed");
        info!(
            title = %plan.title,
            episodes = plan.episode_count(),
            characters = plan.characters.len(),
            "Story plan drafted"
        );
        Ok(plan)
    }
}
