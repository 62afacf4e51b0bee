//! Generator: plan slice + memory context -> episode script.

use std::fmt::Write;

use saga_core::{EpisodeIndex, ExcerptIndex, MemoryStore, RelevantExcerpt, RelevantRecord};
use saga_llm::{LanguageModel, PromptEngine, PromptId};
use tracing::info;

use crate::error::{Result, Step, StoryError};
use crate::plan::StoryPlan;

/// Memory handed to the generator and critic for one episode.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    /// Continuity established before the episode.
    pub continuity: String,
    /// Records most similar to the episode outline.
    pub relevant: Vec<RelevantRecord>,
    /// Passages of the overview and earlier scripts most similar to the
    /// episode outline.
    pub excerpts: Vec<RelevantExcerpt>,
}

impl MemoryContext {
    /// Gather the continuity summary, the `top_k` records most similar to
    /// the episode's outline and the `excerpt_k` closest passages written
    /// before the episode.
    ///
    /// # Errors
    ///
    /// `InvalidEpisodeIndex` outside the plan; `Store` when retrieval fails.
    pub async fn gather(
        store: &mut MemoryStore,
        excerpts: &ExcerptIndex,
        plan: &StoryPlan,
        index: EpisodeIndex,
        top_k: usize,
        excerpt_k: usize,
    ) -> Result<Self> {
        let outline = plan.episode(index)?;
        let mut query = format!("{}. {}", outline.title, outline.summary);
        for point in &outline.key_points {
            let _ = write!(query, " {point}");
        }
        let relevant = store
            .query_relevant(&query, top_k)
            .await
            .map_err(StoryError::store(Step::Generate))?;
        let excerpts = excerpts
            .query(&query, index, excerpt_k, store.embedder())
            .await
            .map_err(StoryError::store(Step::Generate))?;
        Ok(Self {
            continuity: store.continuity_summary(index),
            relevant,
            excerpts,
        })
    }

    /// The relevant records as prompt lines.
    #[must_use]
    pub fn relevant_lines(&self) -> String {
        if self.relevant.is_empty() {
            return "None.".to_string();
        }
        self.relevant
            .iter()
            .map(|r| format!("- {}", r.record.describe()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The retrieved passages, each under its source heading.
    #[must_use]
    pub fn excerpt_lines(&self) -> String {
        if self.excerpts.is_empty() {
            return "None.".to_string();
        }
        self.excerpts
            .iter()
            .map(|r| format!("[{}]\n{}", r.excerpt.label(), r.excerpt.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Writes episode scripts.
#[derive(Debug, Clone, Copy)]
pub struct Generator<'a> {
    prompts: &'a PromptEngine,
    timeout_ms: u64,
}

impl<'a> Generator<'a> {
    /// A generator rendering prompts from `prompts`.
    #[must_use]
    pub fn new(prompts: &'a PromptEngine, timeout_ms: u64) -> Self {
        Self { prompts, timeout_ms }
    }

    /// Write the script for episode `index` in one exchange.
    ///
    /// # Errors
    ///
    /// `InvalidEpisodeIndex` before any model call when `index` is outside
    /// the plan; `Llm` when the call fails; `MalformedOutput` for an empty
    /// script.
    pub async fn generate_episode(
        &self,
        model: &dyn LanguageModel,
        plan: &StoryPlan,
        index: EpisodeIndex,
        memory: &MemoryContext,
    ) -> Result<String> {
        let outline = plan.episode(index)?;

        let number = (index + 1).to_string();
        let count = plan.episode_count().to_string();
        let key_points = if outline.key_points.is_empty() {
            "- (none listed)".to_string()
        } else {
            outline
                .key_points
                .iter()
                .map(|p| format!("- {p}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let relevant = memory.relevant_lines();
        let excerpts = memory.excerpt_lines();

        let request = self
            .prompts
            .request(
                PromptId::Generator,
                &[
                    ("title", plan.title.as_str()),
                    ("premise", plan.premise.as_str()),
                    ("setting", plan.setting.as_str()),
                    ("episode_number", number.as_str()),
                    ("episode_count", count.as_str()),
                    ("episode_title", outline.title.as_str()),
                    ("episode_summary", outline.summary.as_str()),
                    ("key_points", key_points.as_str()),
                    ("continuity", memory.continuity.as_str()),
                    ("relevant_memory", relevant.as_str()),
                    ("relevant_excerpts", excerpts.as_str()),
                ],
            )
            .map_err(StoryError::llm(Step::Generate))?
            .with_timeout(self.timeout_ms);

        let response = model
            .generate(&request)
            .await
            .map_err(StoryError::llm(Step::Generate))?;
        let script = response.text.trim();
        if script.is_empty() {
            return Err(StoryError::malformed(Step::Generate, "model returned an empty script"));
        }

        info!(
            episode = index,
            chars = script.len(),
            tokens = response.tokens_generated,
            "Episode script generated"
        );
        Ok(script.to_string())
    }
}

#[cfg(test)]
mod tests {
    use saga_core::{Excerpt, ExcerptSource};
    use saga_llm::{ModelRole, ScriptedModel};

    use super::*;
    use crate::plan::tests::response;

    fn plan() -> StoryPlan {
        StoryPlan::from_response(response(3), 3).expect("plan")
    }

    #[tokio::test]
    async fn out_of_range_index_never_calls_the_model() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        let err = Generator::new(&prompts, 1000)
            .generate_episode(&model, &plan(), 5, &MemoryContext::default())
            .await
            .expect_err("out of range");
        assert!(matches!(err, StoryError::InvalidEpisodeIndex { index: 5, episode_count: 3 }));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn prompt_carries_plan_slice_and_memory() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        model.push(ModelRole::Generator, "  INT. DOCKS - NIGHT\n\nMARA\nTalk.  ");
        let memory = MemoryContext {
            continuity: "Characters:\n- Mara Voss: A tired detective\n".into(),
            relevant: Vec::new(),
            excerpts: vec![RelevantExcerpt {
                excerpt: Excerpt {
                    source: ExcerptSource::Episode(0),
                    ordinal: 0,
                    text: "MARA\nThe ledger is gone.".into(),
                },
                similarity: 0.5,
            }],
        };

        let script = Generator::new(&prompts, 1000)
            .generate_episode(&model, &plan(), 1, &memory)
            .await
            .expect("script");
        assert_eq!(script, "INT. DOCKS - NIGHT\n\nMARA\nTalk.");

        let sent = &model.requests()[0];
        assert!(!sent.json_mode);
        assert!(sent.system.contains("Episode 2 of 3"));
        assert!(sent.user.contains("Part 1"));
        assert!(sent.user.contains("- Clue 1"));
        assert!(sent.user.contains("Mara Voss: A tired detective"));
        assert!(sent.user.contains("[Episode 1, part 1]\nMARA\nThe ledger is gone."));
    }

    #[tokio::test]
    async fn blank_script_is_malformed() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        model.push(ModelRole::Generator, "   \n");
        let err = Generator::new(&prompts, 1000)
            .generate_episode(&model, &plan(), 0, &MemoryContext::default())
            .await
            .expect_err("blank");
        assert!(matches!(err, StoryError::MalformedOutput { step: Step::Generate, .. }));
    }
}
