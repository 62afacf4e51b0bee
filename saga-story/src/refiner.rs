//! Refiner: script -> critique and proposed memory deltas.
//!
//! Two exchanges per episode: a free-text critique, then a JSON-mode
//! extraction. The refiner never writes to the store.

use std::fmt::Write;

use saga_core::{EpisodeIndex, MemoryDelta, MemoryStore};
use saga_llm::{LanguageModel, LlmClient, PromptEngine, PromptId};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, Step, StoryError};
use crate::plan::StoryPlan;

/// What the extractor returns.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionPayload {
    /// Proposed memory changes.
    pub deltas: Vec<MemoryDelta>,
    /// One or two sentence summary of the episode.
    #[serde(default)]
    pub key_event_summary: String,
}

/// Output of one refinement pass.
#[derive(Debug, Clone)]
pub struct Refinement {
    /// Editor feedback on the script.
    pub critique: String,
    /// Proposed, not yet audited, memory deltas.
    pub deltas: Vec<MemoryDelta>,
    /// Episode summary from the extractor.
    pub key_event_summary: String,
}

/// Store views the refiner's prompts need, taken before the episode is
/// committed.
#[derive(Debug, Clone, Default)]
pub struct PriorMemory {
    /// Continuity summary before the episode.
    pub continuity: String,
    /// `id: name` per known character.
    pub known_characters: String,
    /// `id: description` per open plot thread.
    pub open_plots: String,
}

impl PriorMemory {
    /// Snapshot the store as it stands before `index` is committed.
    #[must_use]
    pub fn capture(store: &MemoryStore, index: EpisodeIndex) -> Self {
        let mut known_characters = String::new();
        for c in store.characters() {
            let _ = writeln!(known_characters, "{}: {}", c.id.0, c.name);
        }
        let mut open_plots = String::new();
        for p in store.active_plots() {
            let _ = writeln!(open_plots, "{}: {}", p.id.0, p.description);
        }
        Self {
            continuity: store.continuity_summary(index),
            known_characters: or_none(known_characters),
            open_plots: or_none(open_plots),
        }
    }
}

fn or_none(text: String) -> String {
    if text.is_empty() { "None.".to_string() } else { text }
}

/// Critiques scripts and extracts memory deltas.
#[derive(Debug, Clone, Copy)]
pub struct Refiner<'a> {
    prompts: &'a PromptEngine,
    timeout_ms: u64,
    max_extraction_chars: usize,
}

impl<'a> Refiner<'a> {
    /// A refiner rendering prompts from `prompts`; scripts longer than
    /// `max_extraction_chars` are cut before extraction.
    #[must_use]
    pub fn new(prompts: &'a PromptEngine, timeout_ms: u64, max_extraction_chars: usize) -> Self {
        Self {
            prompts,
            timeout_ms,
            max_extraction_chars,
        }
    }

    /// Critique `script` and extract the memory changes it implies.
    ///
    /// # Errors
    ///
    /// `InvalidEpisodeIndex` outside the plan; `Llm` when either call fails;
    /// `MalformedOutput` for an empty critique or an extraction reply that
    /// does not match the delta schema.
    pub async fn refine(
        &self,
        model: &dyn LanguageModel,
        script: &str,
        index: EpisodeIndex,
        plan: &StoryPlan,
        prior: &PriorMemory,
    ) -> Result<Refinement> {
        let outline = plan.episode(index)?;
        let number = (index + 1).to_string();

        let critique_request = self
            .prompts
            .request(
                PromptId::Critic,
                &[
                    ("episode_number", number.as_str()),
                    ("episode_summary", outline.summary.as_str()),
                    ("continuity", prior.continuity.as_str()),
                    ("script", script),
                ],
            )
            .map_err(StoryError::llm(Step::Refine))?
            .with_timeout(self.timeout_ms);
        let critique = model
            .generate(&critique_request)
            .await
            .map_err(StoryError::llm(Step::Refine))?
            .text
            .trim()
            .to_string();
        if critique.is_empty() {
            return Err(StoryError::malformed(Step::Refine, "critic returned an empty critique"));
        }

        let excerpt = truncate_chars(script, self.max_extraction_chars);
        if excerpt.len() < script.len() {
            warn!(
                episode = index,
                kept = excerpt.len(),
                total = script.len(),
                "Script truncated for extraction"
            );
        }
        let extract_request = self
            .prompts
            .request(
                PromptId::Extractor,
                &[
                    ("episode_number", number.as_str()),
                    ("known_characters", prior.known_characters.as_str()),
                    ("open_plots", prior.open_plots.as_str()),
                    ("script", excerpt),
                ],
            )
            .map_err(StoryError::llm(Step::Refine))?
            .with_timeout(self.timeout_ms);
        let response = model
            .generate(&extract_request)
            .await
            .map_err(StoryError::llm(Step::Refine))?;
        let payload: ExtractionPayload = LlmClient::parse_structured(&response)
            .map_err(|e| StoryError::malformed(Step::Refine, e.to_string()))?;

        info!(
            episode = index,
            deltas = payload.deltas.len(),
            critique_chars = critique.len(),
            "Script refined"
        );
        Ok(Refinement {
            critique,
            deltas: payload.deltas,
            key_event_summary: payload.key_event_summary.trim().to_string(),
        })
    }
}

/// The first `max` characters of `text`, on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use saga_core::{DeltaKind, DeltaOp};
    use saga_llm::{LlmError, ModelRole, ScriptedModel};

    use super::*;
    use crate::plan::tests::response;

    fn plan() -> StoryPlan {
        StoryPlan::from_response(response(3), 3).expect("plan")
    }

    const EXTRACTION: &str = r#"{
        "deltas": [
            {"kind": "character", "op": "update", "id": 1, "fields": {"state": "Suspects Teo"}},
            {"kind": "plot", "op": "create", "fields": {"description": "Teo is hiding something"}}
        ],
        "key_event_summary": "Mara confronts Teo at the docks."
    }"#;

    #[tokio::test]
    async fn critique_then_extraction() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        model
            .push(ModelRole::Critic, "Looks good. Pacing is tight.")
            .push(ModelRole::Extractor, EXTRACTION);

        let refinement = Refiner::new(&prompts, 1000, 12_000)
            .refine(&model, "MARA\nWhere is it?", 0, &plan(), &PriorMemory::default())
            .await
            .expect("refine");
        assert_eq!(refinement.critique, "Looks good. Pacing is tight.");
        assert_eq!(refinement.deltas.len(), 2);
        assert_eq!(refinement.deltas[1].kind, DeltaKind::Plot);
        assert_eq!(refinement.deltas[1].op, DeltaOp::Create);
        assert_eq!(refinement.key_event_summary, "Mara confronts Teo at the docks.");

        let sent = model.requests();
        assert_eq!(sent[0].role, ModelRole::Critic);
        assert!(sent[1].json_mode);
    }

    #[tokio::test]
    async fn empty_critique_is_malformed() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        model.push(ModelRole::Critic, "  ");
        let err = Refiner::new(&prompts, 1000, 12_000)
            .refine(&model, "script", 0, &plan(), &PriorMemory::default())
            .await
            .expect_err("empty");
        assert!(matches!(err, StoryError::MalformedOutput { step: Step::Refine, .. }));
        assert_eq!(model.calls(ModelRole::Extractor), 0);
    }

    #[tokio::test]
    async fn unknown_op_is_malformed() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        model
            .push(ModelRole::Critic, "Fine.")
            .push(ModelRole::Extractor, r#"{"deltas": [{"kind": "plot", "op": "explode", "id": 1}]}"#);
        let err = Refiner::new(&prompts, 1000, 12_000)
            .refine(&model, "script", 0, &plan(), &PriorMemory::default())
            .await
            .expect_err("bad op");
        assert!(matches!(err, StoryError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn extractor_failure_names_refine() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        model
            .push(ModelRole::Critic, "Fine.")
            .push_error(ModelRole::Extractor, LlmError::Timeout(1000));
        let err = Refiner::new(&prompts, 1000, 12_000)
            .refine(&model, "script", 0, &plan(), &PriorMemory::default())
            .await
            .expect_err("timeout");
        assert_eq!(err.step(), Some(Step::Refine));
    }

    #[tokio::test]
    async fn long_scripts_are_cut_for_extraction_only() {
        let prompts = PromptEngine::builtin();
        let model = ScriptedModel::new();
        model
            .push(ModelRole::Critic, "Fine.")
            .push(ModelRole::Extractor, r#"{"deltas": []}"#);
        let script = format!("{}TAIL", "é".repeat(20));
        Refiner::new(&prompts, 1000, 10)
            .refine(&model, &script, 0, &plan(), &PriorMemory::default())
            .await
            .expect("refine");

        let sent = model.requests();
        assert!(sent[0].user.contains("TAIL"));
        assert!(!sent[1].user.contains("TAIL"));
        assert!(sent[1].user.contains(&"é".repeat(10)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
