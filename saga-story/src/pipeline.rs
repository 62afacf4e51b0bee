//! The episode state machine.
//!
//! ```text
//! Idle --plan--> Planned --advance--> GeneratingEpisode(0) --> EpisodeReady(0)
//!                                     ... --> EpisodeReady(n-2) --advance--> Done
//! ```
//!
//! Each `advance` runs one episode end to end: gather memory, generate,
//! refine, audit, commit, record the artifact. Nothing is committed unless
//! every step succeeds, and a failed step leaves the pipeline in the state it
//! had before the call.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use saga_core::{EpisodeIndex, ExcerptIndex, ExcerptSource, MemoryStore, Moment, SagaConfig};
use saga_llm::{LanguageModel, PromptEngine};
use tracing::{info, warn};

use crate::artifact::EpisodeArtifact;
use crate::audit::audit_deltas;
use crate::error::{Result, Step, StoryError};
use crate::generator::{Generator, MemoryContext};
use crate::plan::StoryPlan;
use crate::planner::Planner;
use crate::refiner::{PriorMemory, Refiner};

/// Where the pipeline stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No plan yet.
    Idle,
    /// A plan exists; no episode generated.
    Planned,
    /// An episode is in flight.
    GeneratingEpisode(EpisodeIndex),
    /// The given episode is the latest completed one.
    EpisodeReady(EpisodeIndex),
    /// Every planned episode has been generated.
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Planned => f.write_str("planned"),
            Self::GeneratingEpisode(n) => write!(f, "generating episode {}", n + 1),
            Self::EpisodeReady(n) => write!(f, "episode {} ready", n + 1),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Knobs the pipeline takes from [`SagaConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Timeout for every model call.
    pub request_timeout_ms: u64,
    /// Records retrieved per episode.
    pub top_k: usize,
    /// Script excerpts retrieved per episode.
    pub excerpt_top_k: usize,
    /// Maximum characters per script excerpt.
    pub excerpt_chars: usize,
    /// Characters shared between neighbouring excerpts.
    pub excerpt_overlap: usize,
    /// Script prefix handed to the extractor.
    pub max_extraction_chars: usize,
}

impl PipelineSettings {
    /// Settings from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &SagaConfig) -> Self {
        Self {
            request_timeout_ms: config.llm.request_timeout_ms,
            top_k: config.retrieval.top_k,
            excerpt_top_k: config.retrieval.excerpt_top_k,
            excerpt_chars: config.retrieval.excerpt_chars,
            excerpt_overlap: config.retrieval.excerpt_overlap,
            max_extraction_chars: config.story.max_extraction_chars,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&SagaConfig::default())
    }
}

/// Drives planning and episode generation against one memory store.
pub struct StoryPipeline {
    model: Arc<dyn LanguageModel>,
    store: MemoryStore,
    prompts: PromptEngine,
    settings: PipelineSettings,
    state: PipelineState,
    plan: Option<StoryPlan>,
    artifacts: Vec<EpisodeArtifact>,
    excerpts: ExcerptIndex,
}

impl fmt::Debug for StoryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryPipeline")
            .field("state", &self.state)
            .field("plan", &self.plan.as_ref().map(|p| p.title.as_str()))
            .field("artifacts", &self.artifacts.len())
            .field("excerpts", &self.excerpts.len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl StoryPipeline {
    /// A pipeline in `Idle` owning `store`.
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: MemoryStore,
        prompts: PromptEngine,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            model,
            store,
            prompts,
            settings,
            state: PipelineState::Idle,
            plan: None,
            artifacts: Vec::new(),
            excerpts: ExcerptIndex::new(settings.excerpt_chars, settings.excerpt_overlap),
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Draft a plan and seed the store with its roster and plot threads.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside `Idle`; otherwise any planner error, or a
    /// `Store` error from seeding. The state stays `Idle` on failure.
    pub async fn plan(&mut self, premise: &str, episode_count: u32) -> Result<&StoryPlan> {
        if self.state != PipelineState::Idle {
            return Err(StoryError::InvalidState(format!(
                "cannot plan while {}; reset first",
                self.state
            )));
        }

        let plan = Planner::new(&self.prompts, self.settings.request_timeout_ms)
            .plan(self.model.as_ref(), premise, episode_count)
            .await?;

        let seeds = audit_deltas(&self.store, plan.seed_deltas()).map_err(StoryError::store(Step::Plan))?;
        let overview = self
            .excerpts
            .prepare(ExcerptSource::Overview, &plan.overview(), self.store.embedder())
            .await
            .map_err(StoryError::store(Step::Plan))?;
        let applied = self
            .store
            .apply_batch(&seeds, Moment::Planning)
            .map_err(StoryError::store(Step::Plan))?;
        self.excerpts.install(overview);

        info!(title = %plan.title, seeded = applied.len(), "Story planned");
        self.state = PipelineState::Planned;
        let plan = self.plan.insert(plan);
        Ok(&*plan)
    }

    /// Generate the next episode.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Planned` or `EpisodeReady`; otherwise the
    /// failing step's error, with the state restored.
    pub async fn advance(&mut self) -> Result<&EpisodeArtifact> {
        let index = match self.state {
            PipelineState::Planned => 0,
            PipelineState::EpisodeReady(n) => n + 1,
            other => {
                return Err(StoryError::InvalidState(format!("cannot advance while {other}")));
            }
        };

        let previous = self.state;
        self.state = PipelineState::GeneratingEpisode(index);
        match self.run_episode(index).await {
            Ok(artifact) => {
                let last = self.plan.as_ref().map_or(0, StoryPlan::episode_count).saturating_sub(1);
                self.state = if index >= last {
                    PipelineState::Done
                } else {
                    PipelineState::EpisodeReady(index)
                };
                info!(episode = index, state = %self.state, "Episode complete");
                Ok(self.push_artifact(artifact))
            }
            Err(e) => {
                warn!(episode = index, step = ?e.step(), error = %e, "Episode failed");
                self.state = previous;
                Err(e)
            }
        }
    }

    /// Generate an already generated episode again. The new artifact is
    /// appended; earlier ones are kept.
    ///
    /// # Errors
    ///
    /// `InvalidState` while idle, planned or mid-episode, or when `index`
    /// has not been generated yet; otherwise the failing step's error.
    pub async fn regenerate(&mut self, index: EpisodeIndex) -> Result<&EpisodeArtifact> {
        let previous = self.state;
        match previous {
            PipelineState::EpisodeReady(_) | PipelineState::Done => {}
            other => {
                return Err(StoryError::InvalidState(format!("cannot regenerate while {other}")));
            }
        }
        if let Some(plan) = &self.plan {
            plan.episode(index)?;
        }
        if self.latest_artifact(index).is_none() {
            return Err(StoryError::InvalidState(format!(
                "episode {} has not been generated yet",
                index + 1
            )));
        }

        self.state = PipelineState::GeneratingEpisode(index);
        let outcome = self.run_episode(index).await;
        self.state = previous;
        match outcome {
            Ok(artifact) => {
                info!(episode = index, "Episode regenerated");
                Ok(self.push_artifact(artifact))
            }
            Err(e) => {
                warn!(episode = index, step = ?e.step(), error = %e, "Regeneration failed");
                Err(e)
            }
        }
    }

    /// Drop the plan, artifacts and script excerpts and return to `Idle`.
    /// Memory records are kept.
    pub fn reset(&mut self) {
        self.plan = None;
        self.artifacts.clear();
        self.excerpts.clear();
        self.state = PipelineState::Idle;
        info!("Pipeline reset");
    }

    async fn run_episode(&mut self, index: EpisodeIndex) -> Result<EpisodeArtifact> {
        let start = Instant::now();
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| StoryError::InvalidState("no plan".into()))?;
        plan.episode(index)?;
        let model = self.model.as_ref();
        let timeout = self.settings.request_timeout_ms;

        let memory = MemoryContext::gather(
            &mut self.store,
            &self.excerpts,
            plan,
            index,
            self.settings.top_k,
            self.settings.excerpt_top_k,
        )
        .await?;
        let script = Generator::new(&self.prompts, timeout)
            .generate_episode(model, plan, index, &memory)
            .await?;

        let prior = PriorMemory::capture(&self.store, index);
        let refinement = Refiner::new(&self.prompts, timeout, self.settings.max_extraction_chars)
            .refine(model, &script, index, plan, &prior)
            .await?;

        let deltas = audit_deltas(&self.store, refinement.deltas).map_err(StoryError::store(Step::Commit))?;
        let passages = self
            .excerpts
            .prepare(ExcerptSource::Episode(index), &script, self.store.embedder())
            .await
            .map_err(StoryError::store(Step::Commit))?;
        let applied = self
            .store
            .apply_batch(&deltas, Moment::Episode(index))
            .map_err(StoryError::store(Step::Commit))?;
        self.excerpts.install(passages);

        info!(
            episode = index,
            deltas = applied.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Episode committed"
        );
        Ok(EpisodeArtifact::new(
            index,
            script,
            refinement.critique,
            applied,
            refinement.key_event_summary,
        ))
    }

    /// Recompute the excerpt index from the plan overview and the latest
    /// script of every generated episode. Returns the number of excerpts.
    ///
    /// # Errors
    ///
    /// `Store` when the embedding provider fails; the old index is kept.
    pub async fn rebuild_excerpts(&mut self) -> Result<usize> {
        let mut rebuilt = ExcerptIndex::new(self.settings.excerpt_chars, self.settings.excerpt_overlap);
        if let Some(plan) = &self.plan {
            let embedder = self.store.embedder();
            rebuilt
                .replace(ExcerptSource::Overview, &plan.overview(), embedder)
                .await
                .map_err(StoryError::store(Step::Plan))?;
            for index in 0..plan.episode_count() {
                if let Some(artifact) = self.latest_artifact(index) {
                    rebuilt
                        .replace(ExcerptSource::Episode(index), &artifact.script, embedder)
                        .await
                        .map_err(StoryError::store(Step::Commit))?;
                }
            }
        }
        self.excerpts = rebuilt;
        info!(excerpts = self.excerpts.len(), "Excerpt index rebuilt");
        Ok(self.excerpts.len())
    }

    fn push_artifact(&mut self, artifact: EpisodeArtifact) -> &EpisodeArtifact {
        self.artifacts.push(artifact);
        &self.artifacts[self.artifacts.len() - 1]
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The plan, once drafted.
    #[must_use]
    pub fn plan_ref(&self) -> Option<&StoryPlan> {
        self.plan.as_ref()
    }

    /// Every artifact, oldest first.
    #[must_use]
    pub fn artifacts(&self) -> &[EpisodeArtifact] {
        &self.artifacts
    }

    /// The most recent artifact for episode `index`.
    #[must_use]
    pub fn latest_artifact(&self, index: EpisodeIndex) -> Option<&EpisodeArtifact> {
        self.artifacts.iter().rev().find(|a| a.index == index)
    }

    /// The episode `advance` would generate next, if any.
    #[must_use]
    pub fn next_episode(&self) -> Option<EpisodeIndex> {
        match self.state {
            PipelineState::Planned => Some(0),
            PipelineState::EpisodeReady(n) => Some(n + 1),
            _ => None,
        }
    }

    /// The script excerpt index.
    #[must_use]
    pub fn excerpts(&self) -> &ExcerptIndex {
        &self.excerpts
    }

    /// The memory store.
    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Mutable store access, e.g. for `rebuild_index`.
    pub fn store_mut(&mut self) -> &mut MemoryStore {
        &mut self.store
    }

    /// Flush and close the store.
    ///
    /// # Errors
    ///
    /// The store's final write error.
    pub fn close(self) -> saga_core::error::Result<()> {
        self.store.close()
    }
}
