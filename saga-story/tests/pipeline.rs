//! End-to-end pipeline tests against a scripted model and a real store in a
//! temporary directory.

use std::path::Path;
use std::sync::Arc;

use saga_core::embedding::HashingEmbeddingProvider;
use saga_core::{
    CharacterId, ExcerptSource, MemoryError, MemoryStore, PlotId, PlotStatus, SagaConfig,
};
use saga_llm::{LlmError, ModelRole, PromptEngine, ScriptedModel};
use saga_story::{
    Generator, MemoryContext, PipelineSettings, PipelineState, Step, StoryError, StoryPipeline,
};

const PREMISE: &str = "A detective in a rain-soaked city";

// Roster: C1 Mara Voss, C2 Teo Ralls.
// Plots: P1/P2 episode 1 objective/key point, P3/P4 episode 2, P5/P6
// episode 3, P7 the explicit seed.
const PLAN_JSON: &str = r#"{
    "title": "Rain City",
    "premise": "A detective hunts the thief of the harbor ledger.",
    "setting": "A drowned port city, 1950s",
    "characters": [
        {"name": "Mara Voss", "description": "A tired detective", "motivation": "Find her missing partner"},
        {"name": "Teo Ralls", "description": "A nervous informant at the docks"}
    ],
    "episodes": [
        {"title": "The Ledger", "summary": "The harbor ledger goes missing.", "key_points": ["Mara takes the case"]},
        {"title": "The Informant", "summary": "Mara corners Teo.", "key_points": ["Teo lies"]},
        {"title": "High Water", "summary": "The flood reveals the thief.", "key_points": ["The ledger resurfaces"]}
    ],
    "plot_seeds": ["Who stole the harbor ledger?"]
}"#;

const EPISODE_ONE_EXTRACTION: &str = r#"{
    "deltas": [
        {"kind": "character", "op": "update", "id": 1, "fields": {"state": "Has taken the ledger case"}},
        {"kind": "character", "op": "create", "fields": {"name": "Ines Calder", "description": "Harbor master", "state": "Hiding something"}},
        {"kind": "character", "op": "create", "fields": {"name": "teo ralls", "description": "Seen near the office"}},
        {"kind": "plot", "op": "resolve", "id": 2}
    ],
    "key_event_summary": "Mara takes the case and meets the harbor master."
}"#;

const EMPTY_EXTRACTION: &str = r#"{"deltas": [], "key_event_summary": "Rain."}"#;

fn open_store(dir: &Path) -> MemoryStore {
    let mut config = SagaConfig::default();
    config.memory.data_dir = dir.to_path_buf();
    MemoryStore::open(&config, Arc::new(HashingEmbeddingProvider::default())).expect("open")
}

fn pipeline(dir: &Path) -> (Arc<ScriptedModel>, StoryPipeline) {
    let model = Arc::new(ScriptedModel::new());
    let pipeline = StoryPipeline::new(
        model.clone(),
        open_store(dir),
        PromptEngine::builtin(),
        PipelineSettings::default(),
    );
    (model, pipeline)
}

fn script_episode(model: &ScriptedModel, extraction: &str) {
    model
        .push(ModelRole::Generator, "INT. HARBOR OFFICE - NIGHT\n\nMARA\nWhere is the ledger?")
        .push(ModelRole::Critic, "Minor issues found. Teo's motive is unclear.")
        .push(ModelRole::Extractor, extraction);
}

async fn planned(dir: &Path) -> (Arc<ScriptedModel>, StoryPipeline) {
    let (model, mut pipeline) = pipeline(dir);
    model.push(ModelRole::Planner, PLAN_JSON);
    pipeline.plan(PREMISE, 3).await.expect("plan");
    (model, pipeline)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_episode_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = planned(dir.path()).await;

    let plan = pipeline.plan_ref().expect("plan");
    assert_eq!(plan.episode_count(), 3);
    let roster = plan.characters.len();
    assert!(roster >= 1);
    assert_eq!(pipeline.state(), PipelineState::Planned);
    assert_eq!(pipeline.store().character_count(), 2);
    assert_eq!(pipeline.store().plot_count(), 7);

    script_episode(&model, EPISODE_ONE_EXTRACTION);
    let artifact = pipeline.advance().await.expect("advance");
    assert_eq!(artifact.index, 0);
    assert!(!artifact.critique.is_empty());
    assert_eq!(artifact.applied_deltas.len(), 4);
    assert_eq!(artifact.key_event_summary, "Mara takes the case and meets the harbor master.");

    assert_eq!(pipeline.state(), PipelineState::EpisodeReady(0));
    let store = pipeline.store();
    assert!(store.character_count() >= roster);
    assert_eq!(store.character_count(), 3, "Teo was updated, not duplicated");
    assert_eq!(store.plot(PlotId(2)).expect("plot").status, PlotStatus::Resolved);
    let teo = store.character(CharacterId(2)).expect("teo");
    assert_eq!(teo.name, "Teo Ralls");
    assert_eq!(teo.latest_snapshot().expect("state").state, "Seen near the office");

    let requests = model.requests();
    let prompt = &requests[1];
    assert_eq!(prompt.role, ModelRole::Generator);
    assert!(prompt.user.contains("Mara Voss: A tired detective"));
    assert!(prompt.user.contains("Motivation: Find her missing partner"));
}

#[tokio::test]
async fn runs_to_done_and_regenerates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = planned(dir.path()).await;

    script_episode(&model, EPISODE_ONE_EXTRACTION);
    script_episode(&model, EMPTY_EXTRACTION);
    script_episode(&model, EMPTY_EXTRACTION);
    for _ in 0..3 {
        pipeline.advance().await.expect("advance");
    }
    assert_eq!(pipeline.state(), PipelineState::Done);
    assert!(matches!(pipeline.advance().await, Err(StoryError::InvalidState(_))));

    let first = pipeline.latest_artifact(2).expect("episode 3").id;
    script_episode(&model, EMPTY_EXTRACTION);
    let again = pipeline.regenerate(2).await.expect("regen").id;
    assert_ne!(first, again);
    assert_eq!(pipeline.artifacts().len(), 4);
    assert_eq!(pipeline.latest_artifact(2).expect("latest").id, again);
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[tokio::test]
async fn earlier_script_excerpts_reach_the_next_prompt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = planned(dir.path()).await;
    assert_eq!(pipeline.excerpts().excerpts_of(ExcerptSource::Overview).count(), 1);

    script_episode(&model, EPISODE_ONE_EXTRACTION);
    pipeline.advance().await.expect("episode 1");
    script_episode(&model, EMPTY_EXTRACTION);
    pipeline.advance().await.expect("episode 2");

    let requests = model.requests();
    let prompts: Vec<&str> = requests
        .iter()
        .filter(|r| r.role == ModelRole::Generator)
        .map(|r| r.user.as_str())
        .collect();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("[Story overview]\nSTORY TITLE: Rain City"));
    assert!(!prompts[0].contains("[Episode 1, part 1]"), "nothing from the episode being written");
    let passage = "[Episode 1, part 1]\nINT. HARBOR OFFICE - NIGHT\nMARA\nWhere is the ledger?";
    assert!(prompts[1].contains(passage));
}

#[tokio::test]
async fn regeneration_replaces_the_episode_excerpts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = planned(dir.path()).await;
    script_episode(&model, EMPTY_EXTRACTION);
    pipeline.advance().await.expect("episode 1");

    model
        .push(ModelRole::Generator, "EXT. FLOODED PIER - DAWN\n\nTEO\nI kept the ledger dry.")
        .push(ModelRole::Critic, "Fine.")
        .push(ModelRole::Extractor, EMPTY_EXTRACTION);
    pipeline.regenerate(0).await.expect("regen");

    let texts: Vec<String> = pipeline
        .excerpts()
        .excerpts_of(ExcerptSource::Episode(0))
        .map(|e| e.text.clone())
        .collect();
    assert_eq!(texts, vec!["EXT. FLOODED PIER - DAWN\nTEO\nI kept the ledger dry.".to_string()]);

    let before = pipeline.excerpts().len();
    assert_eq!(pipeline.rebuild_excerpts().await.expect("rebuild"), before);

    pipeline.reset();
    assert!(pipeline.excerpts().is_empty());
}

// ---------------------------------------------------------------------------
// Failure semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_range_episode_produces_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = planned(dir.path()).await;
    let counters = pipeline.store().counters();
    let plan = pipeline.plan_ref().expect("plan").clone();
    let excerpts = pipeline.excerpts().clone();
    let prompts = PromptEngine::builtin();

    let err = Generator::new(&prompts, 1000)
        .generate_episode(model.as_ref(), &plan, 5, &MemoryContext::default())
        .await
        .expect_err("out of range");
    assert!(matches!(err, StoryError::InvalidEpisodeIndex { index: 5, episode_count: 3 }));
    assert!(matches!(
        MemoryContext::gather(pipeline.store_mut(), &excerpts, &plan, 5, 5, 5).await,
        Err(StoryError::InvalidEpisodeIndex { .. })
    ));

    assert_eq!(model.calls(ModelRole::Generator), 0);
    assert!(pipeline.artifacts().is_empty());
    assert_eq!(pipeline.store().counters(), counters);
}

#[tokio::test]
async fn refine_failure_commits_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = planned(dir.path()).await;
    let counters = pipeline.store().counters();

    model
        .push(ModelRole::Generator, "INT. DOCKS - NIGHT")
        .push(ModelRole::Critic, "Fine.")
        .push_error(ModelRole::Extractor, LlmError::Timeout(120_000));
    let err = pipeline.advance().await.expect_err("timeout");
    assert_eq!(err.step(), Some(Step::Refine));
    assert!(matches!(err, StoryError::Llm { source: LlmError::Timeout(_), .. }));

    assert_eq!(pipeline.state(), PipelineState::Planned);
    assert!(pipeline.artifacts().is_empty());
    assert_eq!(pipeline.store().counters(), counters);

    script_episode(&model, EMPTY_EXTRACTION);
    assert_eq!(pipeline.advance().await.expect("retry by caller").index, 0);
}

#[tokio::test]
async fn unknown_plot_id_rejects_the_whole_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = planned(dir.path()).await;
    let counters = pipeline.store().counters();

    script_episode(
        &model,
        r#"{"deltas": [
            {"kind": "character", "op": "create", "fields": {"name": "Ines Calder", "description": "Harbor master"}},
            {"kind": "plot", "op": "resolve", "id": 99}
        ]}"#,
    );
    let err = pipeline.advance().await.expect_err("unknown plot");
    assert!(matches!(
        err,
        StoryError::Store { step: Step::Commit, source: MemoryError::PlotNotFound(PlotId(99)) }
    ));
    assert_eq!(pipeline.store().character_count(), 2);
    assert_eq!(pipeline.store().counters(), counters);
    assert_eq!(pipeline.state(), PipelineState::Planned);
    assert_eq!(pipeline.excerpts().excerpts_of(ExcerptSource::Episode(0)).count(), 0);
}

#[tokio::test]
async fn invalid_calls_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (model, mut pipeline) = pipeline(dir.path());

    assert!(matches!(pipeline.advance().await, Err(StoryError::InvalidState(_))));
    assert!(matches!(pipeline.regenerate(0).await, Err(StoryError::InvalidState(_))));

    model.push(ModelRole::Planner, "not json at all");
    assert!(matches!(
        pipeline.plan(PREMISE, 3).await,
        Err(StoryError::PlanValidation(_))
    ));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.store().character_count(), 0);

    model.push(ModelRole::Planner, PLAN_JSON);
    pipeline.plan(PREMISE, 3).await.expect("plan");
    assert!(matches!(pipeline.plan(PREMISE, 3).await, Err(StoryError::InvalidState(_))));
    assert!(matches!(pipeline.regenerate(0).await, Err(StoryError::InvalidState(_))));

    pipeline.reset();
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert!(pipeline.plan_ref().is_none());
    assert_eq!(pipeline.store().character_count(), 2, "memory survives a reset");
}
