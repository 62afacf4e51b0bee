//! Core types for LLM requests and responses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The job a model call performs. Each role maps to its own model and
/// sampling defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Drafts the story plan.
    Planner,
    /// Writes episode scripts.
    Generator,
    /// Reviews scripts for continuity.
    Critic,
    /// Extracts memory deltas from scripts.
    Extractor,
}

impl ModelRole {
    /// Sampling temperature used when a prompt does not override it.
    #[must_use]
    pub fn default_temperature(self) -> f32 {
        match self {
            Self::Planner => 0.7,
            Self::Generator => 0.75,
            Self::Critic => 0.3,
            Self::Extractor => 0.1,
        }
    }

    /// Output token cap used when a prompt does not override it.
    #[must_use]
    pub fn default_max_tokens(self) -> u32 {
        match self {
            Self::Planner => 3000,
            Self::Generator => 4000,
            Self::Critic => 500,
            Self::Extractor => 1500,
        }
    }

    /// Whether the role's output is parsed as JSON.
    #[must_use]
    pub fn wants_json(self) -> bool {
        matches!(self, Self::Planner | Self::Extractor)
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planner => "planner",
            Self::Generator => "generator",
            Self::Critic => "critic",
            Self::Extractor => "extractor",
        };
        f.write_str(name)
    }
}

/// Default timeout for a single model call.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// A request to the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// System prompt (persona, rules, output format).
    pub system: String,
    /// User prompt (plan, memory, script).
    pub user: String,
    /// Which role is asking.
    pub role: ModelRole,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Ask the backend for a JSON object.
    pub json_mode: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// Create a request with the role's defaults.
    #[must_use]
    pub fn new(role: ModelRole, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            role,
            max_tokens: role.default_max_tokens(),
            temperature: role.default_temperature(),
            json_mode: role.wants_json(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the output token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Toggle JSON mode.
    #[must_use]
    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

/// A response from the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}

// ---------------------------------------------------------------------------
// Structured payloads
// ---------------------------------------------------------------------------

/// Story plan as returned by the planner prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    /// Story title.
    pub title: String,
    /// Two or three sentence summary of the concept.
    pub premise: String,
    /// Where and when the story takes place.
    pub setting: String,
    /// Main characters.
    pub characters: Vec<CharacterOutline>,
    /// Episode outlines in order.
    #[serde(alias = "master_outline")]
    pub episodes: Vec<EpisodeOutline>,
    /// Plot threads to track from the start.
    #[serde(default)]
    pub plot_seeds: Vec<String>,
}

/// A character in the planned roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterOutline {
    /// Character name.
    pub name: String,
    /// Brief description.
    pub description: String,
    /// What drives the character.
    #[serde(default)]
    pub motivation: String,
}

/// One planned episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeOutline {
    /// Episode title.
    pub title: String,
    /// One or two paragraph summary.
    pub summary: String,
    /// Events that must happen in the episode.
    #[serde(default)]
    pub key_points: Vec<String>,
}
