//! Prompt templates for the four model roles.
//!
//! Every prompt is a versioned, testable artifact. The built-in templates
//! below can be overridden per role by TOML files in a prompt directory.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::LlmError;
use crate::types::{LlmRequest, ModelRole};

/// Planner: premise -> story plan.
pub const PLANNER_SYSTEM: &str = r"You are a story planning assistant that organizes stories into episodic formats.
You create well-structured outlines with clear character arcs.
Return ONLY valid JSON.";

pub const PLANNER_USER: &str = r#"Create a structured story arc for a {episode_count}-episode story based on this premise:
"{premise}"

Return a JSON object with these fields:
- "title": a compelling title for the story
- "premise": a 2-3 sentence summary of the core concept
- "setting": where and when the story takes place
- "characters": array of main characters, each {{"name": "...", "description": "...", "motivation": "..."}}
- "episodes": array with exactly {episode_count} entries, each {{"title": "...", "summary": "1-2 paragraphs", "key_points": ["2-3 events"]}}
- "plot_seeds": array of plot threads that should be tracked from the start

The story must resolve by the final episode."#;

/// Generator: plan slice + memory -> script.
pub const GENERATOR_SYSTEM: &str = r"You are a screenwriter writing Episode {episode_number} of {episode_count} of '{title}'.
Write in standard screenplay format (SCENE HEADING, action, CHARACTER, dialogue).
Keep every character consistent with the established continuity.";

pub const GENERATOR_USER: &str = r"Premise: {premise}
Setting: {setting}

Episode {episode_number}: {episode_title}
Episode goal: {episode_summary}
Key points that must happen:
{key_points}

Established continuity before this episode:
{continuity}

Relevant memory:
{relevant_memory}

Relevant excerpts from earlier episodes (use if helpful):
{relevant_excerpts}

Write the complete script for this episode only. Do not write later episodes.";

/// Critic: script + continuity -> critique.
pub const CRITIC_SYSTEM: &str =
    r"You are a meticulous script editor focused on continuity and consistency.";

pub const CRITIC_USER: &str = r"You are reviewing the draft script for Episode {episode_number}.

Episode goal: {episode_summary}

Established continuity (characters and plot threads before this episode):
{continuity}

--- START SCRIPT ---
{script}
--- END SCRIPT ---

Evaluate the script on:
1. Continuity: does it contradict established facts?
2. Consistency: do characters act in line with their personalities and motivations?
3. Plot advancement: does it move the story towards the episode goal?
4. Pacing: briefly, is it engaging?

Start with an overall assessment, then list specific points.";

/// Extractor: script -> memory deltas.
pub const EXTRACTOR_SYSTEM: &str = r"You are an assistant extracting structured continuity data from scripts.
Output ONLY a valid JSON object.";

pub const EXTRACTOR_USER: &str = r#"Analyze the script for Episode {episode_number} and list the changes to story memory.

Known characters (id: name):
{known_characters}

Open plot threads (id: description):
{open_plots}

--- START SCRIPT ---
{script}
--- END SCRIPT ---

Return JSON:
{{"deltas": [<delta>, ...], "key_event_summary": "1-2 sentence summary of the episode"}}

Each delta is {{"kind": "character" | "plot", "op": "create" | "update" | "resolve" | "abandon", "id": <known id or omitted>, "fields": {{...}}}}
- New character: {{"kind": "character", "op": "create", "fields": {{"name": "...", "description": "...", "state": "..."}}}}
- Character state change: {{"kind": "character", "op": "update", "id": <id>, "fields": {{"state": "..."}}}}
- New plot thread: {{"kind": "plot", "op": "create", "fields": {{"description": "...", "characters": ["name", ...]}}}}
- Plot concluded or dropped: {{"kind": "plot", "op": "resolve" | "abandon", "id": <id>}}
Use only ids from the lists above. If nothing changed, return an empty deltas array."#;

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value and `{{` / `}}` with
/// literal braces. The template is scanned once, so substituted values are
/// never themselves expanded. Unknown placeholders are left as written.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        let placeholder = tail.strip_prefix('{').and_then(|inner| {
            let end = inner.find('}')?;
            let key = &inner[..end];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (*value, end + 2))
        });
        match placeholder {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// PromptEngine: versioned TOML template loader
// ---------------------------------------------------------------------------

/// Identifies a prompt template by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Story plan drafting.
    Planner,
    /// Episode script writing.
    Generator,
    /// Script critique.
    Critic,
    /// Memory delta extraction.
    Extractor,
}

impl PromptId {
    /// Returns the TOML filename (without path) for this prompt.
    #[must_use]
    pub fn filename(self) -> &'static str {
        match self {
            Self::Planner => "planner.toml",
            Self::Generator => "generator.toml",
            Self::Critic => "critic.toml",
            Self::Extractor => "extractor.toml",
        }
    }

    /// All prompt IDs.
    #[must_use]
    pub fn all() -> &'static [PromptId] {
        &[Self::Planner, Self::Generator, Self::Critic, Self::Extractor]
    }

    /// The model role that answers this prompt.
    #[must_use]
    pub fn role(self) -> ModelRole {
        match self {
            Self::Planner => ModelRole::Planner,
            Self::Generator => ModelRole::Generator,
            Self::Critic => ModelRole::Critic,
            Self::Extractor => ModelRole::Extractor,
        }
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role())
    }
}

impl FromStr for PromptId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(Self::Planner),
            "generator" => Ok(Self::Generator),
            "critic" => Ok(Self::Critic),
            "extractor" => Ok(Self::Extractor),
            _ => Err(format!("unknown prompt id: '{s}'")),
        }
    }
}

/// Inner `[prompt]` section of a TOML file. Omitted settings keep the
/// role's defaults.
#[derive(Debug, Clone, Deserialize)]
struct TomlPromptData {
    version: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    json_mode: Option<bool>,
    system: String,
    user: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TomlPromptFile {
    prompt: TomlPromptData,
}

/// A loaded, ready-to-render prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// Prompt version string (e.g., "1.0").
    pub version: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether the backend is asked for a JSON object.
    pub json_mode: bool,
    /// System prompt template (contains `{key}` placeholders).
    pub system: String,
    /// User prompt template (contains `{key}` placeholders).
    pub user: String,
}

impl PromptTemplate {
    fn builtin(id: PromptId, system: &str, user: &str) -> Self {
        let role = id.role();
        Self {
            version: "builtin".into(),
            max_tokens: role.default_max_tokens(),
            temperature: role.default_temperature(),
            json_mode: role.wants_json(),
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Engine that holds one template per role and renders them into requests.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    templates: HashMap<PromptId, PromptTemplate>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptEngine {
    /// Create a `PromptEngine` pre-loaded with the compiled-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        let templates = [
            (PromptId::Planner, PLANNER_SYSTEM, PLANNER_USER),
            (PromptId::Generator, GENERATOR_SYSTEM, GENERATOR_USER),
            (PromptId::Critic, CRITIC_SYSTEM, CRITIC_USER),
            (PromptId::Extractor, EXTRACTOR_SYSTEM, EXTRACTOR_USER),
        ]
        .into_iter()
        .map(|(id, system, user)| (id, PromptTemplate::builtin(id, system, user)))
        .collect();
        Self { templates }
    }

    /// Built-in templates, overridden by any `<role>.toml` files in `dir`.
    ///
    /// Unknown files are ignored; a missing directory is an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the directory is missing or a TOML file
    /// cannot be read or parsed.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, LlmError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LlmError::ConfigError(format!(
                "prompt directory not found: {}",
                dir.display()
            )));
        }

        let mut engine = Self::builtin();
        for id in PromptId::all() {
            let path = dir.join(id.filename());
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .map_err(|e| LlmError::ConfigError(format!("failed to read {}: {e}", path.display())))?;
            let parsed: TomlPromptFile = toml::from_str(&content)
                .map_err(|e| LlmError::ConfigError(format!("failed to parse {}: {e}", path.display())))?;

            let d = parsed.prompt;
            let role = id.role();
            tracing::debug!(prompt = %id, version = %d.version, "loaded prompt override");
            engine.templates.insert(*id, PromptTemplate {
                version: d.version,
                max_tokens: d.max_tokens.unwrap_or_else(|| role.default_max_tokens()),
                temperature: d.temperature.unwrap_or_else(|| role.default_temperature()),
                json_mode: d.json_mode.unwrap_or_else(|| role.wants_json()),
                system: d.system,
                user: d.user,
            });
        }
        Ok(engine)
    }

    /// Get a loaded prompt template by ID.
    #[must_use]
    pub fn get(&self, id: PromptId) -> Option<&PromptTemplate> {
        self.templates.get(&id)
    }

    /// Render both system and user prompts for a given ID.
    ///
    /// Returns `(system_prompt, user_prompt)` with all `{key}` placeholders
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the prompt ID is not loaded.
    pub fn render(&self, id: PromptId, vars: &[(&str, &str)]) -> Result<(String, String), LlmError> {
        let tpl = self
            .get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("prompt template '{id}' not loaded")))?;
        Ok((render_template(&tpl.system, vars), render_template(&tpl.user, vars)))
    }

    /// Render a prompt into a request carrying the template's settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the prompt ID is not loaded.
    pub fn request(&self, id: PromptId, vars: &[(&str, &str)]) -> Result<LlmRequest, LlmError> {
        let (system, user) = self.render(id, vars)?;
        let tpl = self
            .get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("prompt template '{id}' not loaded")))?;
        Ok(LlmRequest::new(id.role(), system, user)
            .with_max_tokens(tpl.max_tokens)
            .with_temperature(tpl.temperature)
            .with_json_mode(tpl.json_mode))
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering_works() {
        let rendered = render_template(
            "Episode {n} of {title}: {{\"ok\": true}}",
            &[("n", "2"), ("title", "Rain City")],
        );
        assert_eq!(rendered, "Episode 2 of Rain City: {\"ok\": true}");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let rendered = render_template(
            "Continuity: {continuity}\nMemory: {relevant_memory}",
            &[
                ("continuity", "Mara wrote {relevant_memory} on the wall {{sic}}"),
                ("relevant_memory", "the ledger"),
            ],
        );
        assert_eq!(
            rendered,
            "Continuity: Mara wrote {relevant_memory} on the wall {{sic}}\nMemory: the ledger"
        );
    }

    #[test]
    fn template_handles_missing_vars() {
        let rendered = render_template("Hello {name}, {unknown}.", &[("name", "Mara")]);
        assert_eq!(rendered, "Hello Mara, {unknown}.");
    }

    #[test]
    fn prompt_id_from_str_round_trip() {
        for id in PromptId::all() {
            let parsed: PromptId = id.to_string().parse().expect("should parse");
            assert_eq!(*id, parsed);
        }
        assert!("nonexistent".parse::<PromptId>().is_err());
    }

    #[test]
    fn builtin_engine_covers_every_role() {
        let engine = PromptEngine::builtin();
        assert_eq!(engine.len(), PromptId::all().len());
        let extractor = engine.get(PromptId::Extractor).expect("extractor");
        assert!(extractor.json_mode);
        assert!(!engine.get(PromptId::Generator).expect("generator").json_mode);
    }

    #[test]
    fn request_carries_template_settings() {
        let engine = PromptEngine::builtin();
        let req = engine
            .request(PromptId::Planner, &[("premise", "A heist"), ("episode_count", "3")])
            .expect("request");
        assert_eq!(req.role, ModelRole::Planner);
        assert!(req.json_mode);
        assert!(req.user.contains("exactly 3 entries"));
        assert!(req.user.contains("\"A heist\""));
    }

    #[test]
    fn directory_overrides_one_role() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("critic.toml"),
            "[prompt]\nversion = \"2.0\"\ntemperature = 0.1\nsystem = \"Be harsh.\"\nuser = \"{script}\"\n",
        )
        .expect("write");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let engine = PromptEngine::from_directory(dir.path()).expect("load");
        let critic = engine.get(PromptId::Critic).expect("critic");
        assert_eq!(critic.version, "2.0");
        assert!((critic.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(critic.max_tokens, ModelRole::Critic.default_max_tokens());
        assert_eq!(engine.get(PromptId::Planner).expect("planner").version, "builtin");
    }

    #[test]
    fn bad_override_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("planner.toml"), "not = [valid").expect("write");
        assert!(matches!(
            PromptEngine::from_directory(dir.path()),
            Err(LlmError::ConfigError(_))
        ));
        assert!(PromptEngine::from_directory("/tmp/nonexistent_saga_prompts_dir").is_err());
    }
}
