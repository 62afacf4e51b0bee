//! The story plan: validated planner output, immutable once generation
//! starts.

use std::collections::HashSet;
use std::fmt::Write;

use saga_core::{EpisodeIndex, MemoryDelta};
use saga_llm::{CharacterOutline, EpisodeOutline, PlanResponse};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryError};

/// A validated story plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPlan {
    /// Story title.
    pub title: String,
    /// Core concept.
    pub premise: String,
    /// Where and when.
    pub setting: String,
    /// Episode outlines; the position is the episode index.
    pub episodes: Vec<EpisodeOutline>,
    /// Initial roster.
    pub characters: Vec<CharacterOutline>,
    /// Plot threads named by the planner.
    pub plot_seeds: Vec<String>,
}

impl StoryPlan {
    /// Validate a planner reply against the requested episode count.
    ///
    /// # Errors
    ///
    /// `PlanValidation` when the episode count differs, the roster is empty,
    /// or a title or character name is blank.
    pub fn from_response(response: PlanResponse, episode_count: u32) -> Result<Self> {
        let got = response.episodes.len();
        if u32::try_from(got).ok() != Some(episode_count) {
            return Err(StoryError::PlanValidation(format!(
                "expected exactly {episode_count} episodes, got {got}"
            )));
        }
        if response.characters.is_empty() {
            return Err(StoryError::PlanValidation("character roster is empty".into()));
        }
        if response.title.trim().is_empty() {
            return Err(StoryError::PlanValidation("plan has no title".into()));
        }
        if let Some(n) = response.characters.iter().position(|c| c.name.trim().is_empty()) {
            return Err(StoryError::PlanValidation(format!("character {n} has no name")));
        }
        if let Some(n) = response.episodes.iter().position(|e| e.title.trim().is_empty()) {
            return Err(StoryError::PlanValidation(format!("episode {n} has no title")));
        }

        Ok(Self {
            title: response.title,
            premise: response.premise,
            setting: response.setting,
            episodes: response.episodes,
            characters: response.characters,
            plot_seeds: response.plot_seeds,
        })
    }

    /// Number of planned episodes.
    #[must_use]
    pub fn episode_count(&self) -> u32 {
        u32::try_from(self.episodes.len()).unwrap_or(u32::MAX)
    }

    /// The outline for `index`.
    ///
    /// # Errors
    ///
    /// `InvalidEpisodeIndex` outside `[0, episode_count)`.
    pub fn episode(&self, index: EpisodeIndex) -> Result<&EpisodeOutline> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.episodes.get(i))
            .ok_or(StoryError::InvalidEpisodeIndex {
                index,
                episode_count: self.episode_count(),
            })
    }

    /// Deltas that seed the memory store: one character per roster entry
    /// (first spelling wins on duplicate names), then each episode's
    /// objective and key points, then the planner's explicit seeds.
    #[must_use]
    pub fn seed_deltas(&self) -> Vec<MemoryDelta> {
        let mut deltas = Vec::new();
        let mut seen = HashSet::new();
        for c in &self.characters {
            if !seen.insert(c.name.trim().to_lowercase()) {
                continue;
            }
            let mut delta = MemoryDelta::create_character(c.name.trim(), c.description.trim());
            if !c.motivation.trim().is_empty() {
                delta.fields.state = Some(format!("Motivation: {}", c.motivation.trim()));
            }
            deltas.push(delta);
        }

        for (n, episode) in self.episodes.iter().enumerate() {
            let number = n + 1;
            deltas.push(MemoryDelta::create_plot(format!(
                "Episode {number} objective: {}",
                episode.summary.trim()
            )));
            for point in episode.key_points.iter().filter(|p| !p.trim().is_empty()) {
                deltas.push(MemoryDelta::create_plot(format!(
                    "Episode {number} key point: {}",
                    point.trim()
                )));
            }
        }

        deltas.extend(
            self.plot_seeds
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| MemoryDelta::create_plot(s.trim())),
        );
        deltas
    }

    /// Title, premise and setting, indexed as the first script excerpt.
    #[must_use]
    pub fn overview(&self) -> String {
        format!(
            "STORY TITLE: {}\nPREMISE: {}\nSETTING: {}",
            self.title, self.premise, self.setting
        )
    }

    /// Human-readable outline, as shown by the CLI.
    #[must_use]
    pub fn outline(&self) -> String {
        let mut out = format!("{}\n\n{}\nSetting: {}\n\nCharacters:\n", self.title, self.premise, self.setting);
        for c in &self.characters {
            let _ = writeln!(out, "- {}: {}", c.name, c.description);
        }
        out.push_str("\nEpisodes:\n");
        for (n, e) in self.episodes.iter().enumerate() {
            let _ = writeln!(out, "{}. {}: {}", n + 1, e.title, e.summary);
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn response(episodes: usize) -> PlanResponse {
        PlanResponse {
            title: "Rain City".into(),
            premise: "A detective in a rain-soaked city".into(),
            setting: "A drowned port".into(),
            characters: vec![
                CharacterOutline {
                    name: "Mara Voss".into(),
                    description: "A tired detective".into(),
                    motivation: "Find her partner".into(),
                },
                CharacterOutline {
                    name: "mara voss".into(),
                    description: "duplicate".into(),
                    motivation: String::new(),
                },
            ],
            episodes: (0..episodes)
                .map(|n| EpisodeOutline {
                    title: format!("Part {n}"),
                    summary: format!("Things happen in part {n}"),
                    key_points: vec![format!("Clue {n}")],
                })
                .collect(),
            plot_seeds: vec!["Who stole the ledger?".into(), "  ".into()],
        }
    }

    #[test]
    fn episode_count_must_match() {
        assert!(matches!(
            StoryPlan::from_response(response(2), 3),
            Err(StoryError::PlanValidation(_))
        ));
        assert!(StoryPlan::from_response(response(3), 3).is_ok());
    }

    #[test]
    fn empty_roster_is_rejected() {
        let mut r = response(3);
        r.characters.clear();
        assert!(matches!(StoryPlan::from_response(r, 3), Err(StoryError::PlanValidation(_))));
    }

    #[test]
    fn episode_lookup_is_bounded() {
        let plan = StoryPlan::from_response(response(3), 3).expect("plan");
        assert_eq!(plan.episode(2).expect("last").title, "Part 2");
        assert!(matches!(
            plan.episode(5),
            Err(StoryError::InvalidEpisodeIndex { index: 5, episode_count: 3 })
        ));
    }

    #[test]
    fn seeds_skip_duplicate_names_and_blank_threads() {
        let plan = StoryPlan::from_response(response(2), 2).expect("plan");
        let deltas = plan.seed_deltas();
        // one character, two objectives, two key points, one seed
        assert_eq!(deltas.len(), 6);
        assert_eq!(deltas[0].fields.state.as_deref(), Some("Motivation: Find her partner"));
        assert_eq!(
            deltas[1].fields.description.as_deref(),
            Some("Episode 1 objective: Things happen in part 0")
        );
        assert!(deltas.iter().all(|d| d.validate_shape().is_ok()));
    }
}
