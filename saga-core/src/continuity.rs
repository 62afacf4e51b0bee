//! Plain-text continuity views over the memory store, fed to the generator
//! and critic prompts.

use std::fmt::Write;

use crate::store::MemoryStore;
use crate::types::{EpisodeIndex, PlotPoint};

/// Character states shown per character in a continuity summary.
pub const SUMMARY_STATES: usize = 2;
/// Character states shown per character in [`MemoryStore::character_summaries`].
pub const RECENT_STATES: usize = 3;

impl MemoryStore {
    /// What the story has established before `episode` starts: each known
    /// character with their last [`SUMMARY_STATES`] states, and each plot
    /// thread with the status it held at that point.
    #[must_use]
    pub fn continuity_summary(&self, episode: EpisodeIndex) -> String {
        let mut out = String::new();

        let characters: Vec<_> = self
            .characters()
            .filter(|c| c.first_appearance.is_before(episode))
            .collect();
        if !characters.is_empty() {
            out.push_str("Characters:\n");
            for c in characters {
                let _ = writeln!(out, "- {}: {}", c.name, c.description);
                let states: Vec<_> = c.snapshots_before(episode).collect();
                for s in states.iter().skip(states.len().saturating_sub(SUMMARY_STATES)) {
                    let _ = writeln!(out, "  - ({}) {}", s.at, s.state);
                }
            }
        }

        let plots: Vec<_> = self
            .plots()
            .filter_map(|p| p.status_before(episode).map(|s| (p, s.status)))
            .collect();
        if !plots.is_empty() {
            out.push_str("Plot threads:\n");
            for (p, status) in plots {
                let _ = writeln!(out, "- [{status}] {} (since {})", p.description, p.origin);
            }
        }

        if out.is_empty() {
            out.push_str("No prior continuity recorded.\n");
        }
        out
    }

    /// Every character with their [`RECENT_STATES`] most recent states.
    #[must_use]
    pub fn character_summaries(&self) -> String {
        let mut out = String::new();
        for c in self.characters() {
            let _ = writeln!(out, "{} (#{}): {}", c.name, c.id.0, c.description);
            let skip = c.snapshots.len().saturating_sub(RECENT_STATES);
            for s in c.snapshots.iter().skip(skip) {
                let _ = writeln!(out, "  - ({}) {}", s.at, s.state);
            }
        }
        out
    }

    /// Plot threads that are still open, in id order.
    #[must_use]
    pub fn active_plots(&self) -> Vec<&PlotPoint> {
        self.plots().filter(|p| !p.status.is_closed()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::SagaConfig;
    use crate::embedding::StubEmbeddingProvider;
    use crate::store::MemoryStore;
    use crate::types::{CharacterFields, Moment, PlotFields, PlotStatus};

    fn store(dir: &std::path::Path) -> MemoryStore {
        let mut config = SagaConfig::default();
        config.memory.data_dir = dir.to_path_buf();
        MemoryStore::open(&config, Arc::new(StubEmbeddingProvider::default())).expect("open")
    }

    fn state(text: &str) -> CharacterFields {
        CharacterFields {
            state: Some(text.into()),
            ..CharacterFields::default()
        }
    }

    #[test]
    fn summary_only_shows_what_happened_before_the_episode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store(dir.path());
        let mara = store
            .upsert_character(
                None,
                CharacterFields {
                    name: Some("Mara Voss".into()),
                    description: Some("A tired detective".into()),
                    state: Some("Starting the case".into()),
                },
                Moment::Planning,
            )
            .expect("create");
        store.upsert_character(Some(mara), state("Found the ledger"), Moment::Episode(0)).expect("e0");
        store.upsert_character(Some(mara), state("Lost her badge"), Moment::Episode(1)).expect("e1");
        store.upsert_character(Some(mara), state("Back on the force"), Moment::Episode(2)).expect("e2");

        let thread = store
            .upsert_plot(
                None,
                PlotFields {
                    description: Some("Who stole the ledger?".into()),
                    characters: vec![mara],
                },
                PlotStatus::Open,
                Moment::Planning,
            )
            .expect("plot");
        store
            .upsert_plot(Some(thread), PlotFields::default(), PlotStatus::Resolved, Moment::Episode(2))
            .expect("resolve");

        let summary = store.continuity_summary(2);
        assert!(summary.contains("Mara Voss: A tired detective"));
        assert!(summary.contains("Found the ledger"));
        assert!(summary.contains("Lost her badge"));
        assert!(!summary.contains("Starting the case"), "only the last two states");
        assert!(!summary.contains("Back on the force"), "nothing from episode 2 itself");
        assert!(summary.contains("[open] Who stole the ledger?"));

        assert!(store.continuity_summary(3).contains("[resolved] Who stole the ledger?"));
        assert!(store.active_plots().is_empty());
    }

    #[test]
    fn empty_store_says_so() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        assert_eq!(store.continuity_summary(0), "No prior continuity recorded.\n");
        assert!(store.character_summaries().is_empty());
    }

    #[test]
    fn character_summaries_keep_three_states() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store(dir.path());
        let id = store
            .upsert_character(
                None,
                CharacterFields {
                    name: Some("Teo".into()),
                    description: Some("An informant".into()),
                    state: Some("s0".into()),
                },
                Moment::Planning,
            )
            .expect("create");
        for (n, s) in ["s1", "s2", "s3"].iter().enumerate() {
            let n = u32::try_from(n).expect("small");
            store.upsert_character(Some(id), state(s), Moment::Episode(n)).expect("update");
        }
        let text = store.character_summaries();
        assert!(!text.contains("s0"));
        assert!(text.contains("s1") && text.contains("s3"));
    }
}
