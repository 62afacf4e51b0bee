//! Episode artifacts: the immutable record of one generated episode.

use chrono::{DateTime, Utc};
use saga_core::{AppliedDelta, EpisodeIndex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One generated episode. Regenerating an episode appends a new artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeArtifact {
    /// Unique artifact id.
    pub id: Uuid,
    /// Zero-based episode index.
    pub index: EpisodeIndex,
    /// The script.
    pub script: String,
    /// Editor feedback.
    pub critique: String,
    /// Memory changes committed with this episode.
    pub applied_deltas: Vec<AppliedDelta>,
    /// Extractor's summary of the episode.
    pub key_event_summary: String,
    /// When the artifact was recorded.
    pub created_at: DateTime<Utc>,
}

impl EpisodeArtifact {
    pub(crate) fn new(
        index: EpisodeIndex,
        script: String,
        critique: String,
        applied_deltas: Vec<AppliedDelta>,
        key_event_summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            script,
            critique,
            applied_deltas,
            key_event_summary,
            created_at: Utc::now(),
        }
    }

    /// Default export filename, numbered from 1.
    #[must_use]
    pub fn default_filename(&self) -> String {
        format!("episode_{}_script.txt", self.index + 1)
    }

    /// Write the script to `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be written.
    pub fn export_script(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, &self.script)
    }
}
