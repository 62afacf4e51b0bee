//! Flat-file JSON persistence for the memory store.
//!
//! Three files live under the configured data directory:
//!
//! ```text
//! characters.json   {"version":1,"saved_at":"...","records":[Character, ...]}
//! plots.json        {"version":1,"saved_at":"...","records":[PlotPoint, ...]}
//! counters.json     {"version":1,"saved_at":"...","records":{"character":3,"plot":7,"revision":12}}
//! ```
//!
//! Every write goes to a sibling `.tmp` file which is synced and then renamed
//! over the target, so a crash leaves either the old or the new file intact.
//! Files are loaded independently; a missing file is an empty collection.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::types::{Character, IdKind, PlotPoint};

/// Character records file name.
pub const CHARACTERS_FILE: &str = "characters.json";
/// Plot point records file name.
pub const PLOTS_FILE: &str = "plots.json";
/// Durable counters file name.
pub const COUNTERS_FILE: &str = "counters.json";

/// On-disk format version written into every envelope.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeOut<'a, T: ?Sized> {
    version: u32,
    saved_at: DateTime<Utc>,
    records: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn<T> {
    version: u32,
    records: T,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Last value issued for each durable sequence. Zero means nothing issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Last character id issued.
    #[serde(default)]
    pub character: u64,
    /// Last plot id issued.
    #[serde(default)]
    pub plot: u64,
    /// Last record revision issued.
    #[serde(default)]
    pub revision: u64,
}

impl Counters {
    /// Last value issued for `kind`.
    #[must_use]
    pub fn last(&self, kind: IdKind) -> u64 {
        match kind {
            IdKind::Character => self.character,
            IdKind::Plot => self.plot,
        }
    }

    /// Advance the sequence for `kind` and return the new value.
    pub fn bump(&mut self, kind: IdKind) -> u64 {
        let slot = match kind {
            IdKind::Character => &mut self.character,
            IdKind::Plot => &mut self.plot,
        };
        *slot += 1;
        *slot
    }

    /// Advance the revision sequence and return the new value.
    pub fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Raise every sequence to at least the highest value found in the
    /// records. Returns `true` if anything had to be raised.
    pub fn reconcile(&mut self, characters: &[Character], plots: &[PlotPoint]) -> bool {
        let max_char = characters.iter().map(|c| c.id.0).max().unwrap_or(0);
        let max_plot = plots.iter().map(|p| p.id.0).max().unwrap_or(0);
        let max_rev = characters
            .iter()
            .map(|c| c.revision)
            .chain(plots.iter().map(|p| p.revision))
            .max()
            .unwrap_or(0);

        let before = *self;
        self.character = self.character.max(max_char);
        self.plot = self.plot.max(max_plot);
        self.revision = self.revision.max(max_rev);

        if *self != before {
            warn!(
                stored = ?before,
                recovered = ?self,
                "Counter file lagged behind records; recovered from record ids"
            );
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// JsonStore
// ---------------------------------------------------------------------------

/// Handle to the data directory holding the authoritative record files.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Open (or create) the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| MemoryError::Storage {
            path: dir.clone(),
            source,
        })?;
        info!(path = %dir.display(), "Memory data directory opened");
        Ok(Self { dir })
    }

    /// The data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load all character records.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] on read failure or
    /// [`MemoryError::Serialization`] if the file does not decode.
    pub fn load_characters(&self) -> Result<Vec<Character>> {
        self.read(CHARACTERS_FILE)
    }

    /// Load all plot point records.
    ///
    /// # Errors
    ///
    /// See [`JsonStore::load_characters`].
    pub fn load_plots(&self) -> Result<Vec<PlotPoint>> {
        self.read(PLOTS_FILE)
    }

    /// Load the durable counters.
    ///
    /// # Errors
    ///
    /// See [`JsonStore::load_characters`].
    pub fn load_counters(&self) -> Result<Counters> {
        self.read(COUNTERS_FILE)
    }

    /// Atomically replace the character records file.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] if the file cannot be written.
    pub fn save_characters(&self, records: &[&Character]) -> Result<()> {
        self.write(CHARACTERS_FILE, records)
    }

    /// Atomically replace the plot records file.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] if the file cannot be written.
    pub fn save_plots(&self, records: &[&PlotPoint]) -> Result<()> {
        self.write(PLOTS_FILE, records)
    }

    /// Atomically replace the counters file.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Storage`] if the file cannot be written.
    pub fn save_counters(&self, counters: &Counters) -> Result<()> {
        self.write(COUNTERS_FILE, counters)
    }

    fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let start = Instant::now();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = name, "Record file missing; starting empty");
                return Ok(T::default());
            }
            Err(source) => return Err(MemoryError::Storage { path, source }),
        };

        let envelope: EnvelopeIn<T> = serde_json::from_slice(&bytes)
            .map_err(|e| MemoryError::Serialization(format!("{}: {e}", path.display())))?;
        if envelope.version > FORMAT_VERSION {
            warn!(
                file = name,
                version = envelope.version,
                supported = FORMAT_VERSION,
                "Record file written by a newer format version"
            );
        }

        debug!(
            file = name,
            bytes = bytes.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Loaded record file"
        );
        Ok(envelope.records)
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, records: &T) -> Result<()> {
        let start = Instant::now();
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));

        let json = serde_json::to_vec_pretty(&EnvelopeOut {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            records,
        })
        .map_err(|e| MemoryError::Serialization(e.to_string()))?;

        let storage = |source: std::io::Error| MemoryError::Storage {
            path: path.clone(),
            source,
        };
        let mut file = File::create(&tmp).map_err(storage)?;
        file.write_all(&json).map_err(storage)?;
        file.sync_all().map_err(storage)?;
        drop(file);
        fs::rename(&tmp, &path).map_err(storage)?;

        debug!(
            file = name,
            bytes = json.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved record file"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
