use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    persistence::{self, PersistenceError},
    process::Process,
    runner::{ProcessOutcome, TerminalEvent},
};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("FilePersistence error: {0}")]
    FilePersistenceError(#[from] PersistenceError),
    #[error(
        "Snapshot of process `{process}` was taken from a different definition (expected fingerprint {expected:016x}, found {found:016x})"
    )]
    FingerprintMismatch {
        process: String,
        expected: u64,
        found: u64,
    },
}

/// Step state of a finished run, persisted outside the process.
///
/// A snapshot is tied to the process definition it was taken from through
/// the process fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Name of the process the run belonged to
    pub process: String,
    /// Fingerprint of the process definition
    pub fingerprint: u64,
    /// Id of the snapshotted run
    pub run_id: Uuid,
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
    /// Final state of every stateful step
    pub states: BTreeMap<String, Value>,
    /// Terminal events of the run
    pub terminal_events: Vec<TerminalEvent>,
}

impl ProcessSnapshot {
    pub fn from_outcome(process: &Process, outcome: &ProcessOutcome) -> Self {
        Self {
            process: process.name().to_owned(),
            fingerprint: process.fingerprint(),
            run_id: outcome.run_id,
            saved_at: Utc::now(),
            states: outcome.states.clone(),
            terminal_events: outcome.terminal_events.clone(),
        }
    }

    /// `<dir>/<process>-<run_id>.snapshot`
    ///
    /// Characters of the process name other than ASCII alphanumerics, `-` and
    /// `_` are replaced with `_`, so the file always lands directly in `dir`.
    pub fn default_path(&self, dir: &Path) -> PathBuf {
        let name = self
            .process
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        dir.join(format!("{name}-{}.snapshot", self.run_id))
    }

    /// Check that the snapshot was taken from `process`.
    pub fn verify(&self, process: &Process) -> Result<(), SnapshotError> {
        if self.fingerprint != process.fingerprint() {
            return Err(SnapshotError::FingerprintMismatch {
                process: process.name().to_owned(),
                expected: process.fingerprint(),
                found: self.fingerprint,
            });
        }
        Ok(())
    }

    /// Save as zstd compressed JSON.
    pub async fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec(self)?;
        persistence::save_to_file(&persistence::compress(&json)?, path).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, SnapshotError> {
        let data = persistence::load_from_file(path).await?;
        Ok(serde_json::from_slice(&persistence::decompress(&data)?)?)
    }
}
