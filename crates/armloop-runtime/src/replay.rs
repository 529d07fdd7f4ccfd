//! [`ReplayPolicy`] – plays back recorded normalized action chunks.
//!
//! The recording is a JSON array with one entry per policy invocation.  An
//! entry is either a chunk of action rows or a single row, which is treated
//! as a chunk of length one:
//!
//! ```json
//! [
//!   [[0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], [0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]],
//!   [0.0, 0.0, -0.2, 0.0, 0.0, 0.0, 0.0]
//! ]
//! ```
//!
//! Chunks are returned in order and the recording wraps around when it runs
//! out, so a short file can drive an episode of any length.

use std::fs;
use std::path::{Path, PathBuf};

use armloop_types::{ArmError, Goal, StackedObservation};
use serde::Deserialize;
use thiserror::Error;

use crate::policy::Policy;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while loading a recording.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("recording contains no actions")]
    Empty,
}

impl From<ReplayError> for ArmError {
    fn from(e: ReplayError) -> Self {
        ArmError::Configuration(e.to_string())
    }
}

/// One recorded invocation.
#[derive(Deserialize)]
#[serde(untagged)]
enum Chunk {
    Rows(Vec<Vec<f32>>),
    Row(Vec<f32>),
}

impl From<Chunk> for Vec<Vec<f32>> {
    fn from(chunk: Chunk) -> Self {
        match chunk {
            Chunk::Rows(rows) => rows,
            Chunk::Row(row) => vec![row],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReplayPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// A [`Policy`] that ignores its inputs and replays a recording.
#[derive(Debug, Clone)]
pub struct ReplayPolicy {
    chunks: Vec<Vec<Vec<f32>>>,
    cursor: usize,
}

impl ReplayPolicy {
    /// # Errors
    ///
    /// Returns [`ReplayError::Empty`] when there is no chunk with at least
    /// one row.
    pub fn new(chunks: Vec<Vec<Vec<f32>>>) -> Result<Self, ReplayError> {
        let chunks: Vec<_> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
        if chunks.is_empty() {
            return Err(ReplayError::Empty);
        }
        Ok(Self { chunks, cursor: 0 })
    }

    /// Load a JSON recording from `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ReplayError`] when the file cannot be read, is not a
    /// valid recording, or holds no actions.
    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let contents = fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let chunks: Vec<Chunk> =
            serde_json::from_str(&contents).map_err(|source| ReplayError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(chunks.into_iter().map(Into::into).collect())
    }

    /// Number of distinct chunks in the recording.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Policy for ReplayPolicy {
    fn sample_actions(
        &mut self,
        _observation: &StackedObservation,
        _goal: &Goal,
        _seed: u64,
        _argmax: bool,
    ) -> Result<Vec<Vec<f32>>, ArmError> {
        let chunk = self.chunks[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.chunks.len();
        Ok(chunk)
    }
}
