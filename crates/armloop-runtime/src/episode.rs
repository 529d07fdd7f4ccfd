//! Per-episode state owned by the control loop.
//!
//! An [`EpisodeState`] is created when an episode starts running and is
//! passed by reference to the executor, which appends frames and advances
//! the step counter.  Once the episode ends it is folded into an
//! [`EpisodeReport`].

use std::num::NonZeroUsize;
use std::path::PathBuf;

use armloop_types::Image;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::ObservationHistory;

/// Mutable state of the running episode.
pub struct EpisodeState {
    pub id: Uuid,
    /// Name of the policy driving this episode.
    pub policy: String,
    pub history: ObservationHistory,
    /// One frame per executed action, in execution order.
    pub frames: Vec<Image>,
    /// Actions executed so far.
    pub steps: usize,
    pub started_at: DateTime<Local>,
}

impl EpisodeState {
    pub fn new(policy: impl Into<String>, obs_horizon: Option<NonZeroUsize>) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy: policy.into(),
            history: ObservationHistory::new(obs_horizon),
            frames: Vec::new(),
            steps: 0,
            started_at: Local::now(),
        }
    }

    /// Actions that may still be executed before `num_timesteps` is reached.
    pub fn remaining(&self, num_timesteps: usize) -> usize {
        num_timesteps.saturating_sub(self.steps)
    }
}

/// How an episode ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EpisodeOutcome {
    /// `num_timesteps` actions were executed.
    Completed,
    /// A fault or an operator shutdown ended the rollout early.
    Aborted { reason: String },
    /// The arm could not be brought to its start state; nothing ran.
    ResetFailed { reason: String },
}

impl EpisodeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Summary of one finished episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub id: Uuid,
    pub policy: String,
    pub outcome: EpisodeOutcome,
    pub steps: usize,
    pub frames: usize,
    /// Where the recording was saved, if it was.
    pub video_path: Option<PathBuf>,
}
