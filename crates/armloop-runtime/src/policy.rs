//! [`Policy`] capability and the [`PolicyHandle`] the control loop drives.
//!
//! A policy maps a stacked observation and a goal to one or more normalized
//! action rows.  How it does so (checkpoint, remote server, replay file) is
//! not the loop's concern.  The handle adds what every policy shares: its
//! name, the statistics used to denormalize its output, its observation
//! horizon, and a seeded generator advanced exactly once per invocation.

use std::num::NonZeroUsize;

use armloop_types::{ActionSequence, ArmError, Goal, PolicyStatistics, StackedObservation};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::normalize::denormalize;

/// Something that predicts actions from observations.
pub trait Policy {
    /// Sample normalized action rows for `observation` and `goal`.
    ///
    /// `seed` is fresh for every call.  When `argmax` is `true` the policy
    /// should return its most likely actions instead of sampling.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::PolicyFault`] when inference fails.
    fn sample_actions(
        &mut self,
        observation: &StackedObservation,
        goal: &Goal,
        seed: u64,
        argmax: bool,
    ) -> Result<Vec<Vec<f32>>, ArmError>;
}

/// A named, loaded policy ready for the control loop.
pub struct PolicyHandle {
    name: String,
    policy: Box<dyn Policy>,
    statistics: PolicyStatistics,
    obs_horizon: Option<NonZeroUsize>,
    deterministic: bool,
    rng: ChaCha8Rng,
}

impl PolicyHandle {
    /// Wrap `policy`.  Sampling is deterministic and seeded with `0` until
    /// changed with [`with_deterministic`][Self::with_deterministic] and
    /// [`with_seed`][Self::with_seed].
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] when `statistics` does not match
    /// the action dimension.
    pub fn new(
        name: impl Into<String>,
        policy: Box<dyn Policy>,
        statistics: PolicyStatistics,
        obs_horizon: Option<NonZeroUsize>,
    ) -> Result<Self, ArmError> {
        statistics.validate()?;
        Ok(Self {
            name: name.into(),
            policy,
            statistics,
            obs_horizon,
            deterministic: true,
            rng: ChaCha8Rng::seed_from_u64(0),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn obs_horizon(&self) -> Option<NonZeroUsize> {
        self.obs_horizon
    }

    /// Query the policy and denormalize its output.
    ///
    /// # Errors
    ///
    /// - [`ArmError::PolicyFault`] – inference failed or returned no actions.
    /// - [`ArmError::Configuration`] – an output row has the wrong length.
    pub fn infer(
        &mut self,
        observation: &StackedObservation,
        goal: &Goal,
    ) -> Result<ActionSequence, ArmError> {
        let seed = self.rng.next_u64();
        let rows = self
            .policy
            .sample_actions(observation, goal, seed, self.deterministic)?;
        debug!(policy = %self.name, rows = rows.len(), "policy inference complete");

        let actions = rows
            .iter()
            .map(|row| denormalize(row, &self.statistics))
            .collect::<Result<Vec<_>, _>>()?;
        ActionSequence::new(actions)
    }
}
