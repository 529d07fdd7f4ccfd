//! [`ActionSequenceExecutor`] – runs a prefix of a policy's action batch.
//!
//! Every executed action goes through the same pipeline, in this order:
//!
//! 1. Gaussian exploration noise ([`ActionNoise`], per-dimension std).
//! 2. The [`StickyGripper`] debounce filter.
//! 3. The [`DofMask`], zeroing disabled rotation deltas.
//! 4. [`Actuator::step`] with the batch deadline.
//! 5. The frame that produced the batch is appended to the episode.
//!
//! An actuator fault stops the batch immediately.  Frames and steps recorded
//! before the fault stay in the [`EpisodeState`].

use std::num::NonZeroUsize;
use std::time::Instant;

use armloop_hal::Actuator;
use armloop_types::{
    ACTION_DIM, Action, ActionSequence, ArmError, Image, Observation, PITCH_INDEX, ROLL_INDEX,
    YAW_INDEX,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info_span};

use crate::episode::EpisodeState;
use crate::gripper::StickyGripper;

// ─────────────────────────────────────────────────────────────────────────────
// DOF mask
// ─────────────────────────────────────────────────────────────────────────────

/// Rotation degrees of freedom that are forced to zero before execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DofMask {
    /// Zero roll and pitch.
    pub no_pitch_roll: bool,
    /// Zero yaw.
    pub no_yaw: bool,
}

impl DofMask {
    pub fn apply(&self, action: &mut Action) {
        if self.no_pitch_roll {
            action.0[ROLL_INDEX] = 0.0;
            action.0[PITCH_INDEX] = 0.0;
        }
        if self.no_yaw {
            action.0[YAW_INDEX] = 0.0;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exploration noise
// ─────────────────────────────────────────────────────────────────────────────

/// Zero-mean Gaussian noise with a fixed std per action dimension.
///
/// Dimensions with a std of `0.0` are left untouched and draw nothing from
/// the generator.
pub struct ActionNoise {
    dists: [Option<Normal<f32>>; ACTION_DIM],
    rng: ChaCha8Rng,
}

impl ActionNoise {
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] when a std is negative or not
    /// finite.
    pub fn new(std: [f32; ACTION_DIM], seed: u64) -> Result<Self, ArmError> {
        let mut dists = [None; ACTION_DIM];
        for (i, &s) in std.iter().enumerate() {
            if !s.is_finite() || s < 0.0 {
                return Err(ArmError::Configuration(format!(
                    "action noise std[{i}] must be a finite value >= 0, got {s}"
                )));
            }
            if s > 0.0 {
                let normal = Normal::new(0.0, s)
                    .map_err(|e| ArmError::Configuration(format!("action noise std[{i}]: {e}")))?;
                dists[i] = Some(normal);
            }
        }
        Ok(Self {
            dists,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn apply(&mut self, action: &mut Action) {
        for (v, dist) in action.0.iter_mut().zip(&self.dists) {
            if let Some(dist) = dist {
                *v += dist.sample(&mut self.rng);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Static settings for [`ActionSequenceExecutor`].
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Maximum number of actions executed from one batch.
    pub exec_horizon: NonZeroUsize,
    pub dof_mask: DofMask,
    pub noise_std: [f32; ACTION_DIM],
    /// Forwarded to [`Actuator::step`].
    pub blocking: bool,
}

/// Result of one [`ActionSequenceExecutor::execute`] call.
#[derive(Debug)]
pub struct Execution {
    /// Observation returned by the last executed step.
    pub last_observation: Option<Observation>,
    /// Number of actions executed, which is also the number of frames added.
    pub executed: usize,
}

/// Executes the leading actions of a batch against an [`Actuator`].
pub struct ActionSequenceExecutor {
    config: ExecutorConfig,
    noise: ActionNoise,
}

impl ActionSequenceExecutor {
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] for an invalid noise std.
    pub fn new(config: ExecutorConfig, seed: u64) -> Result<Self, ArmError> {
        let noise = ActionNoise::new(config.noise_std, seed)?;
        Ok(Self { config, noise })
    }

    /// Execute `min(exec_horizon, batch.len(), budget)` actions.
    ///
    /// `frame` is the image the batch was computed from; it is appended to
    /// `episode.frames` once per executed action.  Every action shares
    /// `deadline`.
    ///
    /// # Errors
    ///
    /// Propagates the first actuator error.  Actions executed before it are
    /// already counted in `episode`.
    #[allow(clippy::too_many_arguments)]
    pub fn execute<A: Actuator + ?Sized>(
        &mut self,
        batch: &ActionSequence,
        budget: usize,
        frame: &Image,
        deadline: Instant,
        actuator: &mut A,
        gripper: &mut StickyGripper,
        episode: &mut EpisodeState,
    ) -> Result<Execution, ArmError> {
        let prefix = self
            .config
            .exec_horizon
            .get()
            .min(batch.len())
            .min(budget);
        let span = info_span!(
            "execute_batch",
            episode = %episode.id,
            batch = batch.len(),
            prefix
        );
        let _enter = span.enter();

        let mut last_observation = None;
        for (i, planned) in batch.iter().take(prefix).enumerate() {
            let mut action = *planned;
            self.noise.apply(&mut action);
            gripper.apply(&mut action);
            self.config.dof_mask.apply(&mut action);

            let observation = actuator.step(&action, deadline, self.config.blocking)?;
            episode.frames.push(frame.clone());
            episode.steps += 1;
            debug!(step = episode.steps, index = i, gripper = action.gripper(), "action executed");
            last_observation = Some(observation);
        }

        Ok(Execution {
            last_observation,
            executed: prefix,
        })
    }
}
