//! [`ControlLoop`] – the episode driver.
//!
//! The loop alternates between asking an [`Operator`] what to run and
//! rolling the chosen policy out on the arm:
//!
//! ```text
//! Idle → AwaitingInstruction → Resetting → Running → Completed | Aborted
//!              ↑                   │                        │
//!              └───────────────────┴────────────────────────┘
//! ```
//!
//! Each `Running` iteration waits for the next tick (unless blocking mode is
//! on), captures an observation, pushes it into the episode's
//! [`ObservationHistory`][crate::history::ObservationHistory], queries the
//! policy and hands the batch to the [`ActionSequenceExecutor`].  The episode
//! ends after exactly `num_timesteps` executed actions.
//!
//! # Failure handling
//!
//! - A failed reset or initial move skips the episode.  Nothing is recorded.
//! - Actuator and policy faults while running end the episode early.  The
//!   frames captured so far are still saved and the loop goes back to
//!   `AwaitingInstruction`.
//! - A [`ArmError::Configuration`] fault saves the frames and then stops the
//!   loop with the error.
//! - The shutdown flag is checked between batches.  When it is set the
//!   running episode is aborted, its frames saved and [`ControlLoop::run`]
//!   returns.
//!
//! # Example
//!
//! ```rust,no_run
//! use armloop_hal::SimArm;
//! use armloop_runtime::control_loop::{ControlLoop, ControlLoopConfig, Operator};
//! use armloop_runtime::policy::PolicyHandle;
//! use armloop_runtime::replay::ReplayPolicy;
//! use armloop_types::{Goal, PolicyStatistics};
//!
//! struct Once(bool);
//!
//! impl Operator for Once {
//!     fn select_policy(&mut self, _names: &[String]) -> Option<usize> {
//!         (!std::mem::replace(&mut self.0, true)).then_some(0)
//!     }
//!     fn new_goal(&mut self, _current: Option<&Goal>) -> Option<Goal> {
//!         Some(Goal { instruction: "open the drawer".into(), language: vec![0.0; 512] })
//!     }
//! }
//!
//! let replay = ReplayPolicy::new(vec![vec![vec![0.0; 7]]]).unwrap();
//! let policy = PolicyHandle::new(
//!     "replay-0",
//!     Box::new(replay),
//!     PolicyStatistics::identity(),
//!     None,
//! )
//! .unwrap();
//! let config = ControlLoopConfig { im_size: 4, ..ControlLoopConfig::default() };
//! let mut control = ControlLoop::new(config, SimArm::builder().build(), vec![policy]).unwrap();
//! let reports = control.run(&mut Once(false)).unwrap();
//! assert_eq!(reports.len(), 1);
//! ```

use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use armloop_hal::{Actuator, VideoSink};
use armloop_types::{ACTION_DIM, ArmError, Goal, Observation, Pose};
use chrono::{DateTime, Local};
use tracing::{debug, error, info, info_span, warn};

use crate::episode::{EpisodeOutcome, EpisodeReport, EpisodeState};
use crate::executor::{ActionSequenceExecutor, DofMask, ExecutorConfig};
use crate::gripper::StickyGripper;
use crate::policy::PolicyHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Recordings play back this many times faster than real time.
const VIDEO_SPEEDUP: f64 = 3.0;

/// `strftime` pattern for the timestamp prefix of recording file names.
const VIDEO_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const SHUTDOWN_REASON: &str = "operator shutdown";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`ControlLoop`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControlLoopConfig {
    /// Side length of the square camera frames the policy expects.
    pub im_size: usize,
    /// Target period between policy queries.
    pub step_duration: Duration,
    /// Actions executed per episode.
    pub num_timesteps: usize,
    /// Maximum actions executed from one policy batch.
    pub act_exec_horizon: usize,
    /// When `true` the loop does not wait for the tick and the actuator
    /// paces each step itself.
    pub blocking: bool,
    /// Consecutive disagreeing steps before the gripper flips.
    pub sticky_gripper_num_steps: usize,
    pub dof_mask: DofMask,
    /// Std of the Gaussian exploration noise, per action dimension.
    pub action_noise_std: [f32; ACTION_DIM],
    /// Pose to move to after every reset.
    pub initial_pose: Option<Pose>,
    pub initial_pose_duration: Duration,
    /// Directory for episode recordings.  `None` disables recording.
    pub video_save_path: Option<PathBuf>,
    /// Seed for the exploration noise generator.
    pub seed: u64,
    /// Keep the debounced gripper state from one episode to the next
    /// instead of reopening the gripper on every reset.
    pub persist_gripper_across_episodes: bool,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            im_size: 256,
            step_duration: Duration::from_millis(200),
            num_timesteps: 120,
            act_exec_horizon: 1,
            blocking: false,
            sticky_gripper_num_steps: 1,
            dof_mask: DofMask::default(),
            action_noise_std: [0.0; ACTION_DIM],
            initial_pose: None,
            initial_pose_duration: Duration::from_millis(1500),
            video_save_path: None,
            seed: 0,
            persist_gripper_across_episodes: false,
        }
    }
}

impl ControlLoopConfig {
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ArmError> {
        if self.im_size == 0 {
            return Err(ArmError::Configuration("im_size must be > 0".to_string()));
        }
        if self.step_duration.is_zero() {
            return Err(ArmError::Configuration(
                "step_duration must be > 0".to_string(),
            ));
        }
        if self.num_timesteps == 0 {
            return Err(ArmError::Configuration(
                "num_timesteps must be > 0".to_string(),
            ));
        }
        if self.act_exec_horizon == 0 {
            return Err(ArmError::Configuration(
                "act_exec_horizon must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Playback rate of the episode recordings.
    pub fn video_fps(&self) -> f64 {
        VIDEO_SPEEDUP / self.step_duration.as_secs_f64()
    }
}

/// File name of the recording for an episode of `policy` saved at `at`.
pub fn video_file_name(at: DateTime<Local>, policy: &str, sticky_steps: usize) -> String {
    format!(
        "{}_{policy}_sticky_{sticky_steps}.mp4",
        at.format(VIDEO_TIMESTAMP_FORMAT)
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Operator
// ─────────────────────────────────────────────────────────────────────────────

/// The human (or script) deciding what runs next.
pub trait Operator {
    /// Pick the policy for the next episode from `names`.  `None` ends the
    /// session.
    fn select_policy(&mut self, names: &[String]) -> Option<usize>;

    /// Return a new goal, or `None` to keep `current`.  When there is no
    /// current goal, `None` ends the session.
    fn new_goal(&mut self, current: Option<&Goal>) -> Option<Goal>;
}

/// Phase of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    AwaitingInstruction,
    Resetting,
    Running,
    Completed,
    Aborted,
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Drives episodes of the loaded policies on one arm.
pub struct ControlLoop<A: Actuator> {
    config: ControlLoopConfig,
    actuator: A,
    policies: Vec<PolicyHandle>,
    sink: Option<Box<dyn VideoSink>>,
    gripper: StickyGripper,
    executor: ActionSequenceExecutor,
    phase: LoopPhase,
    goal: Option<Goal>,
    shutdown: Arc<AtomicBool>,
}

impl<A: Actuator> ControlLoop<A> {
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] if `config` is invalid or no
    /// policy is given.
    pub fn new(
        config: ControlLoopConfig,
        actuator: A,
        policies: Vec<PolicyHandle>,
    ) -> Result<Self, ArmError> {
        config.validate()?;
        if policies.is_empty() {
            return Err(ArmError::Configuration(
                "at least one policy is required".to_string(),
            ));
        }
        let exec_horizon = NonZeroUsize::new(config.act_exec_horizon).ok_or_else(|| {
            ArmError::Configuration("act_exec_horizon must be >= 1".to_string())
        })?;
        let executor = ActionSequenceExecutor::new(
            ExecutorConfig {
                exec_horizon,
                dof_mask: config.dof_mask,
                noise_std: config.action_noise_std,
                blocking: config.blocking,
            },
            config.seed,
        )?;
        let gripper = StickyGripper::new(config.sticky_gripper_num_steps);

        info!(
            arm = actuator.id(),
            policies = policies.len(),
            num_timesteps = config.num_timesteps,
            act_exec_horizon = config.act_exec_horizon,
            "control loop ready"
        );

        Ok(Self {
            config,
            actuator,
            policies,
            sink: None,
            gripper,
            executor,
            phase: LoopPhase::Idle,
            goal: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Record episodes through `sink`.  Only used when
    /// [`ControlLoopConfig::video_save_path`] is set.
    pub fn with_video_sink(mut self, sink: Box<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use `flag` as the shutdown request flag.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Handle to the shutdown flag; storing `true` stops the loop at the
    /// next batch boundary.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn config(&self) -> &ControlLoopConfig {
        &self.config
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn goal(&self) -> Option<&Goal> {
        self.goal.as_ref()
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    /// Run episodes until the operator quits or shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns the first [`ArmError::Configuration`] fault.  Every other
    /// fault is contained in the episode's [`EpisodeReport`].
    pub fn run(&mut self, operator: &mut dyn Operator) -> Result<Vec<EpisodeReport>, ArmError> {
        let mut reports = Vec::new();
        let names = self.policy_names();

        while !self.shutdown_requested() {
            self.phase = LoopPhase::AwaitingInstruction;

            let Some(index) = operator.select_policy(&names) else {
                break;
            };
            if index >= names.len() {
                warn!(index, policies = names.len(), "no such policy");
                continue;
            }

            match operator.new_goal(self.goal.as_ref()) {
                Some(goal) => {
                    info!(instruction = %goal.instruction, "new instruction");
                    self.goal = Some(goal);
                }
                None if self.goal.is_none() => break,
                None => {}
            }
            if self.shutdown_requested() {
                break;
            }

            reports.push(self.run_episode(index)?);
        }

        self.phase = LoopPhase::Idle;
        Ok(reports)
    }

    /// Reset the arm and roll out policy `index` for one episode.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] when there is no goal, the index
    /// is out of range, or a configuration fault stops the rollout.
    pub fn run_episode(&mut self, index: usize) -> Result<EpisodeReport, ArmError> {
        let goal = self
            .goal
            .clone()
            .ok_or_else(|| ArmError::Configuration("no instruction given".to_string()))?;
        let policy = self
            .policies
            .get(index)
            .ok_or_else(|| ArmError::Configuration(format!("no policy at index {index}")))?;
        let mut episode = EpisodeState::new(policy.name(), policy.obs_horizon());

        let span = info_span!("episode", episode = %episode.id, policy = %episode.policy);
        let _enter = span.enter();

        self.phase = LoopPhase::Resetting;
        if let Err(e) = self.reset_arm() {
            warn!(error = %e, "reset failed, episode skipped");
            self.phase = LoopPhase::AwaitingInstruction;
            return Ok(EpisodeReport {
                id: episode.id,
                policy: episode.policy,
                outcome: EpisodeOutcome::ResetFailed {
                    reason: e.to_string(),
                },
                steps: 0,
                frames: 0,
                video_path: None,
            });
        }
        if !self.config.persist_gripper_across_episodes {
            self.gripper.reset();
        }

        self.phase = LoopPhase::Running;
        info!(instruction = %goal.instruction, "episode started");
        let outcome = match self.rollout(index, &goal, &mut episode) {
            Ok(None) => EpisodeOutcome::Completed,
            Ok(Some(reason)) => {
                warn!(steps = episode.steps, %reason, "episode aborted");
                EpisodeOutcome::Aborted { reason }
            }
            Err(e) if e.is_fatal() => {
                error!(steps = episode.steps, error = %e, "fatal fault, stopping");
                self.phase = LoopPhase::Aborted;
                self.save_video(&episode);
                return Err(e);
            }
            Err(e) => {
                error!(steps = episode.steps, error = %e, "episode aborted");
                EpisodeOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        };

        self.phase = if outcome.is_completed() {
            LoopPhase::Completed
        } else {
            LoopPhase::Aborted
        };
        let video_path = self.save_video(&episode);
        let elapsed = Local::now().signed_duration_since(episode.started_at);
        info!(
            steps = episode.steps,
            frames = episode.frames.len(),
            started_at = %episode.started_at.format(VIDEO_TIMESTAMP_FORMAT),
            elapsed_ms = elapsed.num_milliseconds(),
            "episode finished"
        );

        Ok(EpisodeReport {
            id: episode.id,
            policy: episode.policy,
            outcome,
            steps: episode.steps,
            frames: episode.frames.len(),
            video_path,
        })
    }

    fn reset_arm(&mut self) -> Result<(), ArmError> {
        self.actuator.reset()?;
        if let Some(pose) = self.config.initial_pose {
            self.actuator
                .move_to_pose(&pose, self.config.initial_pose_duration)?;
            self.actuator.clear_motion_history();
        }
        Ok(())
    }

    /// Run batches until the step budget is spent.  Returns the abort reason
    /// when shutdown was requested.
    fn rollout(
        &mut self,
        index: usize,
        goal: &Goal,
        episode: &mut EpisodeState,
    ) -> Result<Option<String>, ArmError> {
        let step_duration = self.config.step_duration;
        let mut last_tick = Instant::now();
        let mut observation: Option<Observation> = None;

        while episode.steps < self.config.num_timesteps {
            if self.shutdown_requested() {
                return Ok(Some(SHUTDOWN_REASON.to_string()));
            }

            if !self.config.blocking {
                let next_tick = last_tick + step_duration;
                let now = Instant::now();
                if now < next_tick {
                    std::thread::sleep(next_tick - now);
                }
            }
            last_tick = Instant::now();

            let obs = match observation.take() {
                Some(obs) => obs,
                None => self.actuator.current_observation()?,
            };
            self.check_frame(&obs)?;
            let frame = obs.image.clone();
            let stacked = episode.history.push(obs)?;

            let batch = self.policies[index].infer(&stacked, goal)?;
            let budget = episode.remaining(self.config.num_timesteps);
            let execution = self.executor.execute(
                &batch,
                budget,
                &frame,
                last_tick + step_duration,
                &mut self.actuator,
                &mut self.gripper,
                episode,
            )?;
            debug!(
                executed = execution.executed,
                steps = episode.steps,
                "batch done"
            );
            observation = execution.last_observation;
        }
        Ok(None)
    }

    fn check_frame(&self, obs: &Observation) -> Result<(), ArmError> {
        let (height, width, _) = obs.image.dim();
        let size = self.config.im_size;
        if height != size || width != size {
            return Err(ArmError::ActuatorFault {
                component: "camera".to_string(),
                details: format!("expected a {size}x{size} frame, got {height}x{width}"),
            });
        }
        Ok(())
    }

    /// Hand the episode's frames to the sink.  Failures are logged, never
    /// propagated.
    fn save_video(&mut self, episode: &EpisodeState) -> Option<PathBuf> {
        let dir = self.config.video_save_path.as_ref()?;
        let sink = self.sink.as_mut()?;
        if episode.frames.is_empty() {
            debug!("no frames captured, nothing to save");
            return None;
        }

        if let Err(e) = fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "cannot create video directory");
            return None;
        }
        let path = dir.join(video_file_name(
            Local::now(),
            &episode.policy,
            self.gripper.threshold(),
        ));
        match sink.save(&episode.frames, &path, self.config.video_fps()) {
            Ok(()) => {
                info!(path = %path.display(), frames = episode.frames.len(), "episode video saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to save episode video");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
