//! End-to-end episodes against the simulated arm.

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use armloop_hal::{FrameDirSink, SimArm, VideoSink};
use armloop_runtime::{
    ControlLoop, ControlLoopConfig, DofMask, EpisodeOutcome, LoopPhase, Operator, Policy,
    PolicyHandle,
};
use armloop_types::{
    ACTION_DIM, ArmError, Goal, Image, PITCH_INDEX, PolicyStatistics, ROLL_INDEX,
    StackedObservation, YAW_INDEX,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PolicyLog {
    calls: usize,
    horizons: Vec<usize>,
}

/// Returns `batch` copies of `row` and records what it was asked.
struct ScriptedPolicy {
    row: Vec<f32>,
    batch: usize,
    log: Rc<RefCell<PolicyLog>>,
    shutdown_after: Option<(usize, Arc<AtomicBool>)>,
}

impl ScriptedPolicy {
    fn new(row: Vec<f32>, batch: usize) -> (Self, Rc<RefCell<PolicyLog>>) {
        let log = Rc::new(RefCell::new(PolicyLog::default()));
        let policy = Self {
            row,
            batch,
            log: Rc::clone(&log),
            shutdown_after: None,
        };
        (policy, log)
    }

    /// Raise `flag` once `calls` invocations have been served.
    fn raising_shutdown_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_after = Some((calls, flag));
        self
    }
}

impl Policy for ScriptedPolicy {
    fn sample_actions(
        &mut self,
        observation: &StackedObservation,
        _goal: &Goal,
        _seed: u64,
        _argmax: bool,
    ) -> Result<Vec<Vec<f32>>, ArmError> {
        let mut log = self.log.borrow_mut();
        log.calls += 1;
        log.horizons.push(observation.horizon());
        if let Some((after, flag)) = &self.shutdown_after {
            if log.calls >= *after {
                flag.store(true, Ordering::Release);
            }
        }
        Ok(vec![self.row.clone(); self.batch])
    }
}

/// Serves zero actions but fails on its `fail_on`-th invocation.
struct FlakyPolicy {
    calls: usize,
    fail_on: usize,
    batch: usize,
}

impl Policy for FlakyPolicy {
    fn sample_actions(
        &mut self,
        _observation: &StackedObservation,
        _goal: &Goal,
        _seed: u64,
        _argmax: bool,
    ) -> Result<Vec<Vec<f32>>, ArmError> {
        self.calls += 1;
        if self.calls == self.fail_on {
            return Err(ArmError::PolicyFault("boom".to_string()));
        }
        Ok(vec![vec![0.0; ACTION_DIM]; self.batch])
    }
}

/// Runs `episodes` episodes of policy 0 with one instruction.
struct ScriptedOperator {
    episodes: usize,
}

impl Operator for ScriptedOperator {
    fn select_policy(&mut self, _names: &[String]) -> Option<usize> {
        if self.episodes == 0 {
            return None;
        }
        self.episodes -= 1;
        Some(0)
    }

    fn new_goal(&mut self, current: Option<&Goal>) -> Option<Goal> {
        current.is_none().then(|| Goal {
            instruction: "wipe the table".to_string(),
            language: vec![0.0; 16],
        })
    }
}

/// Counts saved recordings and their frames.
#[derive(Clone, Default)]
struct CountingSink(Rc<RefCell<Vec<usize>>>);

impl VideoSink for CountingSink {
    fn save(&mut self, frames: &[Image], _path: &Path, _fps: f64) -> Result<(), ArmError> {
        self.0.borrow_mut().push(frames.len());
        Ok(())
    }
}

struct BrokenSink;

impl VideoSink for BrokenSink {
    fn save(&mut self, _frames: &[Image], _path: &Path, _fps: f64) -> Result<(), ArmError> {
        Err(ArmError::Sink("disk full".to_string()))
    }
}

fn config(num_timesteps: usize, act_exec_horizon: usize) -> ControlLoopConfig {
    ControlLoopConfig {
        im_size: 4,
        step_duration: Duration::from_millis(1),
        num_timesteps,
        act_exec_horizon,
        blocking: true,
        ..ControlLoopConfig::default()
    }
}

fn handle(policy: ScriptedPolicy, name: &str) -> PolicyHandle {
    PolicyHandle::new(name, Box::new(policy), PolicyStatistics::identity(), None).unwrap()
}

fn handle_boxed(policy: impl Policy + 'static) -> PolicyHandle {
    PolicyHandle::new("bc-flaky", Box::new(policy), PolicyStatistics::identity(), None).unwrap()
}

fn zero_policy(batch: usize) -> (ScriptedPolicy, Rc<RefCell<PolicyLog>>) {
    let mut row = vec![0.0; ACTION_DIM];
    row[ACTION_DIM - 1] = 1.0;
    ScriptedPolicy::new(row, batch)
}

// ─────────────────────────────────────────────────────────────────────────────
// Episode length and batching
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn episode_executes_exactly_num_timesteps_actions() {
    let (policy, log) = zero_policy(3);
    let mut control =
        ControlLoop::new(config(10, 4), SimArm::builder().build(), vec![handle(policy, "bc-1")])
            .unwrap();

    let reports = control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, EpisodeOutcome::Completed);
    assert_eq!(reports[0].steps, 10);
    assert_eq!(reports[0].frames, 10);
    assert_eq!(control.actuator().steps().len(), 10);
    // 3 + 3 + 3 + 1: the last batch is cut to the remaining budget.
    assert_eq!(log.borrow().calls, 4);
}

#[test]
fn exec_horizon_caps_every_batch() {
    let (policy, log) = zero_policy(5);
    let mut control =
        ControlLoop::new(config(10, 2), SimArm::builder().build(), vec![handle(policy, "bc-1")])
            .unwrap();

    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    assert_eq!(log.borrow().calls, 5);
    assert_eq!(control.actuator().steps().len(), 10);
}

#[test]
fn every_action_of_a_batch_shares_one_deadline() {
    let (policy, _) = zero_policy(3);
    let mut control =
        ControlLoop::new(config(6, 3), SimArm::builder().build(), vec![handle(policy, "bc-1")])
            .unwrap();
    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    let steps = control.actuator().steps();
    assert_eq!(steps[0].deadline, steps[2].deadline);
    assert_eq!(steps[3].deadline, steps[5].deadline);
    assert!(steps[3].deadline > steps[0].deadline);
    assert!(steps.iter().all(|s| s.blocking));
}

#[test]
fn paced_loop_waits_for_each_tick() {
    let (policy, _) = zero_policy(1);
    let cfg = ControlLoopConfig {
        step_duration: Duration::from_millis(20),
        blocking: false,
        ..config(3, 1)
    };
    let mut control =
        ControlLoop::new(cfg, SimArm::builder().build(), vec![handle(policy, "bc-1")]).unwrap();

    let started = Instant::now();
    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    assert!(started.elapsed() >= Duration::from_millis(60));
    let steps = control.actuator().steps();
    for pair in steps.windows(2) {
        assert!(pair[1].deadline - pair[0].deadline >= Duration::from_millis(20));
    }
    assert!(steps.iter().all(|s| !s.blocking));
}

#[test]
fn observation_horizon_is_stacked_for_the_policy() {
    let (policy, log) = zero_policy(1);
    let handle = PolicyHandle::new(
        "bc-hist",
        Box::new(policy),
        PolicyStatistics::identity(),
        NonZeroUsize::new(3),
    )
    .unwrap();
    let mut control = ControlLoop::new(config(4, 1), SimArm::builder().build(), vec![handle]).unwrap();
    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    assert_eq!(log.borrow().horizons, vec![3, 3, 3, 3]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Action shaping
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn masked_rotations_never_reach_the_arm() {
    let (policy, _) = ScriptedPolicy::new(vec![0.01, 0.0, 0.0, 0.2, 0.2, 0.2, 1.0], 2);
    let cfg = ControlLoopConfig {
        dof_mask: DofMask {
            no_pitch_roll: true,
            no_yaw: true,
        },
        ..config(4, 2)
    };
    let mut control =
        ControlLoop::new(cfg, SimArm::builder().build(), vec![handle(policy, "bc-1")]).unwrap();
    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    for step in control.actuator().steps() {
        assert_eq!(step.action.0[ROLL_INDEX], 0.0);
        assert_eq!(step.action.0[PITCH_INDEX], 0.0);
        assert_eq!(step.action.0[YAW_INDEX], 0.0);
        assert_eq!(step.action.0[0], 0.01);
    }
}

#[test]
fn masked_rotations_stay_zero_under_noise() {
    let (policy, _) = zero_policy(1);
    let mut noise = [0.0; ACTION_DIM];
    noise[0] = 0.05;
    noise[ROLL_INDEX] = 0.5;
    noise[PITCH_INDEX] = 0.5;
    noise[YAW_INDEX] = 0.5;
    let cfg = ControlLoopConfig {
        dof_mask: DofMask {
            no_pitch_roll: true,
            no_yaw: true,
        },
        action_noise_std: noise,
        seed: 7,
        ..config(8, 1)
    };
    let mut control =
        ControlLoop::new(cfg, SimArm::builder().build(), vec![handle(policy, "bc-1")]).unwrap();
    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    let steps = control.actuator().steps();
    assert_eq!(steps.len(), 8);
    for step in steps {
        assert_eq!(step.action.0[ROLL_INDEX], 0.0);
        assert_eq!(step.action.0[PITCH_INDEX], 0.0);
        assert_eq!(step.action.0[YAW_INDEX], 0.0);
    }
    // Unmasked dimensions do pick up the noise.
    assert!(steps.iter().any(|s| s.action.0[0] != 0.0));
}

#[test]
fn yaw_can_be_masked_on_its_own() {
    let (policy, _) = ScriptedPolicy::new(vec![0.0, 0.0, 0.0, 0.2, 0.3, 0.4, 1.0], 1);
    let mut noise = [0.0; ACTION_DIM];
    noise[YAW_INDEX] = 0.5;
    let cfg = ControlLoopConfig {
        dof_mask: DofMask {
            no_pitch_roll: false,
            no_yaw: true,
        },
        action_noise_std: noise,
        ..config(3, 1)
    };
    let mut control =
        ControlLoop::new(cfg, SimArm::builder().build(), vec![handle(policy, "bc-1")]).unwrap();
    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    for step in control.actuator().steps() {
        assert_eq!(step.action.0[ROLL_INDEX], 0.2);
        assert_eq!(step.action.0[PITCH_INDEX], 0.3);
        assert_eq!(step.action.0[YAW_INDEX], 0.0);
    }
}

#[test]
fn denormalized_actions_are_executed() {
    let (policy, _) = ScriptedPolicy::new(vec![1.0; ACTION_DIM], 1);
    let stats = PolicyStatistics {
        action_mean: vec![0.01, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5],
        action_std: vec![0.02, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5],
    };
    let handle = PolicyHandle::new("bc-stats", Box::new(policy), stats, None).unwrap();
    let mut control = ControlLoop::new(config(1, 1), SimArm::builder().build(), vec![handle]).unwrap();
    control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    let sent = control.actuator().steps()[0].action;
    assert!((sent.0[0] - 0.03).abs() < 1e-6);
    // 1.0 * 0.5 + 0.5 = 1.0 → open
    assert_eq!(sent.gripper(), 1.0);
}

#[test]
fn gripper_state_resets_between_episodes_unless_persisted() {
    // One close request per episode with a threshold of two.
    let closing = || ScriptedPolicy::new(vec![0.0; ACTION_DIM], 1).0;
    let cfg = ControlLoopConfig {
        sticky_gripper_num_steps: 2,
        ..config(1, 1)
    };

    let mut fresh =
        ControlLoop::new(cfg.clone(), SimArm::builder().build(), vec![handle(closing(), "bc")])
            .unwrap();
    fresh.run(&mut ScriptedOperator { episodes: 2 }).unwrap();
    let sent: Vec<f32> = fresh.actuator().steps().iter().map(|s| s.action.gripper()).collect();
    assert_eq!(sent, vec![1.0, 1.0]);

    let persisted_cfg = ControlLoopConfig {
        persist_gripper_across_episodes: true,
        ..cfg
    };
    let mut persisted =
        ControlLoop::new(persisted_cfg, SimArm::builder().build(), vec![handle(closing(), "bc")])
            .unwrap();
    persisted.run(&mut ScriptedOperator { episodes: 2 }).unwrap();
    let sent: Vec<f32> = persisted.actuator().steps().iter().map(|s| s.action.gripper()).collect();
    assert_eq!(sent, vec![1.0, 0.0]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Faults
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn mid_batch_fault_keeps_partial_frames_and_continues() {
    let (policy, _) = zero_policy(2);
    let arm = SimArm::builder().failing_step_at(3).build();
    let sink = CountingSink::default();
    let saved = Rc::clone(&sink.0);
    let dir = tempfile::tempdir().unwrap();
    let cfg = ControlLoopConfig {
        video_save_path: Some(dir.path().to_path_buf()),
        ..config(10, 2)
    };
    let mut control = ControlLoop::new(cfg, arm, vec![handle(policy, "bc-1")])
        .unwrap()
        .with_video_sink(Box::new(sink));

    let reports = control.run(&mut ScriptedOperator { episodes: 2 }).unwrap();

    assert_eq!(reports.len(), 2);
    assert!(matches!(reports[0].outcome, EpisodeOutcome::Aborted { .. }));
    assert_eq!(reports[0].frames, 3);
    assert_eq!(reports[0].steps, 3);
    assert!(reports[0].video_path.is_some());
    // The arm keeps failing on its fourth step, so the second episode ends
    // before anything was executed and nothing is saved for it.
    assert_eq!(reports[1].frames, 0);
    assert!(reports[1].video_path.is_none());
    assert_eq!(*saved.borrow(), vec![3]);
    assert_eq!(control.phase(), LoopPhase::Idle);
}

#[test]
fn policy_fault_ends_only_the_running_episode() {
    let policy = FlakyPolicy {
        calls: 0,
        fail_on: 2,
        batch: 2,
    };
    let mut control =
        ControlLoop::new(config(6, 2), SimArm::builder().build(), vec![handle_boxed(policy)])
            .unwrap();

    let reports = control.run(&mut ScriptedOperator { episodes: 2 }).unwrap();

    assert_eq!(reports.len(), 2);
    match &reports[0].outcome {
        EpisodeOutcome::Aborted { reason } => assert!(reason.contains("boom")),
        other => panic!("expected an aborted episode, got {other:?}"),
    }
    assert_eq!((reports[0].steps, reports[0].frames), (2, 2));
    assert_eq!(reports[1].outcome, EpisodeOutcome::Completed);
    assert_eq!((reports[1].steps, reports[1].frames), (6, 6));
    assert_eq!(control.actuator().steps().len(), 8);
}

#[test]
fn reset_failure_skips_the_episode_without_recording() {
    let (policy, log) = zero_policy(1);
    let sink = CountingSink::default();
    let saved = Rc::clone(&sink.0);
    let dir = tempfile::tempdir().unwrap();
    let cfg = ControlLoopConfig {
        video_save_path: Some(dir.path().to_path_buf()),
        ..config(5, 1)
    };
    let mut control = ControlLoop::new(
        cfg,
        SimArm::builder().failing_reset().build(),
        vec![handle(policy, "bc-1")],
    )
    .unwrap()
    .with_video_sink(Box::new(sink));

    let reports = control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    assert!(matches!(reports[0].outcome, EpisodeOutcome::ResetFailed { .. }));
    assert_eq!(log.borrow().calls, 0);
    assert!(control.actuator().steps().is_empty());
    assert!(saved.borrow().is_empty());
}

#[test]
fn failed_initial_move_counts_as_reset_failure() {
    let (policy, _) = zero_policy(1);
    let cfg = ControlLoopConfig {
        initial_pose: Some(armloop_types::Pose::from_position([0.3, 0.0, 0.1])),
        ..config(5, 1)
    };
    let mut control = ControlLoop::new(
        cfg,
        SimArm::builder().failing_move().build(),
        vec![handle(policy, "bc-1")],
    )
    .unwrap();

    let reports = control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();
    assert!(matches!(reports[0].outcome, EpisodeOutcome::ResetFailed { .. }));
}

#[test]
fn sink_errors_do_not_fail_the_episode() {
    let (policy, _) = zero_policy(1);
    let dir = tempfile::tempdir().unwrap();
    let cfg = ControlLoopConfig {
        video_save_path: Some(dir.path().to_path_buf()),
        ..config(2, 1)
    };
    let mut control = ControlLoop::new(cfg, SimArm::builder().build(), vec![handle(policy, "bc-1")])
        .unwrap()
        .with_video_sink(Box::new(BrokenSink));

    let reports = control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();
    assert_eq!(reports[0].outcome, EpisodeOutcome::Completed);
    assert!(reports[0].video_path.is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording and shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn recording_is_named_after_policy_and_threshold() {
    let (policy, _) = zero_policy(2);
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    let cfg = ControlLoopConfig {
        video_save_path: Some(videos.clone()),
        sticky_gripper_num_steps: 2,
        ..config(4, 2)
    };
    let mut control =
        ControlLoop::new(cfg, SimArm::builder().build(), vec![handle(policy, "bc-250000")])
            .unwrap()
            .with_video_sink(Box::new(FrameDirSink::new()));

    let reports = control.run(&mut ScriptedOperator { episodes: 1 }).unwrap();

    let path = reports[0].video_path.clone().expect("video saved");
    assert_eq!(path.parent(), Some(videos.as_path()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("_bc-250000_sticky_2.mp4"), "{name}");
    // "%Y-%m-%d_%H-%M-%S" prefix
    assert_eq!(name.len(), "2024-01-01_00-00-00_bc-250000_sticky_2.mp4".len());

    let frames = std::fs::read_dir(FrameDirSink::frame_dir(&path)).unwrap().count();
    assert_eq!(frames, 4);
}

#[test]
fn shutdown_aborts_at_the_next_batch_boundary() {
    let flag = Arc::new(AtomicBool::new(false));
    let (policy, log) = zero_policy(2);
    let policy = policy.raising_shutdown_after(1, Arc::clone(&flag));
    let sink = CountingSink::default();
    let saved = Rc::clone(&sink.0);
    let dir = tempfile::tempdir().unwrap();
    let cfg = ControlLoopConfig {
        video_save_path: Some(dir.path().to_path_buf()),
        ..config(10, 2)
    };
    let mut control = ControlLoop::new(cfg, SimArm::builder().build(), vec![handle(policy, "bc-1")])
        .unwrap()
        .with_shutdown(Arc::clone(&flag))
        .with_video_sink(Box::new(sink));

    let reports = control.run(&mut ScriptedOperator { episodes: 5 }).unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].outcome,
        EpisodeOutcome::Aborted {
            reason: "operator shutdown".to_string()
        }
    );
    // The batch that was already running finishes.
    assert_eq!(reports[0].steps, 2);
    assert_eq!(log.borrow().calls, 1);
    assert_eq!(*saved.borrow(), vec![2]);
    assert!(control.shutdown_flag().load(Ordering::Acquire));
}
