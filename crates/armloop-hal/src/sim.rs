//! In-process simulated arm for CI/CD testing without physical hardware.
//!
//! [`SimArm`] integrates delta end-effector actions, clips the position to
//! its [`WorkspaceBounds`], renders a synthetic camera frame from its state
//! and records every command it receives.  Faults can be scripted through
//! [`SimArmBuilder`] so the control loop's recovery paths can be exercised
//! in headless tests.
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use armloop_hal::{Actuator, SimArm};
//! use armloop_types::Action;
//!
//! let mut arm = SimArm::builder().with_im_size(8).build();
//! arm.reset().expect("sim reset must succeed");
//! let obs = arm
//!     .step(&Action::zeros(), Instant::now(), true)
//!     .expect("sim step must succeed");
//! assert_eq!(obs.image.shape(), &[8, 8, 3]);
//! ```

use std::time::{Duration, Instant};

use armloop_types::{Action, ArmError, Observation, Pose, WorkspaceBounds, GRIPPER_INDEX};
use tracing::debug;

use crate::actuator::Actuator;

// ────────────────────────────────────────────────────────────────────────────
// Recorded commands
// ────────────────────────────────────────────────────────────────────────────

/// One `step` call as seen by the simulated arm.
#[derive(Debug, Clone, PartialEq)]
pub struct SimStep {
    pub action: Action,
    pub deadline: Instant,
    pub blocking: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// SimArm
// ────────────────────────────────────────────────────────────────────────────

/// A simulated end-effector controlled arm.
pub struct SimArm {
    id: String,
    im_size: usize,
    bounds: WorkspaceBounds,
    start: Pose,
    position: [f32; 3],
    orientation: [f32; 3],
    gripper: f32,
    steps: Vec<SimStep>,
    poses: Vec<Pose>,
    resets: usize,
    history_clears: usize,
    fail_reset: bool,
    fail_move: bool,
    fail_step_at: Option<usize>,
}

impl SimArm {
    pub fn builder() -> SimArmBuilder {
        SimArmBuilder::new()
    }

    /// Every step received so far, in order.
    pub fn steps(&self) -> &[SimStep] {
        &self.steps
    }

    /// Every pose commanded through `move_to_pose`.
    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn history_clears(&self) -> usize {
        self.history_clears
    }

    pub fn position(&self) -> [f32; 3] {
        self.position
    }

    fn fault(details: impl Into<String>) -> ArmError {
        ArmError::ActuatorFault {
            component: "sim_arm".to_string(),
            details: details.into(),
        }
    }

    /// Render the state as a channel-first `[0, 1]` image, the layout a real
    /// camera driver publishes, then convert it.
    fn observe(&self) -> Result<Observation, ArmError> {
        let plane = self.im_size * self.im_size;
        let mut planar = Vec::with_capacity(3 * plane);
        for axis in 0..2 {
            let span = self.bounds.max[axis] - self.bounds.min[axis];
            let value = if span > 0.0 {
                (self.position[axis] - self.bounds.min[axis]) / span
            } else {
                0.0
            };
            planar.extend(std::iter::repeat_n(value, plane));
        }
        planar.extend(std::iter::repeat_n(self.gripper, plane));

        let mut state = Vec::with_capacity(7);
        state.extend_from_slice(&self.position);
        state.extend_from_slice(&self.orientation);
        state.push(self.gripper);

        Observation::from_planar(&planar, self.im_size, state)
    }
}

impl Actuator for SimArm {
    fn id(&self) -> &str {
        &self.id
    }

    fn reset(&mut self) -> Result<(), ArmError> {
        if self.fail_reset {
            return Err(Self::fault("reset rejected by controller"));
        }
        self.position = self.bounds.clamp(self.start.position());
        self.orientation = [0.0; 3];
        self.gripper = 1.0;
        self.resets += 1;
        Ok(())
    }

    fn move_to_pose(&mut self, pose: &Pose, _duration: Duration) -> Result<(), ArmError> {
        if self.fail_move {
            return Err(Self::fault("pose unreachable"));
        }
        self.position = self.bounds.clamp(pose.position());
        self.poses.push(*pose);
        Ok(())
    }

    fn clear_motion_history(&mut self) {
        self.history_clears += 1;
    }

    fn step(
        &mut self,
        action: &Action,
        deadline: Instant,
        blocking: bool,
    ) -> Result<Observation, ArmError> {
        if self.fail_step_at == Some(self.steps.len()) {
            return Err(Self::fault(format!("step {} failed", self.steps.len())));
        }
        let a = action.as_slice();
        let target = [
            self.position[0] + a[0],
            self.position[1] + a[1],
            self.position[2] + a[2],
        ];
        self.position = self.bounds.clamp(target);
        for (o, delta) in self.orientation.iter_mut().zip(&a[3..GRIPPER_INDEX]) {
            *o += delta;
        }
        self.gripper = action.gripper();
        self.steps.push(SimStep {
            action: *action,
            deadline,
            blocking,
        });
        debug!(step = self.steps.len(), position = ?self.position, "sim arm stepped");
        self.observe()
    }

    fn current_observation(&mut self) -> Result<Observation, ArmError> {
        self.observe()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimArmBuilder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimArm`].
///
/// Call the `with_*` methods to configure geometry and scripted faults, then
/// [`build`][Self::build].
pub struct SimArmBuilder {
    id: String,
    im_size: usize,
    bounds: WorkspaceBounds,
    start: Pose,
    fail_reset: bool,
    fail_move: bool,
    fail_step_at: Option<usize>,
}

impl Default for SimArmBuilder {
    fn default() -> Self {
        Self {
            id: "sim_arm".to_string(),
            im_size: 4,
            bounds: WorkspaceBounds::default(),
            start: Pose::from_position([0.3, 0.0, 0.15]),
            fail_reset: false,
            fail_move: false,
            fail_step_at: None,
        }
    }
}

impl SimArmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Side length of the square camera frame.
    pub fn with_im_size(mut self, im_size: usize) -> Self {
        self.im_size = im_size;
        self
    }

    pub fn with_bounds(mut self, bounds: WorkspaceBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Pose the arm returns to on every `reset`.
    pub fn with_start_pose(mut self, start: Pose) -> Self {
        self.start = start;
        self
    }

    /// Make every `reset` call fail.
    pub fn failing_reset(mut self) -> Self {
        self.fail_reset = true;
        self
    }

    /// Make every `move_to_pose` call fail.
    pub fn failing_move(mut self) -> Self {
        self.fail_move = true;
        self
    }

    /// Fail the `n`-th step call (0-based, counted over the arm's lifetime).
    pub fn failing_step_at(mut self, n: usize) -> Self {
        self.fail_step_at = Some(n);
        self
    }

    pub fn build(self) -> SimArm {
        let position = self.bounds.clamp(self.start.position());
        SimArm {
            id: self.id,
            im_size: self.im_size,
            bounds: self.bounds,
            start: self.start,
            position,
            orientation: [0.0; 3],
            gripper: 1.0,
            steps: Vec::new(),
            poses: Vec::new(),
            resets: 0,
            history_clears: 0,
            fail_reset: self.fail_reset,
            fail_move: self.fail_move,
            fail_step_at: self.fail_step_at,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
