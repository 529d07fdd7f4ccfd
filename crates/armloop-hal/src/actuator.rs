//! Generic `Actuator` trait for end-effector controlled robot arms.
//!
//! Drivers implement this trait and hand themselves to the control loop.  The
//! loop only ever talks to the trait, so a real arm controller and the
//! [`SimArm`][crate::sim::SimArm] are interchangeable.

use std::time::{Duration, Instant};

use armloop_types::{Action, ArmError, Observation, Pose};

/// A robot arm that executes end-effector actions and reports observations.
pub trait Actuator {
    /// Stable identifier for this arm, e.g. `"widowx"`.
    fn id(&self) -> &str;

    /// Bring the arm back to its start state and (re)start its controller.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] if the controller cannot be reset.
    fn reset(&mut self) -> Result<(), ArmError>;

    /// Move the end effector to `pose`, taking `duration` for the motion.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] if the motion cannot be executed.
    fn move_to_pose(&mut self, pose: &Pose, duration: Duration) -> Result<(), ArmError>;

    /// Forget previously commanded joint positions so the next step does not
    /// interpolate from a stale target.  Called after an explicit
    /// [`move_to_pose`][Self::move_to_pose].
    fn clear_motion_history(&mut self) {}

    /// Execute one action.
    ///
    /// `deadline` is the wall-clock instant by which the step should complete.
    /// When `blocking` is `true` the driver paces itself and may ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] if the action cannot be applied.
    fn step(&mut self, action: &Action, deadline: Instant, blocking: bool)
        -> Result<Observation, ArmError>;

    /// Read the current observation without moving.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] if the sensors cannot be read.
    fn current_observation(&mut self) -> Result<Observation, ArmError>;
}
