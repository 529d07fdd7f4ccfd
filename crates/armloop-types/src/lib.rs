//! `armloop-types` – shared data model for the ArmLoop workspace.
//!
//! Actions, observations, goals, policy statistics and poses, plus the
//! [`ArmError`] type every crate returns.

use ndarray::{Array1, Array2, Array3, Array4, ArrayView1, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of components in an end-effector action: x, y, z, roll, pitch,
/// yaw and the gripper channel.
pub const ACTION_DIM: usize = 7;

/// Index of the roll component.
pub const ROLL_INDEX: usize = 3;
/// Index of the pitch component.
pub const PITCH_INDEX: usize = 4;
/// Index of the yaw component.
pub const YAW_INDEX: usize = 5;
/// Index of the gripper channel (`0.0` = closed, `1.0` = open).
pub const GRIPPER_INDEX: usize = 6;

/// An RGB camera frame laid out as `H × W × 3`.
pub type Image = Array3<u8>;

/// One end-effector command in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action(pub [f32; ACTION_DIM]);

impl Action {
    /// An all-zero action (no motion, gripper closed).
    pub fn zeros() -> Self {
        Self([0.0; ACTION_DIM])
    }

    /// Build an action from a slice, failing unless it has exactly
    /// [`ACTION_DIM`] entries.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] on a length mismatch.
    pub fn from_slice(values: &[f32]) -> Result<Self, ArmError> {
        let array: [f32; ACTION_DIM] = values.try_into().map_err(|_| {
            ArmError::Configuration(format!(
                "action has {} components, expected {ACTION_DIM}",
                values.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn gripper(&self) -> f32 {
        self.0[GRIPPER_INDEX]
    }

    pub fn set_gripper(&mut self, value: f32) {
        self.0[GRIPPER_INDEX] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// The ordered actions returned by one policy invocation.
///
/// Never empty: [`ActionSequence::new`] rejects an empty batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSequence(Vec<Action>);

impl ActionSequence {
    /// # Errors
    ///
    /// Returns [`ArmError::PolicyFault`] when `actions` is empty.
    pub fn new(actions: Vec<Action>) -> Result<Self, ArmError> {
        if actions.is_empty() {
            return Err(ArmError::PolicyFault(
                "policy returned an empty action sequence".to_string(),
            ));
        }
        Ok(Self(actions))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Action] {
        &self.0
    }
}

/// A single sensor sample: camera frame plus proprioceptive state.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub image: Image,
    pub proprio: Array1<f32>,
}

impl Observation {
    pub fn new(image: Image, proprio: Array1<f32>) -> Self {
        Self { image, proprio }
    }

    /// Convert a channel-first image with values in `[0, 1]` (the layout
    /// robot camera drivers publish) into an `H × W × 3` byte frame.
    ///
    /// Values are scaled by 255 and truncated; out-of-range values saturate.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] when `planar` does not hold
    /// exactly `3 × im_size × im_size` values.
    pub fn from_planar(planar: &[f32], im_size: usize, proprio: Vec<f32>) -> Result<Self, ArmError> {
        let plane = im_size * im_size;
        if planar.len() != 3 * plane {
            return Err(ArmError::ActuatorFault {
                component: "camera".to_string(),
                details: format!(
                    "expected {} planar values for a {im_size}x{im_size} image, got {}",
                    3 * plane,
                    planar.len()
                ),
            });
        }
        let image = Array3::from_shape_fn((im_size, im_size, 3), |(h, w, c)| {
            (planar[c * plane + h * im_size + w] * 255.0) as u8
        });
        Ok(Self::new(image, Array1::from(proprio)))
    }
}

/// Observations stacked along a new leading temporal axis, oldest first.
///
/// `image` has shape `T × H × W × 3` and `proprio` has shape `T × D`.
#[derive(Debug, Clone, PartialEq)]
pub struct StackedObservation {
    pub image: Array4<u8>,
    pub proprio: Array2<f32>,
}

impl StackedObservation {
    /// Stack `frames` (oldest first).
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] when `frames` is empty or the
    /// frames disagree on image or state shape.
    pub fn from_frames<'a, I>(frames: I) -> Result<Self, ArmError>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let frames: Vec<&Observation> = frames.into_iter().collect();
        let images: Vec<ArrayView3<'_, u8>> = frames.iter().map(|o| o.image.view()).collect();
        let states: Vec<ArrayView1<'_, f32>> = frames.iter().map(|o| o.proprio.view()).collect();

        let shape_fault = |e: ndarray::ShapeError| ArmError::ActuatorFault {
            component: "observation".to_string(),
            details: format!("cannot stack observations: {e}"),
        };
        let image = ndarray::stack(Axis(0), &images).map_err(shape_fault)?;
        let proprio = ndarray::stack(Axis(0), &states).map_err(shape_fault)?;
        Ok(Self { image, proprio })
    }

    /// Number of stacked time steps.
    pub fn horizon(&self) -> usize {
        self.image.len_of(Axis(0))
    }
}

/// Opaque, pre-encoded task goal handed to the policy alongside the
/// observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// The operator's instruction text, kept for logs and file names.
    pub instruction: String,
    /// Language embedding produced by the instruction encoder.
    pub language: Vec<f32>,
}

/// Per-dimension statistics used to map normalized policy output back into
/// physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatistics {
    pub action_mean: Vec<f32>,
    pub action_std: Vec<f32>,
}

impl PolicyStatistics {
    /// Identity statistics: zero mean, unit deviation.
    pub fn identity() -> Self {
        Self {
            action_mean: vec![0.0; ACTION_DIM],
            action_std: vec![1.0; ACTION_DIM],
        }
    }

    /// Check that both vectors match the action dimension.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] on any length mismatch.
    pub fn validate(&self) -> Result<(), ArmError> {
        if self.action_mean.len() != ACTION_DIM || self.action_std.len() != ACTION_DIM {
            return Err(ArmError::Configuration(format!(
                "action statistics have mean length {} and std length {}, expected {ACTION_DIM}",
                self.action_mean.len(),
                self.action_std.len()
            )));
        }
        Ok(())
    }
}

/// Target end-effector pose: position followed by an `(x, y, z, w)`
/// orientation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose(pub [f32; 7]);

impl Pose {
    /// A pose at `position` with the identity orientation.
    pub fn from_position(position: [f32; 3]) -> Self {
        let [x, y, z] = position;
        Self([x, y, z, 0.0, 0.0, 0.0, 1.0])
    }

    pub fn position(&self) -> [f32; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }
}

/// Axis-aligned box the end effector is allowed to reach.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl WorkspaceBounds {
    pub fn clamp(&self, position: [f32; 3]) -> [f32; 3] {
        let mut out = position;
        for (i, v) in out.iter_mut().enumerate() {
            *v = v.clamp(self.min[i], self.max[i]);
        }
        out
    }
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            min: [0.1, -0.15, -0.1],
            max: [0.45, 0.25, 0.25],
        }
    }
}

/// Workspace error type covering configuration problems, actuator faults
/// and policy failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    /// Invalid or inconsistent configuration. Always fatal.
    #[error("Configuration Fault: {0}")]
    Configuration(String),

    #[error("Actuator Fault on {component}: {details}")]
    ActuatorFault { component: String, details: String },

    #[error("Policy Fault: {0}")]
    PolicyFault(String),

    /// The diagnostic video sink could not store an episode.
    #[error("Video Sink Error: {0}")]
    Sink(String),
}

impl ArmError {
    /// `true` for errors that must stop the process rather than just the
    /// current episode.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArmError::Configuration(_))
    }
}
