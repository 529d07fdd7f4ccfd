//! [`StickyGripper`] – debounce filter for the gripper channel.
//!
//! Policies emit a continuous gripper value per step and it can flicker
//! around the decision boundary.  The filter tracks a discrete open/closed
//! state and only flips it after `threshold` consecutive steps disagree with
//! the current state.  Any agreeing step resets the streak.
//!
//! With `threshold == 1` the filter degenerates to an immediate toggle.
//!
//! # Example
//!
//! ```rust
//! use armloop_runtime::gripper::StickyGripper;
//! use armloop_types::Action;
//!
//! let mut gripper = StickyGripper::new(2);
//!
//! // Gripper channel 0.0 requests a close.  `apply` rewrites the channel,
//! // so every step starts from a fresh policy output.
//! let mut first = Action::zeros();
//! gripper.apply(&mut first);
//! assert!(!gripper.state().is_closed); // first disagreement only counts
//! assert_eq!(first.gripper(), 1.0);
//!
//! let mut second = Action::zeros();
//! gripper.apply(&mut second);
//! assert!(gripper.state().is_closed); // second one flips
//! assert_eq!(second.gripper(), 0.0);
//! ```

use armloop_types::Action;

/// Gripper channel values below this request a closed gripper.
const CLOSE_THRESHOLD: f32 = 0.5;

/// Debounced gripper state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GripperState {
    pub is_closed: bool,
    /// Consecutive steps whose request disagreed with `is_closed`.
    pub consecutive_change_count: usize,
}

/// Hysteresis filter turning a noisy gripper signal into a stable command.
#[derive(Debug, Clone)]
pub struct StickyGripper {
    threshold: usize,
    state: GripperState,
}

impl StickyGripper {
    /// Create an open gripper that flips after `threshold` consecutive
    /// disagreeing steps.  The threshold is used as given.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            state: GripperState::default(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn state(&self) -> GripperState {
        self.state
    }

    /// Advance the state machine with `action`'s gripper request and
    /// overwrite its gripper channel with the debounced command
    /// (`0.0` closed, `1.0` open).
    pub fn apply(&mut self, action: &mut Action) {
        let close_requested = action.gripper() < CLOSE_THRESHOLD;

        if close_requested != self.state.is_closed {
            self.state.consecutive_change_count += 1;
        } else {
            self.state.consecutive_change_count = 0;
        }

        if self.state.consecutive_change_count >= self.threshold {
            self.state.is_closed = !self.state.is_closed;
            self.state.consecutive_change_count = 0;
        }

        action.set_gripper(if self.state.is_closed { 0.0 } else { 1.0 });
    }

    /// Return to the open state with a cleared streak.
    pub fn reset(&mut self) {
        self.state = GripperState::default();
    }
}
