//! [`ObservationHistory`] – rolling multi-step observation context.
//!
//! Policies trained with an observation horizon expect the last *N*
//! observations stacked along a leading time axis.  The history keeps a
//! fixed-capacity window of them.
//!
//! # Fill policy
//!
//! The first [`ObservationHistory::push`] fills the whole window with copies
//! of that observation, so the policy never sees undefined earlier frames.
//! Each episode starts from a new, empty history.
//! Every later push appends and evicts the oldest entry.
//!
//! Policies without a horizon bypass the window: `push` returns the
//! observation as a single-element stack.
//!
//! # Example
//!
//! ```rust
//! use std::num::NonZeroUsize;
//! use ndarray::{Array1, Array3};
//! use armloop_runtime::history::ObservationHistory;
//! use armloop_types::Observation;
//!
//! let mut history = ObservationHistory::new(NonZeroUsize::new(3));
//! let obs = Observation::new(Array3::zeros((2, 2, 3)), Array1::zeros(7));
//!
//! let stacked = history.push(obs).unwrap();
//! assert_eq!(stacked.horizon(), 3); // pre-filled
//! assert_eq!(history.len(), 3);
//! ```

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use armloop_types::{ArmError, Observation, StackedObservation};

/// Fixed-capacity window over the most recent observations, oldest first.
pub struct ObservationHistory {
    /// `None` disables buffering entirely.
    horizon: Option<NonZeroUsize>,
    window: VecDeque<Observation>,
}

impl ObservationHistory {
    pub fn new(horizon: Option<NonZeroUsize>) -> Self {
        let capacity = horizon.map_or(0, NonZeroUsize::get);
        Self {
            horizon,
            window: VecDeque::with_capacity(capacity),
        }
    }

    pub fn horizon(&self) -> Option<NonZeroUsize> {
        self.horizon
    }

    /// Record `observation` and return the stacked context for the policy.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] when the observation's shape does
    /// not match the frames already in the window.
    pub fn push(&mut self, observation: Observation) -> Result<StackedObservation, ArmError> {
        let Some(horizon) = self.horizon else {
            return StackedObservation::from_frames([&observation]);
        };
        let horizon = horizon.get();

        if self.window.is_empty() {
            self.window
                .extend(std::iter::repeat_n(observation, horizon));
        } else {
            self.window.push_back(observation);
            while self.window.len() > horizon {
                self.window.pop_front();
            }
        }
        StackedObservation::from_frames(&self.window)
    }

    /// Number of buffered observations (always 0 when buffering is off).
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
