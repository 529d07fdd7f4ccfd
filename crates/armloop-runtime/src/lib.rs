//! `armloop-runtime` – closed-loop policy execution for robot arms.
//!
//! Everything between the camera frame and the actuator command lives here.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: the
//!   episode driver.  Asks an [`Operator`][control_loop::Operator] what to
//!   run, resets the arm, paces policy queries and saves recordings.
//! - [`executor`] – [`ActionSequenceExecutor`][executor::ActionSequenceExecutor]:
//!   runs the leading actions of a batch through noise, the gripper filter
//!   and the [`DofMask`][executor::DofMask].
//! - [`history`] – [`ObservationHistory`][history::ObservationHistory]:
//!   rolling window of recent observations for policies with an observation
//!   horizon.
//! - [`gripper`] – [`StickyGripper`][gripper::StickyGripper]: debounce
//!   filter for the gripper channel.
//! - [`normalize`] – [`denormalize`][normalize::denormalize]: maps policy
//!   output back to physical units.
//! - [`policy`] – the [`Policy`][policy::Policy] capability and the
//!   [`PolicyHandle`][policy::PolicyHandle] wrapping a loaded policy.
//! - [`replay`] – [`ReplayPolicy`][replay::ReplayPolicy]: replays recorded
//!   action chunks from JSON.
//! - [`episode`] – per-episode state and reports.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging and optional OTLP span export.

pub mod control_loop;
pub mod episode;
pub mod executor;
pub mod gripper;
pub mod history;
pub mod normalize;
pub mod policy;
pub mod replay;
pub mod telemetry;

pub use control_loop::{ControlLoop, ControlLoopConfig, LoopPhase, Operator, video_file_name};
pub use episode::{EpisodeOutcome, EpisodeReport, EpisodeState};
pub use executor::{ActionNoise, ActionSequenceExecutor, DofMask, Execution, ExecutorConfig};
pub use gripper::{GripperState, StickyGripper};
pub use history::ObservationHistory;
pub use normalize::denormalize;
pub use policy::{Policy, PolicyHandle};
pub use replay::{ReplayError, ReplayPolicy};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
