//! `armloop-hal` – Hardware Abstraction Layer
//!
//! The boundary between the control loop and everything that touches
//! hardware or the filesystem.
//!
//! # Modules
//!
//! - [`actuator`] – [`Actuator`][actuator::Actuator]: reset, move-to-pose,
//!   paced stepping and observation readback for a robot arm.
//! - [`video`] – [`VideoSink`][video::VideoSink]: optional diagnostic export
//!   of the frames captured during an episode, plus
//!   [`FrameDirSink`][video::FrameDirSink], which writes raw PPM frames.
//! - [`sim`] – [`SimArm`][sim::SimArm]: an in-process arm for tests and
//!   dry runs without a physical robot, with scripted fault injection.

pub mod actuator;
pub mod sim;
pub mod video;

pub use actuator::Actuator;
pub use sim::{SimArm, SimArmBuilder, SimStep};
pub use video::{FrameDirSink, VideoSink};
