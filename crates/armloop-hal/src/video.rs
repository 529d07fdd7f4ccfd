//! Generic `VideoSink` trait for diagnostic episode recordings.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use armloop_types::{ArmError, Image};
use tracing::info;

/// A destination for the frames captured during one episode.
///
/// Encoders (mp4 writers, remote uploaders, …) implement this trait; the
/// control loop decides *when* and *where* to save, the sink decides *how*.
pub trait VideoSink {
    /// Store `frames` (each `H × W × 3`) at `path`, played back at `fps`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Sink`] if the recording cannot be written.
    fn save(&mut self, frames: &[Image], path: &Path, fps: f64) -> Result<(), ArmError>;
}

/// Writes every frame as a binary PPM file into a directory derived from the
/// requested path (`…/run.mp4` → `…/run/frame_00000.ppm`).
///
/// No encoder is required, which makes it suitable for dry runs and CI.
#[derive(Debug, Default)]
pub struct FrameDirSink;

impl FrameDirSink {
    pub fn new() -> Self {
        Self
    }

    /// The directory the frames for `path` end up in.
    pub fn frame_dir(path: &Path) -> PathBuf {
        path.with_extension("")
    }

    fn write_ppm(frame: &Image, path: &Path) -> Result<(), ArmError> {
        let (height, width, _) = frame.dim();
        let mut file = fs::File::create(path)
            .map_err(|e| ArmError::Sink(format!("failed to create {}: {e}", path.display())))?;
        let mut bytes = format!("P6\n{width} {height}\n255\n").into_bytes();
        bytes.extend(frame.iter().copied());
        file.write_all(&bytes)
            .map_err(|e| ArmError::Sink(format!("failed to write {}: {e}", path.display())))
    }
}

impl VideoSink for FrameDirSink {
    fn save(&mut self, frames: &[Image], path: &Path, fps: f64) -> Result<(), ArmError> {
        let dir = Self::frame_dir(path);
        fs::create_dir_all(&dir)
            .map_err(|e| ArmError::Sink(format!("failed to create {}: {e}", dir.display())))?;
        for (i, frame) in frames.iter().enumerate() {
            Self::write_ppm(frame, &dir.join(format!("frame_{i:05}.ppm")))?;
        }
        info!(dir = %dir.display(), frames = frames.len(), fps, "episode frames written");
        Ok(())
    }
}
