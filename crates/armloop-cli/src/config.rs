//! Configuration vault – reads/writes `~/.armloop/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use armloop_runtime::{ControlLoopConfig, DofMask, PolicyHandle, ReplayPolicy};
use armloop_types::{ACTION_DIM, ArmError, PolicyStatistics, Pose, WorkspaceBounds};

/// One policy available to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub run_name: String,
    pub checkpoint_num: u64,
    /// JSON recording of normalized action chunks, replayed by the policy.
    pub actions_path: PathBuf,
    /// Stack this many past observations; absent or `0` disables stacking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_horizon: Option<usize>,
    #[serde(default = "default_action_mean")]
    pub action_mean: Vec<f32>,
    #[serde(default = "default_action_std")]
    pub action_std: Vec<f32>,
}

impl PolicyEntry {
    /// Display name, `"{run_name}-{checkpoint_num}"`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.run_name, self.checkpoint_num)
    }

    /// Load the recording and wrap it in a [`PolicyHandle`].
    pub fn load(&self, seed: u64, deterministic: bool) -> Result<PolicyHandle, ArmError> {
        let replay = ReplayPolicy::from_file(&self.actions_path)?;
        let statistics = PolicyStatistics {
            action_mean: self.action_mean.clone(),
            action_std: self.action_std.clone(),
        };
        let horizon = self.obs_horizon.and_then(NonZeroUsize::new);
        Ok(
            PolicyHandle::new(self.name(), Box::new(replay), statistics, horizon)?
                .with_seed(seed)
                .with_deterministic(deterministic),
        )
    }
}

/// Persisted operator configuration stored in `~/.armloop/config.toml`.
///
/// Tables (`workspace_bounds`, `policies`) stay at the end so the file
/// serializes with plain values first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Side length of the square camera frames.  Required.
    pub im_size: usize,

    #[serde(default = "default_step_duration_secs")]
    pub step_duration_secs: f64,

    #[serde(default = "default_num_timesteps")]
    pub num_timesteps: usize,

    #[serde(default = "default_act_exec_horizon")]
    pub act_exec_horizon: usize,

    #[serde(default)]
    pub blocking: bool,

    /// Take the policy's most likely action instead of sampling.
    #[serde(default = "default_deterministic")]
    pub deterministic: bool,

    #[serde(default = "default_sticky_gripper_num_steps")]
    pub sticky_gripper_num_steps: usize,

    #[serde(default)]
    pub no_pitch_roll: bool,

    #[serde(default)]
    pub no_yaw: bool,

    #[serde(default)]
    pub action_noise_std: [f32; ACTION_DIM],

    /// End-effector position `[x, y, z]` to move to after every reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_eep: Option<[f32; 3]>,

    #[serde(default = "default_initial_pose_duration_secs")]
    pub initial_pose_duration_secs: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_save_path: Option<PathBuf>,

    #[serde(default)]
    pub seed: u64,

    #[serde(default)]
    pub persist_gripper_across_episodes: bool,

    #[serde(default)]
    pub workspace_bounds: WorkspaceBounds,

    #[serde(default)]
    pub policies: Vec<PolicyEntry>,
}

fn default_step_duration_secs() -> f64 {
    0.2
}
fn default_num_timesteps() -> usize {
    120
}
fn default_act_exec_horizon() -> usize {
    1
}
fn default_deterministic() -> bool {
    true
}
fn default_sticky_gripper_num_steps() -> usize {
    1
}
fn default_initial_pose_duration_secs() -> f64 {
    1.5
}
fn default_action_mean() -> Vec<f32> {
    PolicyStatistics::identity().action_mean
}
fn default_action_std() -> Vec<f32> {
    PolicyStatistics::identity().action_std
}

impl Default for Config {
    fn default() -> Self {
        Self {
            im_size: 256,
            step_duration_secs: default_step_duration_secs(),
            num_timesteps: default_num_timesteps(),
            act_exec_horizon: default_act_exec_horizon(),
            blocking: false,
            deterministic: default_deterministic(),
            sticky_gripper_num_steps: default_sticky_gripper_num_steps(),
            no_pitch_roll: false,
            no_yaw: false,
            action_noise_std: [0.0; ACTION_DIM],
            initial_eep: None,
            initial_pose_duration_secs: default_initial_pose_duration_secs(),
            video_save_path: None,
            seed: 0,
            persist_gripper_across_episodes: false,
            workspace_bounds: WorkspaceBounds::default(),
            policies: Vec::new(),
        }
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, ArmError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| ArmError::Configuration(format!("{field} = {value}: {e}")))
}

impl Config {
    /// Check the values and build the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Configuration`] for the first invalid value.
    pub fn validate(&self) -> Result<ControlLoopConfig, ArmError> {
        if self.policies.is_empty() {
            return Err(ArmError::Configuration(
                "no [[policies]] configured".to_string(),
            ));
        }
        let config = ControlLoopConfig {
            im_size: self.im_size,
            step_duration: seconds("step_duration_secs", self.step_duration_secs)?,
            num_timesteps: self.num_timesteps,
            act_exec_horizon: self.act_exec_horizon,
            blocking: self.blocking,
            sticky_gripper_num_steps: self.sticky_gripper_num_steps,
            dof_mask: DofMask {
                no_pitch_roll: self.no_pitch_roll,
                no_yaw: self.no_yaw,
            },
            action_noise_std: self.action_noise_std,
            initial_pose: self.initial_eep.map(Pose::from_position),
            initial_pose_duration: seconds(
                "initial_pose_duration_secs",
                self.initial_pose_duration_secs,
            )?,
            video_save_path: self.video_save_path.clone(),
            seed: self.seed,
            persist_gripper_across_episodes: self.persist_gripper_across_episodes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load every configured policy.
    pub fn load_policies(&self) -> Result<Vec<PolicyHandle>, ArmError> {
        self.policies
            .iter()
            .map(|entry| entry.load(self.seed, self.deterministic))
            .collect()
    }
}

/// Return the path to `~/.armloop/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armloop").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARMLOOP_*` environment variable overrides to `cfg`.
///
/// Unparsable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMLOOP_NUM_TIMESTEPS` | `num_timesteps` |
/// | `ARMLOOP_VIDEO_SAVE_PATH` | `video_save_path` |
/// | `ARMLOOP_BLOCKING` | `blocking` (`true`/`false`/`1`/`0`) |
/// | `ARMLOOP_STEP_DURATION` | `step_duration_secs` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMLOOP_NUM_TIMESTEPS")
        && let Ok(n) = v.trim().parse::<usize>()
    {
        cfg.num_timesteps = n;
    }
    if let Ok(v) = std::env::var("ARMLOOP_VIDEO_SAVE_PATH")
        && !v.trim().is_empty()
    {
        cfg.video_save_path = Some(PathBuf::from(v.trim()));
    }
    if let Ok(v) = std::env::var("ARMLOOP_BLOCKING") {
        match v.trim() {
            "1" | "true" => cfg.blocking = true,
            "0" | "false" => cfg.blocking = false,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("ARMLOOP_STEP_DURATION")
        && let Ok(secs) = v.trim().parse::<f64>()
    {
        cfg.step_duration_secs = secs;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
