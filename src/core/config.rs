//! # Experiment and runtime configuration.
//!
//! [`Config`] is read once (usually from YAML) and validated before any thread starts:
//! `CoordinatorBuilder::build` calls [`Config::validate`] and refuses to build on error.
//!
//! ```yaml
//! experiment:
//!   name: stack_cubes
//!   timeout_between_experiments: 2s
//!   time_between_orders: 500ms
//! camera:
//!   record: true
//!   record_only_after_action: false
//!   fps: 10
//!   save_images_individually: false
//!   clip_length: 300
//! runtime:
//!   quantum: 100ms
//! ```
//!
//! Durations are humantime strings (`250ms`, `2s`, `1m 30s`). The `runtime` section
//! and the keys documented with a default may be omitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub experiment: ExperimentConfig,
    pub camera: CameraConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// What is being recorded and where.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Experiment name; sessions live under `output_root/name`.
    pub name: String,

    /// Root of all recordings (`recorded_data` when omitted).
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Gap between two sessions, during which the recorder is paused.
    #[serde(with = "humantime_serde")]
    pub timeout_between_experiments: Duration,

    /// Delay after every queued action.
    #[serde(with = "humantime_serde")]
    pub time_between_orders: Duration,
}

/// Capture policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    /// Persist anything at all. When `false` the recorder still refreshes previews.
    pub record: bool,

    /// Persist only ticks answering a snapshot request.
    pub record_only_after_action: bool,

    pub fps: u32,

    /// Individual image files instead of clips.
    pub save_images_individually: bool,

    /// Frames per clip before rotating to the next file; unbounded when absent.
    #[serde(default)]
    pub clip_length: Option<u32>,

    /// Sensor reads attempted per tick before the tick is skipped.
    #[serde(default = "default_sensor_retries")]
    pub sensor_retries: u32,
}

/// Timing of the runtime itself.
///
/// ## Field semantics
/// - `quantum`: upper bound of every blocking wait; shutdown propagates within it
/// - `start_settle`: delay between targeting the recorder and releasing the task on ACTIVE
/// - `task_time_margin`: settle margin at the start of RESETTING
/// - `finish_grace`: time given to writers to flush once FINISHED is reached
/// - `grace`: how long `join` waits for loops after shutdown
/// - `preview_timeout`: how long `get_preview` waits for a frame
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(with = "humantime_serde")]
    pub quantum: Duration,
    #[serde(with = "humantime_serde")]
    pub start_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub task_time_margin: Duration,
    #[serde(with = "humantime_serde")]
    pub finish_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
    #[serde(with = "humantime_serde")]
    pub preview_timeout: Duration,
    pub bus_capacity: usize,
    /// Trip shutdown on SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere) while joined.
    pub handle_os_signals: bool,
}

impl Default for RuntimeConfig {
    /// Default timing:
    ///
    /// - `quantum = 100ms`
    /// - `start_settle = 500ms`
    /// - `task_time_margin = 2s`
    /// - `finish_grace = 1s`
    /// - `grace = 10s`
    /// - `preview_timeout = 100ms`
    /// - `bus_capacity = 1024`
    /// - `handle_os_signals = true`
    fn default() -> Self {
        Self {
            quantum: Duration::from_millis(100),
            start_settle: Duration::from_millis(500),
            task_time_margin: Duration::from_secs(2),
            finish_grace: Duration::from_secs(1),
            grace: Duration::from_secs(10),
            preview_timeout: Duration::from_millis(100),
            bus_capacity: 1024,
            handle_os_signals: true,
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("recorded_data")
}

fn default_sensor_retries() -> u32 {
    3
}

const MIN_QUANTUM: Duration = Duration::from_millis(1);
const MAX_QUANTUM: Duration = Duration::from_secs(1);

impl Config {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Checks every constraint not expressible in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.experiment.name.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid("experiment.name", "must not be empty"));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ConfigError::invalid(
                "experiment.name",
                "must be a single path segment",
            ));
        }
        if self.camera.fps == 0 {
            return Err(ConfigError::invalid("camera.fps", "must be greater than 0"));
        }
        if self.camera.clip_length == Some(0) {
            return Err(ConfigError::invalid(
                "camera.clip_length",
                "must be greater than 0 when present",
            ));
        }
        if !(MIN_QUANTUM..=MAX_QUANTUM).contains(&self.runtime.quantum) {
            return Err(ConfigError::invalid(
                "runtime.quantum",
                format!("must be within {MIN_QUANTUM:?}..={MAX_QUANTUM:?}"),
            ));
        }
        Ok(())
    }

    /// Directory holding every session of this experiment.
    pub fn session_base(&self) -> PathBuf {
        self.experiment.output_root.join(&self.experiment.name)
    }

    /// Time between two capture ticks.
    #[inline]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.camera.fps.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.runtime.bus_capacity.max(1)
    }

    /// A compact configuration for tests and demos: video recording at `fps` under
    /// `output_root`, short delays and a fast runtime.
    pub fn for_testing(name: &str, output_root: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            experiment: ExperimentConfig {
                name: name.to_owned(),
                output_root: output_root.into(),
                timeout_between_experiments: Duration::from_millis(50),
                time_between_orders: Duration::from_millis(10),
            },
            camera: CameraConfig {
                record: true,
                record_only_after_action: false,
                fps,
                save_images_individually: false,
                clip_length: None,
                sensor_retries: 3,
            },
            runtime: RuntimeConfig {
                quantum: Duration::from_millis(10),
                start_settle: Duration::from_millis(20),
                task_time_margin: Duration::from_millis(20),
                finish_grace: Duration::from_millis(20),
                grace: Duration::from_secs(5),
                preview_timeout: Duration::from_millis(50),
                bus_capacity: 1024,
                handle_os_signals: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
experiment:
  name: stack_cubes
  output_root: /data/runs
  timeout_between_experiments: 2s
  time_between_orders: 500ms
camera:
  record: true
  record_only_after_action: true
  fps: 15
  save_images_individually: false
  clip_length: 300
runtime:
  quantum: 50ms
  grace: 3s
"#;

    #[test]
    fn parses_full_document() {
        let cfg = Config::from_yaml_str(FULL).unwrap();
        assert_eq!(cfg.experiment.time_between_orders, Duration::from_millis(500));
        assert_eq!(cfg.camera.clip_length, Some(300));
        assert_eq!(cfg.camera.sensor_retries, 3);
        assert_eq!(cfg.runtime.quantum, Duration::from_millis(50));
        assert_eq!(cfg.runtime.grace, Duration::from_secs(3));
        assert_eq!(cfg.runtime.task_time_margin, Duration::from_secs(2));
        assert_eq!(cfg.session_base(), PathBuf::from("/data/runs/stack_cubes"));
        assert_eq!(cfg.frame_interval(), Duration::from_secs(1) / 15);
    }

    #[test]
    fn runtime_section_and_output_root_are_optional() {
        let text = r#"
experiment: { name: shake, timeout_between_experiments: 1s, time_between_orders: 0s }
camera: { record: false, record_only_after_action: false, fps: 5, save_images_individually: true }
"#;
        let cfg = Config::from_yaml_str(text).unwrap();
        assert_eq!(cfg.experiment.output_root, PathBuf::from("recorded_data"));
        assert_eq!(cfg.runtime.quantum, Duration::from_millis(100));
        assert!(cfg.camera.clip_length.is_none());
    }

    #[test]
    fn missing_required_key_is_a_parse_error() {
        let text = "experiment: { name: x, time_between_orders: 1s }\ncamera: { record: true }\n";
        let err = Config::from_yaml_str(text).unwrap_err();
        assert_eq!(err.as_label(), "config_parse");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = Config::for_testing("ok", "/tmp", 10);
        cfg.camera.fps = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { key: "camera.fps", .. })));

        let mut cfg = Config::for_testing("a/b", "/tmp", 10);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { key: "experiment.name", .. })));

        cfg.experiment.name = "ok".into();
        cfg.camera.clip_length = Some(0);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { key: "camera.clip_length", .. })
        ));

        cfg.camera.clip_length = None;
        cfg.runtime.quantum = Duration::from_secs(5);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { key: "runtime.quantum", .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::from_path("/definitely/not/here.yaml").unwrap_err();
        assert_eq!(err.as_label(), "config_io");
    }
}
