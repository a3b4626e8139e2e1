//! Error types used by the capturevisor runtime, its collaborators and tasks.
//!
//! - [`ConfigError`]: configuration could not be loaded or is invalid; raised before any thread starts.
//! - [`SensorError`]: the sensor source could not produce a reading.
//! - [`PersistenceError`]: a frame, image or state record could not be written.
//! - [`TaskError`]: raised by task hooks and by `perform_task`.
//! - [`RuntimeError`]: failures of the orchestration itself, reported by [`Coordinator::join`](crate::Coordinator::join).
//!
//! Every enum provides `as_label` for logs/metrics.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced while loading or validating [`Config`](crate::Config).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or misses a required key.
    #[error("malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A key is present but its value is not acceptable.
    #[error("invalid config value for `{key}`: {reason}")]
    Invalid {
        /// Dotted path of the offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The coordinator was built without a required collaborator.
    #[error("coordinator needs a {what}")]
    Missing { what: &'static str },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "config_io",
            ConfigError::Parse(_) => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::Missing { .. } => "config_missing",
        }
    }

    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// # Errors produced by a [`SensorSource`](crate::SensorSource).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SensorError {
    /// No valid reading right now; the recorder retries a bounded number of times.
    #[error("sensor unavailable: {reason}")]
    Unavailable { reason: String },

    /// The source is gone for good; the recorder escalates to shutdown.
    #[error("sensor disconnected: {reason}")]
    Disconnected { reason: String },
}

impl SensorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorError::Unavailable { .. } => "sensor_unavailable",
            SensorError::Disconnected { .. } => "sensor_disconnected",
        }
    }

    /// Indicates whether the recorder may retry the read.
    pub fn is_transient(&self) -> bool {
        matches!(self, SensorError::Unavailable { .. })
    }
}

/// # Errors produced while persisting frames, images or state records.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Filesystem failure on `path`.
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A state record could not be (de)serialized.
    #[error("state log {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A frame could not be encoded by the active store.
    #[error("cannot encode frame into {path:?}: {reason}")]
    Encode { path: PathBuf, reason: String },
}

impl PersistenceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PersistenceError::Io { .. } => "persistence_io",
            PersistenceError::Json { .. } => "persistence_json",
            PersistenceError::Encode { .. } => "persistence_encode",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// # Errors produced by task hooks.
///
/// Only a `Fail` raised from `perform_task` takes the recovery path;
/// `Fatal` always escalates to a process-wide shutdown.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The task operation failed; the cycle is marked failed and recovered.
    #[error("execution failed: {error}")]
    Fail { error: String },

    /// Non-recoverable error; trips shutdown.
    #[error("fatal error (no recovery): {error}")]
    Fatal { error: String },

    /// The task observed shutdown and returned early.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`TaskError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        TaskError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use capturevisor::TaskError;
    ///
    /// assert_eq!(TaskError::fail("gripper slipped").as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Indicates whether the runner should recover and keep cycling.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

/// # Errors produced by the capturevisor runtime.
///
/// Any of these means the process-wide shutdown has been (or is being) signaled.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A supervised loop returned an error.
    #[error("loop `{name}` failed: {error}")]
    LoopFailed { name: &'static str, error: String },

    /// A supervised loop panicked.
    #[error("loop `{name}` panicked: {info}")]
    LoopPanicked { name: String, info: String },

    /// A new session directory could not be allocated.
    #[error("cannot allocate session under {base:?}: {source}")]
    Session {
        base: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The sensor source failed permanently.
    #[error(transparent)]
    Sensor(#[from] SensorError),

    /// Shutdown grace period was exceeded; some loops did not exit in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        grace: Duration,
        stuck: Vec<String>,
    },

    /// `start` was called twice.
    #[error("coordinator already started")]
    AlreadyStarted,

    /// `join` was called before `start`, or twice.
    #[error("coordinator is not running")]
    NotStarted,

    /// `start` was called outside a tokio runtime.
    #[error("coordinator must be started inside a tokio runtime")]
    NoRuntime,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use capturevisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::LoopFailed { .. } => "runtime_loop_failed",
            RuntimeError::LoopPanicked { .. } => "runtime_loop_panicked",
            RuntimeError::Session { .. } => "runtime_session",
            RuntimeError::Sensor(_) => "runtime_sensor",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::AlreadyStarted => "runtime_already_started",
            RuntimeError::NotStarted => "runtime_not_started",
            RuntimeError::NoRuntime => "runtime_no_runtime",
        }
    }

    pub(crate) fn task(name: &'static str, err: TaskError) -> Self {
        RuntimeError::LoopFailed {
            name,
            error: err.to_string(),
        }
    }
}
