//! # Task abstraction.
//!
//! A [`Task`] is the experiment-specific behavior plugged into the task runner: a set
//! of hooks called at fixed points of every cycle. Hooks are **blocking** (they drive
//! hardware) and run on the runner's dedicated thread; they receive a [`TaskContext`]
//! to sequence actions, request snapshots and observe shutdown.
//!
//! ```text
//!   ┌──────────► STARTUP ── startup() ──► ACTIVE
//!   │                                       │ wait for start signal
//!   │                                       │ perform_task()
//!   │                                       ▼
//!   └─ reset_task() / recover_after_fail() ◄ RESETTING ──(finish requested)──► FINISHED
//! ```

use std::fmt;

use crate::error::TaskError;
use crate::tasks::TaskContext;

/// Phase of the task cycle. Owned by the task runner; read by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Startup,
    Active,
    Resetting,
    /// Terminal: nothing leaves it.
    Finished,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Startup => "startup",
            TaskState::Active => "active",
            TaskState::Resetting => "resetting",
            TaskState::Finished => "finished",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished)
    }

    /// Cycle order is STARTUP → ACTIVE → RESETTING → STARTUP; any live state may
    /// finish when the task requests termination.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Startup, Active) | (Active, Resetting) | (Resetting, Startup)
        ) || (!self.is_terminal() && next == Finished)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Experiment-specific task behavior.
///
/// Only [`perform_task`](Task::perform_task) is required. Returning
/// [`TaskError::Fail`] from it marks the cycle failed and routes the runner through
/// [`recover_after_fail`](Task::recover_after_fail); any error from the other hooks
/// is fatal.
///
/// # Example
/// ```
/// use capturevisor::{Task, TaskContext, TaskError};
///
/// struct PickAndPlace { cycles: u32 }
///
/// impl Task for PickAndPlace {
///     fn name(&self) -> &str { "pick-and-place" }
///
///     fn perform_task(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
///         self.cycles += 1;
///         if self.cycles > 10 {
///             ctx.finish();
///             return Ok(());
///         }
///         ctx.queue_actions(["open", "descend", "close", "lift"], |_step| Ok(()), true)
///     }
/// }
/// ```
pub trait Task: Send + 'static {
    /// Stable, human-readable name used in events and logs.
    fn name(&self) -> &str;

    /// Runs once at every STARTUP, before the task becomes ACTIVE.
    fn startup(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// The task operation of one cycle.
    ///
    /// Call [`TaskContext::finish`] to end the experiment after this cycle.
    fn perform_task(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;

    /// Brings the scene back after a successful cycle.
    fn reset_task(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Brings the scene back after a failed cycle.
    fn recover_after_fail(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }
}
