//! # Task runner: the cycle state machine.
//!
//! Drives one [`Task`] through STARTUP → ACTIVE → RESETTING → STARTUP … until the task
//! requests termination (FINISHED), shutdown is signaled, or a hook fails fatally.
//!
//! ```text
//! STARTUP    startup()                                   ─► ACTIVE
//! ACTIVE     wait start gate (set by the relay)
//!            perform_task()
//!              Ok            ─────────────────────────────► RESETTING
//!              Err(Fail)     mark failed, TaskFailed      ─► RESETTING (failed)
//!              Err(Fatal)    ─► return Err (trips shutdown)
//!              finish()      ─────────────────────────────► FINISHED
//! RESETTING  settle margin
//!            failed ? recover_after_fail() + clear : reset_task()
//!                                                         ─► STARTUP (or FINISHED)
//! ```
//!
//! ## Rules
//! - Every transition goes through `TaskShared::transition`, which records it for the
//!   monitor loop; nothing else mutates the state.
//! - Only a recoverable failure of `perform_task` takes the recovery path. Any other
//!   hook error ends the runner with an error.
//! - `TaskError::Canceled` and shutdown end the runner cleanly.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{RuntimeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{Task, TaskContext, TaskState};

pub(crate) const LOOP_NAME: &str = "task-runner";

#[derive(Debug, Clone, Copy)]
enum Hook {
    Startup,
    Reset,
    Recover,
}

impl Hook {
    fn as_str(&self) -> &'static str {
        match self {
            Hook::Startup => "startup",
            Hook::Reset => "reset_task",
            Hook::Recover => "recover_after_fail",
        }
    }
}

/// Runs a task's cycle on the calling (blocking) thread.
pub(crate) struct TaskRunner {
    task: Box<dyn Task>,
    ctx: TaskContext,
    bus: Bus,
    margin: Duration,
    quantum: Duration,
}

impl TaskRunner {
    pub(crate) fn new(
        task: Box<dyn Task>,
        ctx: TaskContext,
        bus: Bus,
        margin: Duration,
        quantum: Duration,
    ) -> Self {
        Self {
            task,
            ctx,
            bus,
            margin,
            quantum,
        }
    }

    /// Runs until FINISHED or shutdown.
    pub(crate) fn run(mut self) -> Result<(), RuntimeError> {
        let shutdown = self.ctx.shutdown().clone();
        let shared = Arc::clone(self.ctx.shared());

        while !shutdown.is_signaled() {
            match self.ctx.state() {
                TaskState::Startup => {
                    if !self.call(Hook::Startup)? {
                        break;
                    }
                    self.enter(TaskState::Active);
                }
                TaskState::Active => {
                    if !shared.start.wait(&shutdown, self.quantum) {
                        break;
                    }
                    if !self.perform()? {
                        break;
                    }
                    self.enter(TaskState::Resetting);
                }
                TaskState::Resetting => {
                    if shutdown.wait(self.margin) {
                        break;
                    }
                    let recovered = self.ctx.is_failed();
                    let hook = if recovered { Hook::Recover } else { Hook::Reset };
                    if !self.call(hook)? {
                        break;
                    }
                    if recovered {
                        shared.set_failed(false);
                    }
                    self.enter(TaskState::Startup);
                }
                TaskState::Finished => break,
            }
        }
        debug!(task = self.task.name(), state = %self.ctx.state(), "task runner exiting");
        Ok(())
    }

    /// Moves to `to` unless the task already finished.
    fn enter(&self, to: TaskState) {
        if self.ctx.state().is_terminal() {
            return;
        }
        let from = self.ctx.state();
        if self.ctx.shared().transition(to) {
            debug!(task = self.task.name(), %from, %to, "transition");
        }
    }

    /// Calls the task operation. Returns `Ok(false)` when the runner should stop.
    fn perform(&mut self) -> Result<bool, RuntimeError> {
        match self.task.perform_task(&self.ctx) {
            Ok(()) => {}
            Err(TaskError::Canceled) => return Ok(false),
            Err(e) if e.is_recoverable() => {
                warn!(task = self.task.name(), err = %e, "task operation failed");
                self.bus.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_source(self.task.name())
                        .with_reason(e.to_string()),
                );
                self.ctx.mark_failed();
            }
            Err(e) => {
                error!(task = self.task.name(), err = %e, "task operation failed fatally");
                return Err(RuntimeError::task(LOOP_NAME, e));
            }
        }
        Ok(!self.ctx.state().is_terminal())
    }

    /// Calls a lifecycle hook. Returns `Ok(false)` when the runner should stop.
    fn call(&mut self, hook: Hook) -> Result<bool, RuntimeError> {
        let res = match hook {
            Hook::Startup => self.task.startup(&self.ctx),
            Hook::Reset => self.task.reset_task(&self.ctx),
            Hook::Recover => self.task.recover_after_fail(&self.ctx),
        };
        match res {
            Ok(()) => Ok(!self.ctx.state().is_terminal()),
            Err(TaskError::Canceled) => Ok(false),
            Err(e) => {
                error!(task = self.task.name(), hook = hook.as_str(), err = %e, "task hook failed");
                Err(RuntimeError::LoopFailed {
                    name: LOOP_NAME,
                    error: format!("{} hook: {e}", hook.as_str()),
                })
            }
        }
    }
}
