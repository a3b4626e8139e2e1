//! # Task context: the task's window onto the runtime.
//!
//! [`TaskContext`] is handed to every [`Task`](crate::Task) hook. Through it a task:
//! - sequences hardware actions with [`queue_actions`](TaskContext::queue_actions);
//! - asks the recorder for a synchronous snapshot with
//!   [`record_current_state`](TaskContext::record_current_state);
//! - reads the newest relayed frame and robot state;
//! - marks the cycle failed or requests termination;
//! - observes shutdown through shutdown-aware sleeps.
//!
//! The state it exposes lives in `TaskShared`, which the coordinator's monitor loop
//! polls. Every transition is also appended to an ordered history so the monitor never
//! misses a state that lasted less than one of its ticks.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::capture::Preview;
use crate::core::{Gate, Shutdown, SnapshotRequests};
use crate::error::TaskError;
use crate::tasks::TaskState;

/// Task state captured together with the failed flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub failed: bool,
}

#[derive(Debug)]
struct Tracked {
    current: TaskStatus,
    history: VecDeque<TaskStatus>,
}

/// State shared between the task runner and the coordinator.
#[derive(Debug)]
pub(crate) struct TaskShared {
    status: Mutex<Tracked>,
    pub(crate) start: Gate,
    preview: Mutex<Option<Preview>>,
    output_dir: Mutex<Option<PathBuf>>,
}

impl TaskShared {
    pub(crate) fn new() -> Self {
        Self {
            status: Mutex::new(Tracked {
                current: TaskStatus {
                    state: TaskState::Startup,
                    failed: false,
                },
                history: VecDeque::new(),
            }),
            start: Gate::new(),
            preview: Mutex::new(None),
            output_dir: Mutex::new(None),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.status.lock().current
    }

    /// Moves to `to` and records the transition. Out-of-order moves are ignored.
    pub(crate) fn transition(&self, to: TaskState) -> bool {
        let mut st = self.status.lock();
        if !st.current.state.can_transition_to(to) {
            return false;
        }
        st.current.state = to;
        let snapshot = st.current;
        st.history.push_back(snapshot);
        true
    }

    pub(crate) fn set_failed(&self, failed: bool) {
        self.status.lock().current.failed = failed;
    }

    /// Transitions recorded since the last call, oldest first; the current status alone
    /// when nothing changed. Both are read under one lock so a heartbeat can never
    /// overtake a pending transition.
    pub(crate) fn poll(&self) -> Vec<TaskStatus> {
        let mut st = self.status.lock();
        if st.history.is_empty() {
            vec![st.current]
        } else {
            st.history.drain(..).collect()
        }
    }

    /// Takes every transition recorded since the last call, oldest first.
    #[cfg(test)]
    pub(crate) fn drain_transitions(&self) -> Vec<TaskStatus> {
        self.status.lock().history.drain(..).collect()
    }

    pub(crate) fn mirror(&self, preview: Preview) {
        *self.preview.lock() = Some(preview);
    }

    pub(crate) fn set_output_dir(&self, dir: Option<PathBuf>) {
        *self.output_dir.lock() = dir;
    }
}

/// Settings the context needs from the configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContextSettings {
    pub record_only_after_action: bool,
    pub time_between_orders: Duration,
    pub quantum: Duration,
}

/// Handle given to task hooks. Cheap to clone.
#[derive(Clone)]
pub struct TaskContext {
    name: Arc<str>,
    shared: Arc<TaskShared>,
    snapshots: Arc<SnapshotRequests>,
    shutdown: Shutdown,
    settings: ContextSettings,
}

impl TaskContext {
    pub(crate) fn new(
        name: &str,
        shared: Arc<TaskShared>,
        snapshots: Arc<SnapshotRequests>,
        shutdown: Shutdown,
        settings: ContextSettings,
    ) -> Self {
        Self {
            name: Arc::from(name),
            shared,
            snapshots,
            shutdown,
            settings,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<TaskShared> {
        &self.shared
    }

    pub fn task_name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.shared.status().state
    }

    /// Ends the experiment: the runner stops after the current hook returns.
    pub fn finish(&self) {
        self.shared.transition(TaskState::Finished);
    }

    /// Marks the current cycle failed without raising an error.
    pub fn mark_failed(&self) {
        self.shared.set_failed(true);
    }

    pub fn is_failed(&self) -> bool {
        self.shared.status().failed
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_signaled()
    }

    /// Sleeps for `d`, returning [`TaskError::Canceled`] if shutdown interrupts it.
    pub fn sleep(&self, d: Duration) -> Result<(), TaskError> {
        if self.shutdown.wait(d) {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Newest frames and state relayed from the recorder, if any arrived yet.
    pub fn latest_preview(&self) -> Option<Preview> {
        self.shared.preview.lock().clone()
    }

    pub fn robot_state(&self) -> Option<Value> {
        self.shared.preview.lock().as_ref().map(|p| p.state.clone())
    }

    /// Directory currently receiving recordings (task or restore directory).
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.shared.output_dir.lock().clone()
    }

    /// Requests one persisted frame and blocks until the recorder has written it.
    ///
    /// At most one request is in flight per runtime; concurrent callers queue.
    pub fn record_current_state(&self) -> Result<(), TaskError> {
        if self
            .snapshots
            .request_and_wait(&self.shutdown, self.settings.quantum)
        {
            Ok(())
        } else {
            Err(TaskError::Canceled)
        }
    }

    /// Executes `actions` in order. After each one: waits the configured inter-action
    /// delay, then, if `record` is set, the "record only after action" policy is on and
    /// the task is ACTIVE or RESETTING, records a snapshot.
    ///
    /// Under that policy exactly one persisted frame corresponds to each action.
    pub fn queue_actions<I, F>(&self, actions: I, mut execute: F, record: bool) -> Result<(), TaskError>
    where
        I: IntoIterator,
        F: FnMut(&I::Item) -> Result<(), TaskError>,
    {
        for action in actions {
            if self.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            execute(&action)?;
            self.sleep(self.settings.time_between_orders)?;
            if record && self.should_record_after_action() {
                self.record_current_state()?;
            }
        }
        Ok(())
    }

    fn should_record_after_action(&self) -> bool {
        self.settings.record_only_after_action
            && matches!(self.state(), TaskState::Active | TaskState::Resetting)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::thread;

    pub(crate) fn context(record_only_after_action: bool) -> TaskContext {
        TaskContext::new(
            "test",
            Arc::new(TaskShared::new()),
            Arc::new(SnapshotRequests::new()),
            Shutdown::new(),
            ContextSettings {
                record_only_after_action,
                time_between_orders: Duration::from_millis(1),
                quantum: Duration::from_millis(10),
            },
        )
    }

    #[test]
    fn history_keeps_every_transition_in_order() {
        let ctx = context(false);
        let shared = ctx.shared();
        assert!(shared.transition(TaskState::Active));
        shared.set_failed(true);
        assert!(shared.transition(TaskState::Resetting));
        assert!(!shared.transition(TaskState::Active));
        shared.set_failed(false);
        assert!(shared.transition(TaskState::Startup));

        let seen: Vec<_> = shared.drain_transitions();
        assert_eq!(
            seen,
            vec![
                TaskStatus { state: TaskState::Active, failed: false },
                TaskStatus { state: TaskState::Resetting, failed: true },
                TaskStatus { state: TaskState::Startup, failed: false },
            ]
        );
        assert!(shared.drain_transitions().is_empty());
    }

    #[test]
    fn poll_falls_back_to_current_status() {
        let ctx = context(false);
        let shared = ctx.shared();
        let idle = TaskStatus { state: TaskState::Startup, failed: false };
        assert_eq!(shared.poll(), vec![idle]);

        shared.transition(TaskState::Active);
        shared.transition(TaskState::Resetting);
        let states: Vec<_> = shared.poll().into_iter().map(|s| s.state).collect();
        assert_eq!(states, vec![TaskState::Active, TaskState::Resetting]);
        assert_eq!(shared.poll().len(), 1);
    }

    #[test]
    fn actions_without_policy_never_request_snapshots() {
        let ctx = context(false);
        ctx.shared().transition(TaskState::Active);
        let mut done = Vec::new();
        ctx.queue_actions(
            [1, 2, 3],
            |a| {
                done.push(*a);
                Ok(())
            },
            true,
        )
        .unwrap();
        assert_eq!(done, vec![1, 2, 3]);
        assert_eq!(ctx.snapshots.served(), 0);
    }

    #[test]
    fn actions_under_policy_record_one_snapshot_each() {
        let ctx = context(true);
        ctx.shared().transition(TaskState::Active);

        // Stand-ins for the monitor and capture loops.
        let relay = {
            let snaps = Arc::clone(&ctx.snapshots);
            let shutdown = ctx.shutdown.clone();
            thread::spawn(move || {
                while !shutdown.is_signaled() {
                    snaps.forward_pending(&shutdown, Duration::from_millis(5));
                    shutdown.wait(Duration::from_millis(2));
                }
            })
        };
        let capture = {
            let snaps = Arc::clone(&ctx.snapshots);
            let shutdown = ctx.shutdown.clone();
            thread::spawn(move || {
                let mut persisted = 0;
                while !shutdown.is_signaled() {
                    if snaps.fulfil_one() {
                        persisted += 1;
                    }
                    shutdown.wait(Duration::from_millis(2));
                }
                persisted
            })
        };

        ctx.queue_actions(["open", "close"], |_| Ok(()), true).unwrap();
        assert_eq!(ctx.snapshots.served(), 2);
        ctx.shutdown.signal();
        relay.join().unwrap();
        assert_eq!(capture.join().unwrap(), 2);
    }

    #[test]
    fn action_failure_stops_the_sequence() {
        let ctx = context(false);
        let mut calls = 0;
        let err = ctx
            .queue_actions(
                ["a", "b", "c"],
                |a| {
                    calls += 1;
                    if *a == "b" {
                        Err(TaskError::fail("gripper jammed"))
                    } else {
                        Ok(())
                    }
                },
                false,
            )
            .unwrap_err();
        assert_eq!(calls, 2);
        assert!(err.is_recoverable());
    }

    #[test]
    fn shutdown_cancels_pending_actions() {
        let ctx = context(false);
        ctx.shutdown().signal();
        let err = ctx.queue_actions([1], |_| Ok(()), false).unwrap_err();
        assert!(matches!(err, TaskError::Canceled));
        assert!(matches!(ctx.sleep(Duration::from_secs(10)), Err(TaskError::Canceled)));
    }

    #[test]
    fn finish_is_terminal() {
        let ctx = context(false);
        ctx.finish();
        assert_eq!(ctx.state(), TaskState::Finished);
        assert!(!ctx.shared().transition(TaskState::Startup));
    }
}
