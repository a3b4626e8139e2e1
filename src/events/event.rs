//! # Runtime events emitted by the coordinator, task runner and recorder.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Cycle events**: task state transitions and their entry actions
//! - **Recorder events**: lifecycle and persistence of the capture loop
//! - **Runtime events**: loop supervision and shutdown
//! - **Subscriber events**: delivery problems of the fan-out itself
//!
//! The [`Event`] struct carries optional metadata (loop name, states, session id,
//! paths, reasons) depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use capturevisor::{Event, EventKind, TaskState};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_transition(TaskState::Active, TaskState::Resetting)
//!     .with_session(3);
//!
//! assert_eq!(ev.state, Some(TaskState::Resetting));
//! assert_eq!(ev.prev_state, Some(TaskState::Active));
//! assert_eq!(ev.session, Some(3));
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::tasks::TaskState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Cycle events ===
    /// The relay observed a task state change.
    ///
    /// Sets: `prev_state`, `state`, `session` (if one is active).
    StateChanged,

    /// A new session directory set was allocated.
    ///
    /// Sets: `session`, `path` (session directory).
    SessionCreated,

    /// `status.txt` was written for a session.
    ///
    /// Sets: `session`, `reason` (`success` or `fail`), `path`.
    StatusWritten,

    /// The task operation failed; the runner takes the recovery path.
    ///
    /// Sets: `source` (task name), `reason`.
    TaskFailed,

    // === Recorder events ===
    /// The capture loop was created and started.
    RecorderStarted,

    /// Persistence was pointed at a new directory.
    ///
    /// Sets: `path`.
    RecordingTargeted,

    /// Capture paused (inter-experiment gap).
    RecorderPaused,

    /// Capture resumed.
    RecorderResumed,

    /// Capture loop exited and released its writers.
    ///
    /// Sets: `count` (frames persisted in total).
    RecorderStopped,

    /// A clip reached its configured length and was rotated.
    ///
    /// Sets: `index` (index of the next clip), `path` (target directory).
    ClipRotated,

    /// A snapshot request was fulfilled and acknowledged.
    ///
    /// Sets: `count` (number of served requests so far).
    SnapshotServed,

    /// A sensor read failed transiently.
    ///
    /// Sets: `attempt` (1-based within the tick), `reason`.
    SensorUnavailable,

    /// Persisting a tick failed; the tick was skipped.
    ///
    /// Sets: `reason`, `path` (target directory, if any).
    PersistenceFailed,

    // === Runtime events ===
    /// A supervised loop started.
    ///
    /// Sets: `source` (loop name).
    LoopStarted,

    /// A supervised loop returned normally.
    ///
    /// Sets: `source`.
    LoopStopped,

    /// A supervised loop failed or panicked.
    ///
    /// Sets: `source`, `reason`.
    LoopFailed,

    /// Shutdown requested (OS signal, explicit stop, or escalated failure).
    ///
    /// Sets: `reason`.
    ShutdownRequested,

    /// All loops stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some loops did not stop in time.
    ///
    /// Sets: `reason` (stuck loop names).
    GraceExceeded,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `source` (subscriber name), `reason`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `source` (subscriber name), `reason`.
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Emitting loop, task or subscriber.
    pub source: Option<Arc<str>>,
    /// Human-readable reason (errors, status, overflow details).
    pub reason: Option<Arc<str>>,
    /// Retry attempt, 1-based (for `SensorUnavailable`).
    pub attempt: Option<u64>,
    /// Running total (frames persisted, requests served).
    pub count: Option<u64>,
    /// State entered (for `StateChanged`).
    pub state: Option<TaskState>,
    /// State left (for `StateChanged`).
    pub prev_state: Option<TaskState>,
    /// Session id, if the event belongs to one.
    pub session: Option<u64>,
    /// Directory or file concerned by the event.
    pub path: Option<Arc<Path>>,
    /// Clip index (for `ClipRotated`).
    pub index: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            source: None,
            reason: None,
            attempt: None,
            count: None,
            state: None,
            prev_state: None,
            session: None,
            path: None,
            index: None,
        }
    }

    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u64) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }

    #[inline]
    pub fn with_transition(mut self, from: TaskState, to: TaskState) -> Self {
        self.prev_state = Some(from);
        self.state = Some(to);
        self
    }

    #[inline]
    pub fn with_session(mut self, id: u64) -> Self {
        self.session = Some(id);
        self
    }

    #[inline]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(Arc::from(path));
        self
    }

    #[inline]
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_source(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_source(subscriber)
            .with_reason(info)
    }
}
