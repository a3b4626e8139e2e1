//! # LogWriter: events as `tracing` records
//!
//! Forwards every [`Event`] to `tracing` with structured fields under the
//! `capturevisor::events` target. Routine lifecycle events log at `info`,
//! skipped work at `warn`, failures at `error`, chatter at `debug`.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let source = e.source.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let path = e.path.as_deref().map(|p| p.display().to_string());

        match e.kind {
            EventKind::StateChanged => {
                info!(target: "capturevisor::events", seq = e.seq, from = ?e.prev_state, to = ?e.state, session = ?e.session, "state changed");
            }
            EventKind::SessionCreated => {
                info!(target: "capturevisor::events", session = ?e.session, path = ?path, "session created");
            }
            EventKind::StatusWritten => {
                info!(target: "capturevisor::events", session = ?e.session, status = reason, "task result");
            }
            EventKind::TaskFailed => {
                warn!(target: "capturevisor::events", task = source, err = reason, "task operation failed, recovering");
            }
            EventKind::RecorderStarted => {
                info!(target: "capturevisor::events", "recorder started");
            }
            EventKind::RecordingTargeted => {
                info!(target: "capturevisor::events", path = ?path, "recording into");
            }
            EventKind::RecorderPaused => {
                debug!(target: "capturevisor::events", "recorder paused");
            }
            EventKind::RecorderResumed => {
                debug!(target: "capturevisor::events", "recorder resumed");
            }
            EventKind::RecorderStopped => {
                info!(target: "capturevisor::events", frames = ?e.count, "recorder stopped");
            }
            EventKind::ClipRotated => {
                debug!(target: "capturevisor::events", next = ?e.index, path = ?path, "clip rotated");
            }
            EventKind::SnapshotServed => {
                debug!(target: "capturevisor::events", served = ?e.count, "snapshot served");
            }
            EventKind::SensorUnavailable => {
                warn!(target: "capturevisor::events", attempt = ?e.attempt, err = reason, "sensor unavailable");
            }
            EventKind::PersistenceFailed => {
                warn!(target: "capturevisor::events", path = ?path, err = reason, "persistence skipped");
            }
            EventKind::LoopStarted => {
                debug!(target: "capturevisor::events", name = source, "loop started");
            }
            EventKind::LoopStopped => {
                debug!(target: "capturevisor::events", name = source, "loop stopped");
            }
            EventKind::LoopFailed => {
                error!(target: "capturevisor::events", name = source, err = reason, "loop failed");
            }
            EventKind::ShutdownRequested => {
                info!(target: "capturevisor::events", reason, "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!(target: "capturevisor::events", "all loops stopped within grace");
            }
            EventKind::GraceExceeded => {
                error!(target: "capturevisor::events", stuck = reason, "grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "capturevisor::events", subscriber = source, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "capturevisor::events", subscriber = source, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
