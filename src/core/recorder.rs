//! # Recorder: capture loop, buffers and persistence writers.
//!
//! A [`Recorder`] owns one blocking capture loop ([`Recorder::run`]) that refreshes the
//! latest frames from a [`SensorSource`], persists them according to the capture policy
//! and answers snapshot requests. Every other method is a cheap, non-blocking command
//! that the capture thread picks up on its next tick.
//!
//! ```text
//!              ┌──────────────────────── capture tick ────────────────────────┐
//!              │ apply retarget / stop                                        │
//!   paused? ───┤ refresh buffers ── SensorSource::get_latest_frames (retried) │
//!   (skip)     │ persist?  = !record_only_after_action || snapshot owed       │
//!              │ persist   → FrameStore (clip or images) + StateLog           │
//!              │ owed      → SnapshotRequests::fulfil_one                     │
//!              │ sleep remainder of 1/fps (shutdown-aware)                    │
//!              └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Layout of one persistence target
//! ```text
//! <dir>/states.json
//! <dir>/Video/video_{n}.*            <dir>/Images/image_top_{k}.*
//! <dir>/Bottom_Video/video_{n}.*     <dir>/Bottom_Images/image_bottom_{k}.*
//! ```
//! Clip and image numbering restart at 0 for every target.
//!
//! ## Rules
//! - Writers are opened, rotated and closed **only** on the capture thread.
//! - The buffer lock is never held while the writer lock is taken.
//! - Each tick appends its state record first, then writes frames. If the frames fail the
//!   record is popped again, so `states.json` never lists a tick whose frames are missing.
//! - Any persistence failure marks the target broken; it is skipped until the next
//!   retarget.
//! - A disconnected sensor ends the loop and trips shutdown, as does a panic inside the
//!   sensor or the store.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::capture::{ClipWriter, FrameStore, Preview, SensorReading, SensorSource, StateLog};
use crate::core::{Config, Shutdown, SnapshotRequests};
use crate::error::{PersistenceError, RuntimeError, SensorError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::panic_message;

/// Name the capture loop reports under.
pub(crate) const CAPTURE_LOOP: &str = "capture";

pub const VIDEO_DIR: &str = "Video";
pub const BOTTOM_VIDEO_DIR: &str = "Bottom_Video";
pub const IMAGES_DIR: &str = "Images";
pub const BOTTOM_IMAGES_DIR: &str = "Bottom_Images";

/// Lifecycle of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderStatus {
    /// Created; the capture loop has not started.
    Idle,
    Recording,
    Paused,
    /// Stop requested or the loop exited. Terminal.
    Stopped,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy)]
struct Settings {
    record: bool,
    record_only_after_action: bool,
    images: bool,
    fps: u32,
    interval: Duration,
    clip_length: Option<u32>,
    sensor_retries: u32,
}

impl Settings {
    fn from_config(cfg: &Config) -> Self {
        Self {
            record: cfg.camera.record,
            record_only_after_action: cfg.camera.record_only_after_action,
            images: cfg.camera.save_images_individually,
            fps: cfg.camera.fps,
            interval: cfg.frame_interval(),
            clip_length: cfg.camera.clip_length,
            sensor_retries: cfg.camera.sensor_retries.max(1),
        }
    }
}

struct ClipPair {
    primary: Box<dyn ClipWriter>,
    secondary: Box<dyn ClipWriter>,
}

impl ClipPair {
    fn finish(self) -> Result<(), PersistenceError> {
        let a = self.primary.finish();
        let b = self.secondary.finish();
        a.and(b)
    }
}

/// Writers of one persistence directory.
struct Target {
    dir: PathBuf,
    clips: Option<ClipPair>,
    clip_index: u32,
    clip_frames: u32,
    image_index: u64,
    log: Option<StateLog>,
    broken: bool,
}

impl Target {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            clips: None,
            clip_index: 0,
            clip_frames: 0,
            image_index: 0,
            log: None,
            broken: false,
        }
    }

    fn release(&mut self) -> Result<(), PersistenceError> {
        self.log = None;
        match self.clips.take() {
            Some(pair) => pair.finish(),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct WriterSlot {
    /// Retarget requested by another thread, applied by the capture thread.
    pending: Option<PathBuf>,
    active: Option<Target>,
}

struct Inner {
    buffers: Mutex<Option<Preview>>,
    writers: Mutex<WriterSlot>,
    phase: AtomicU8,
    paused: AtomicBool,
    stop: AtomicBool,
    refreshed: AtomicU64,
    persisted: AtomicU64,
    settings: Settings,
    quantum: Duration,
    store: Arc<dyn FrameStore>,
    snapshots: Arc<SnapshotRequests>,
    shutdown: Shutdown,
    bus: Bus,
}

/// Handle to a recorder. Cheap to clone; all clones control the same capture loop.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new(
        cfg: &Config,
        store: Arc<dyn FrameStore>,
        snapshots: Arc<SnapshotRequests>,
        shutdown: Shutdown,
        bus: Bus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffers: Mutex::new(None),
                writers: Mutex::new(WriterSlot::default()),
                phase: AtomicU8::new(IDLE),
                paused: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                refreshed: AtomicU64::new(0),
                persisted: AtomicU64::new(0),
                settings: Settings::from_config(cfg),
                quantum: cfg.runtime.quantum,
                store,
                snapshots,
                shutdown,
                bus,
            }),
        }
    }

    /// Points persistence at `dir`. The capture thread closes the current writers and
    /// opens new ones on its next tick.
    pub fn start_new_recording(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        debug!(dir = %dir.display(), "retarget requested");
        self.inner.writers.lock().pending = Some(dir);
    }

    /// Suspends capture without closing writers.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::AcqRel) {
            self.inner.bus.publish(Event::new(EventKind::RecorderPaused));
        }
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::AcqRel) {
            self.inner.bus.publish(Event::new(EventKind::RecorderResumed));
        }
    }

    /// Requests the capture loop to exit. Writers are released by the capture thread.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
    }

    pub fn status(&self) -> RecorderStatus {
        match self.inner.phase.load(Ordering::Acquire) {
            STOPPED => RecorderStatus::Stopped,
            _ if self.inner.stop.load(Ordering::Acquire) => RecorderStatus::Stopped,
            IDLE => RecorderStatus::Idle,
            _ if self.inner.paused.load(Ordering::Acquire) => RecorderStatus::Paused,
            _ => RecorderStatus::Recording,
        }
    }

    /// Newest buffered frames and state, if any reading succeeded yet.
    pub fn latest(&self) -> Option<Preview> {
        self.inner.buffers.lock().clone()
    }

    /// Newest frames if they are newer than `seq`.
    pub fn fresh_since(&self, seq: u64) -> Option<Preview> {
        self.inner
            .buffers
            .lock()
            .as_ref()
            .filter(|p| p.seq > seq)
            .cloned()
    }

    /// Ticks persisted since the loop started.
    pub fn persisted_frames(&self) -> u64 {
        self.inner.persisted.load(Ordering::Acquire)
    }

    /// Runs the capture loop on the calling thread until stopped or shutdown.
    ///
    /// Returns an error (after signaling shutdown) when the sensor source is gone or a
    /// sensor or store call panicked. Writers are released on every exit path.
    pub fn run(&self, source: &mut dyn SensorSource) -> Result<(), RuntimeError> {
        let inner = &*self.inner;
        if inner
            .phase
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::AlreadyStarted);
        }
        inner.bus.publish(Event::new(EventKind::RecorderStarted));
        info!(fps = inner.settings.fps, "capture loop started");

        let res = panic::catch_unwind(AssertUnwindSafe(|| self.capture_loop(source)))
            .unwrap_or_else(|p| {
                Err(RuntimeError::LoopPanicked {
                    name: CAPTURE_LOOP.to_owned(),
                    info: panic_message(&*p),
                })
            });
        if let Err(e) = &res {
            error!(err = %e, "capture loop failed; requesting shutdown");
            if inner.shutdown.signal() {
                inner
                    .bus
                    .publish(Event::new(EventKind::ShutdownRequested).with_reason(e.to_string()));
            }
        }

        self.release_writers();
        inner.phase.store(STOPPED, Ordering::Release);
        let persisted = self.persisted_frames();
        info!(persisted, "capture loop stopped");
        inner
            .bus
            .publish(Event::new(EventKind::RecorderStopped).with_count(persisted));
        res
    }

    fn capture_loop(&self, source: &mut dyn SensorSource) -> Result<(), RuntimeError> {
        let inner = &*self.inner;
        let interval = inner.settings.interval;

        while !inner.shutdown.is_signaled() && !inner.stop.load(Ordering::Acquire) {
            let started = Instant::now();
            self.apply_retarget();

            if inner.paused.load(Ordering::Acquire) {
                inner.shutdown.wait(interval.min(inner.quantum));
                continue;
            }

            let Some(reading) = self.refresh(source)? else {
                inner.shutdown.wait(interval);
                continue;
            };

            let owed = inner.snapshots.has_pending();
            if !inner.settings.record_only_after_action || owed {
                if inner.settings.record {
                    self.persist(&reading);
                }
                if owed && inner.snapshots.fulfil_one() {
                    let served = inner.snapshots.served() + 1;
                    inner
                        .bus
                        .publish(Event::new(EventKind::SnapshotServed).with_count(served));
                }
            }

            inner.shutdown.wait(interval.saturating_sub(started.elapsed()));
        }
        Ok(())
    }

    /// Refreshes the buffers. `Ok(None)` means this tick produced no valid reading.
    fn refresh(&self, source: &mut dyn SensorSource) -> Result<Option<Preview>, RuntimeError> {
        let inner = &*self.inner;
        let retries = inner.settings.sensor_retries;

        for attempt in 1..=retries {
            let failure = match source.get_latest_frames() {
                Ok(reading) if reading.is_valid() => return Ok(Some(self.buffer(reading))),
                Ok(_) => SensorError::Unavailable {
                    reason: "frames do not match their geometry".into(),
                },
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e.into()),
            };

            warn!(attempt, retries, err = %failure, "sensor read failed");
            inner.bus.publish(
                Event::new(EventKind::SensorUnavailable)
                    .with_attempt(u64::from(attempt))
                    .with_reason(failure.to_string()),
            );
            if attempt < retries && inner.shutdown.wait(inner.settings.interval) {
                return Ok(None);
            }
        }
        Ok(None)
    }

    fn buffer(&self, reading: SensorReading) -> Preview {
        let seq = self.inner.refreshed.fetch_add(1, Ordering::AcqRel) + 1;
        let preview = Preview {
            seq,
            primary: reading.primary,
            secondary: reading.secondary,
            state: reading.state,
            timestamp: reading.timestamp,
        };
        *self.inner.buffers.lock() = Some(preview.clone());
        preview
    }

    fn apply_retarget(&self) {
        let inner = &*self.inner;
        let mut slot = inner.writers.lock();
        let Some(dir) = slot.pending.take() else {
            return;
        };
        if let Some(mut old) = slot.active.take() {
            if let Err(e) = old.release() {
                Self::report(&inner.bus, &old.dir, &e);
            }
        }
        info!(dir = %dir.display(), "recording into");
        inner
            .bus
            .publish(Event::new(EventKind::RecordingTargeted).with_path(&dir));
        slot.active = Some(Target::new(dir));
    }

    fn persist(&self, reading: &Preview) {
        let inner = &*self.inner;
        let mut slot = inner.writers.lock();
        let Some(target) = slot.active.as_mut() else {
            return;
        };
        if target.broken {
            return;
        }

        let res = Self::append_state(target, reading).and_then(|()| {
            let frames = if inner.settings.images {
                self.save_images(target, reading)
            } else {
                self.write_clips(target, reading)
            };
            if frames.is_err() {
                if let Some(Err(e)) = target.log.as_mut().map(StateLog::pop_last) {
                    Self::report(&inner.bus, &target.dir, &e);
                }
            }
            frames
        });

        match res {
            Ok(()) => {
                inner.persisted.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                target.broken = true;
                Self::report(&inner.bus, &target.dir, &e);
            }
        }
    }

    fn save_images(&self, target: &mut Target, reading: &Preview) -> Result<(), PersistenceError> {
        let k = target.image_index;
        let top = ensure_dir(target.dir.join(IMAGES_DIR))?;
        let bottom = ensure_dir(target.dir.join(BOTTOM_IMAGES_DIR))?;
        self.inner
            .store
            .save_image(&top.join(format!("image_top_{k}")), &reading.primary)?;
        self.inner
            .store
            .save_image(&bottom.join(format!("image_bottom_{k}")), &reading.secondary)?;
        target.image_index += 1;
        Ok(())
    }

    fn write_clips(&self, target: &mut Target, reading: &Preview) -> Result<(), PersistenceError> {
        let inner = &*self.inner;
        if target.clips.is_none() {
            target.clips = Some(self.open_clips(target, reading)?);
        }
        let Some(pair) = target.clips.as_mut() else {
            return Ok(());
        };
        pair.primary.write(&reading.primary)?;
        pair.secondary.write(&reading.secondary)?;
        target.clip_frames += 1;

        if inner
            .settings
            .clip_length
            .is_some_and(|len| target.clip_frames >= len)
        {
            let closed = target.clips.take().map(ClipPair::finish).unwrap_or(Ok(()));
            target.clip_index += 1;
            target.clip_frames = 0;
            debug!(next = target.clip_index, dir = %target.dir.display(), "clip rotated");
            inner.bus.publish(
                Event::new(EventKind::ClipRotated)
                    .with_index(target.clip_index)
                    .with_path(&target.dir),
            );
            // This tick's frames are already in the closed clip.
            if let Err(e) = closed {
                target.broken = true;
                Self::report(&inner.bus, &target.dir, &e);
            }
        }
        Ok(())
    }

    fn open_clips(&self, target: &Target, reading: &Preview) -> Result<ClipPair, PersistenceError> {
        let n = target.clip_index;
        let fps = self.inner.settings.fps;
        let top = ensure_dir(target.dir.join(VIDEO_DIR))?;
        let bottom = ensure_dir(target.dir.join(BOTTOM_VIDEO_DIR))?;
        let primary = self
            .inner
            .store
            .open_clip(&top.join(format!("video_{n}")), fps, &reading.primary)?;
        let secondary = self
            .inner
            .store
            .open_clip(&bottom.join(format!("video_{n}")), fps, &reading.secondary)?;
        Ok(ClipPair { primary, secondary })
    }

    fn append_state(target: &mut Target, reading: &Preview) -> Result<(), PersistenceError> {
        if target.log.is_none() {
            target.log = Some(StateLog::open(&target.dir)?);
        }
        match target.log.as_mut() {
            Some(log) => log.append(&reading.state, reading.timestamp),
            None => Ok(()),
        }
    }

    fn release_writers(&self) {
        let inner = &*self.inner;
        let mut slot = inner.writers.lock();
        slot.pending = None;
        if let Some(mut target) = slot.active.take() {
            if let Err(e) = target.release() {
                Self::report(&inner.bus, &target.dir, &e);
            }
        }
    }

    fn report(bus: &Bus, dir: &Path, err: &PersistenceError) {
        warn!(dir = %dir.display(), err = %err, "persistence failed; target skipped until retarget");
        bus.publish(
            Event::new(EventKind::PersistenceFailed)
                .with_path(dir)
                .with_reason(err.to_string()),
        );
    }
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf, PersistenceError> {
    fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
    Ok(dir)
}
