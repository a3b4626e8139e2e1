//! # Coordinator: supervises the loops and glues task cycles to the recorder.
//!
//! The [`Coordinator`] owns the shutdown flag, the event bus, the snapshot monitor and
//! the task-side shared state. [`start`](Coordinator::start) launches three loops; the
//! relay launches the recorder's capture loop lazily on the first ACTIVE.
//!
//! ```text
//!  task-runner (blocking)        monitor (blocking)                relay (async)
//!  ─────────────────────         ──────────────────                ─────────────
//!  TaskRunner::run               every quantum:                    recv TaskStatus (FIFO)
//!   transitions ──► history ───► poll() ──► msg queue ───────────► on change:
//!   record_current_state ──────► forward_pending ◄──► capture        ACTIVE    session, retarget,
//!                                fresh frame ──► ui queue ──► get_preview()   settle, start gate
//!                                            └─► TaskContext mirror    RESETTING status.txt, restore
//!                                                                      STARTUP   pause, gap, resume
//!                                                                      FINISHED  stop recorder, exit
//! ```
//!
//! ## Join
//! [`join`](Coordinator::join) waits until every loop returned, shutdown was signaled
//! (by any component or [`stop`](Coordinator::stop)), or an OS termination signal
//! arrived. The first loop error signals shutdown. Remaining loops and the capture
//! thread then get `runtime.grace` to exit; subscribers are drained last.
//!
//! ## Rules
//! - State-entry actions run exactly once per transition, in the order transitions
//!   happened.
//! - The snapshot handshake is forwarded by the monitor, never by the capture thread.
//! - A panic inside a loop is reported as [`RuntimeError::LoopPanicked`] and trips
//!   shutdown like any other loop failure.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{FrameStore, Preview, SensorSource};
use crate::core::builder::CoordinatorBuilder;
use crate::core::recorder::{self, Recorder};
use crate::core::runner::{self, TaskRunner};
use crate::core::session::{self, SessionDirs};
use crate::core::shutdown::{wait_for_os_signal, Shutdown};
use crate::core::{Config, SnapshotRequests};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{panic_message, Subscribe, SubscriberSet};
use crate::tasks::{ContextSettings, Task, TaskContext, TaskShared, TaskState, TaskStatus};

const MONITOR: &str = "monitor";
const RELAY: &str = "relay";
const CAPTURE: &str = recorder::CAPTURE_LOOP;

const STATUS_SUCCESS: &str = "success";
const STATUS_FAIL: &str = "fail";

type LoopResult = (&'static str, Result<(), RuntimeError>);

/// Loops not yet reaped, keyed by tokio task id.
type Alive = HashMap<task::Id, &'static str>;

struct Running {
    set: JoinSet<LoopResult>,
    alive: Alive,
    listener: JoinHandle<()>,
    listener_stop: CancellationToken,
}

/// Orchestrates one experiment: task runner, recorder and preview relay.
///
/// Built through [`Coordinator::builder`]; shared as `Arc<Coordinator>` so preview
/// consumers can hold their own reference.
pub struct Coordinator {
    cfg: Config,
    bus: Bus,
    shutdown: Shutdown,
    snapshots: Arc<SnapshotRequests>,
    ctx: TaskContext,
    store: Arc<dyn FrameStore>,
    task: Mutex<Option<Box<dyn Task>>>,
    sensor: Mutex<Option<Box<dyn SensorSource>>>,
    subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    recorder: Mutex<Option<Recorder>>,
    capture: Mutex<Option<JoinHandle<LoopResult>>>,
    ui_tx: mpsc::UnboundedSender<Preview>,
    ui_rx: AsyncMutex<mpsc::UnboundedReceiver<Preview>>,
    running: Mutex<Option<Running>>,
}

impl Coordinator {
    /// Starts building a coordinator for `cfg`.
    pub fn builder(cfg: Config) -> CoordinatorBuilder {
        CoordinatorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        task: Box<dyn Task>,
        sensor: Box<dyn SensorSource>,
        store: Arc<dyn FrameStore>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let shutdown = Shutdown::new();
        let snapshots = Arc::new(SnapshotRequests::new());
        let ctx = TaskContext::new(
            task.name(),
            Arc::new(TaskShared::new()),
            Arc::clone(&snapshots),
            shutdown.clone(),
            ContextSettings {
                record_only_after_action: cfg.camera.record_only_after_action,
                time_between_orders: cfg.experiment.time_between_orders,
                quantum: cfg.runtime.quantum,
            },
        );
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        Self {
            cfg,
            bus,
            shutdown,
            snapshots,
            ctx,
            store,
            task: Mutex::new(Some(task)),
            sensor: Mutex::new(Some(sensor)),
            subscribers: Mutex::new(subscribers),
            recorder: Mutex::new(None),
            capture: Mutex::new(None),
            ui_tx,
            ui_rx: AsyncMutex::new(ui_rx),
            running: Mutex::new(None),
        }
    }

    /// Launches the task-runner, monitor and relay loops.
    ///
    /// Must be called inside a tokio runtime, once.
    pub fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        tokio::runtime::Handle::try_current().map_err(|_| RuntimeError::NoRuntime)?;
        let mut running = self.running.lock();
        let Some(task) = self.task.lock().take() else {
            return Err(RuntimeError::AlreadyStarted);
        };

        let listener_stop = CancellationToken::new();
        let listener = self.spawn_listener(listener_stop.clone());

        let rt = &self.cfg.runtime;
        let (msg_tx, msg_rx) = mpsc::unbounded_channel::<TaskStatus>();
        let mut set = JoinSet::new();

        let task_runner = TaskRunner::new(
            task,
            self.ctx.clone(),
            self.bus.clone(),
            rt.task_time_margin,
            rt.quantum,
        );
        let mut alive = Alive::new();
        let id = set
            .spawn_blocking(move || guarded(runner::LOOP_NAME, move || task_runner.run()))
            .id();
        alive.insert(id, runner::LOOP_NAME);

        let this = Arc::clone(self);
        let id = set
            .spawn_blocking(move || guarded(MONITOR, move || this.monitor_loop(msg_tx)))
            .id();
        alive.insert(id, MONITOR);

        let this = Arc::clone(self);
        let id = set
            .spawn(guarded_async(RELAY, async move { this.relay_loop(msg_rx).await }))
            .id();
        alive.insert(id, RELAY);

        for name in [runner::LOOP_NAME, MONITOR, RELAY] {
            self.bus
                .publish(Event::new(EventKind::LoopStarted).with_source(name));
        }
        info!(task = self.ctx.task_name(), experiment = %self.cfg.experiment.name, "coordinator started");

        *running = Some(Running {
            set,
            alive,
            listener,
            listener_stop,
        });
        Ok(())
    }

    /// Waits for every loop to finish, then for the capture thread, within the grace
    /// period. Returns the first loop error, if any.
    pub async fn join(&self) -> Result<(), RuntimeError> {
        let Running {
            mut set,
            mut alive,
            listener,
            listener_stop,
        } = self.running.lock().take().ok_or(RuntimeError::NotStarted)?;
        let mut first: Option<RuntimeError> = None;

        let handle_signals = self.cfg.runtime.handle_os_signals;
        let os_signal = async move {
            if handle_signals {
                match wait_for_os_signal().await {
                    Ok(()) => return,
                    Err(e) => warn!(err = %e, "cannot listen for os signals"),
                }
            }
            std::future::pending::<()>().await
        };
        tokio::pin!(os_signal);

        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(joined) => self.reap(joined, &mut alive, &mut first),
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
                _ = &mut os_signal => {
                    self.request_shutdown("os signal");
                    break;
                }
            }
        }
        self.request_shutdown("loops finished");

        let grace = self.cfg.runtime.grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = set.join_next().await {
                self.reap(joined, &mut alive, &mut first);
            }
            let capture = self.capture.lock().take();
            if let Some(handle) = capture {
                alive.insert(handle.id(), CAPTURE);
                self.reap(handle.await, &mut alive, &mut first);
            }
        })
        .await;

        let res = match drained {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                first.map_or(Ok(()), Err)
            }
            Err(_) => {
                let mut stuck: Vec<String> = alive.values().map(ToString::to_string).collect();
                stuck.sort();
                error!(?stuck, ?grace, "loops did not stop within grace");
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
                Err(first.unwrap_or(RuntimeError::GraceExceeded { grace, stuck }))
            }
        };

        listener_stop.cancel();
        let _ = listener.await;
        res
    }

    /// [`start`](Self::start) followed by [`join`](Self::join).
    pub async fn run(self: &Arc<Self>) -> Result<(), RuntimeError> {
        self.start()?;
        self.join().await
    }

    /// Requests a cooperative shutdown of every loop.
    pub fn stop(&self) {
        self.request_shutdown("stop requested");
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Subscribes to runtime events published from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Current task state.
    pub fn state(&self) -> TaskState {
        self.ctx.state()
    }

    /// The recorder, once the first ACTIVE created it.
    pub fn recorder(&self) -> Option<Recorder> {
        self.recorder.lock().clone()
    }

    /// Pulls the newest preview frame, waiting up to `runtime.preview_timeout`.
    ///
    /// Older queued frames are discarded. The preview queue is unbounded and only this
    /// method drains it: the monitor enqueues every fresh frame, so a run with previews
    /// enabled but no caller polling here holds every frame of the session in memory.
    pub async fn get_preview(&self) -> Option<Preview> {
        let mut rx = self.ui_rx.lock().await;
        let timeout = self.cfg.runtime.preview_timeout;
        let mut newest = tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()?;
        while let Ok(p) = rx.try_recv() {
            newest = p;
        }
        Some(newest)
    }

    fn request_shutdown(&self, reason: &str) {
        if self.shutdown.signal() {
            info!(reason, "shutdown requested");
            self.bus
                .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
        }
    }

    fn reap(
        &self,
        joined: Result<LoopResult, JoinError>,
        alive: &mut Alive,
        first: &mut Option<RuntimeError>,
    ) {
        let err = match joined {
            Ok((name, Ok(()))) => {
                alive.retain(|_, n| *n != name);
                debug!(name, "loop stopped");
                self.bus
                    .publish(Event::new(EventKind::LoopStopped).with_source(name));
                return;
            }
            Ok((name, Err(e))) => {
                alive.retain(|_, n| *n != name);
                (name, e)
            }
            Err(e) => {
                let name = alive.remove(&e.id()).unwrap_or("unknown");
                let info = if e.is_panic() {
                    panic_message(&*e.into_panic())
                } else {
                    e.to_string()
                };
                (
                    name,
                    RuntimeError::LoopPanicked {
                        name: name.into(),
                        info,
                    },
                )
            }
        };
        let (name, e) = err;
        error!(name, err = %e, "loop failed");
        self.bus.publish(
            Event::new(EventKind::LoopFailed)
                .with_source(name)
                .with_reason(e.to_string()),
        );
        self.request_shutdown(&format!("{name} failed"));
        if first.is_none() {
            *first = Some(e);
        }
    }

    /// Forwards bus events to the subscriber set until `stop`, then drains it.
    fn spawn_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let subs = std::mem::take(&mut *self.subscribers.lock());
        let set = SubscriberSet::new(subs, self.bus.clone());
        let mut rx = self.bus.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "event listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => set.emit(ev),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            set.shutdown().await;
        })
    }

    /// Polls the task state, forwards snapshot requests and relays fresh frames.
    fn monitor_loop(&self, tx: mpsc::UnboundedSender<TaskStatus>) -> Result<(), RuntimeError> {
        let quantum = self.cfg.runtime.quantum;
        let shared = self.ctx.shared();
        let mut last_seq = 0;

        while !self.shutdown.is_signaled() {
            let mut finished = false;
            for status in shared.poll() {
                finished |= status.state.is_terminal();
                if tx.send(status).is_err() {
                    debug!("relay gone; monitor exiting");
                    return Ok(());
                }
            }
            if finished {
                return Ok(());
            }

            let recorder = self.recorder();
            if let Some(recorder) = recorder {
                if self.snapshots.is_requested() {
                    self.snapshots.forward_pending(&self.shutdown, quantum);
                }
                if let Some(preview) = recorder.fresh_since(last_seq) {
                    last_seq = preview.seq;
                    let _ = self.ui_tx.send(preview.clone());
                    shared.mirror(preview);
                }
            }
            self.shutdown.wait(quantum);
        }
        Ok(())
    }

    /// Performs state-entry actions, once per transition, in FIFO order.
    async fn relay_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<TaskStatus>,
    ) -> Result<(), RuntimeError> {
        let mut prev = TaskState::Startup;
        let mut session: Option<SessionDirs> = None;

        loop {
            let status = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                msg = rx.recv() => match msg {
                    Some(status) => status,
                    None => return Ok(()),
                },
            };
            if status.state == prev {
                continue;
            }

            let mut ev = Event::new(EventKind::StateChanged).with_transition(prev, status.state);
            if let Some(dirs) = &session {
                ev = ev.with_session(dirs.id);
            }
            self.bus.publish(ev);
            info!(from = %prev, to = %status.state, "state changed");
            prev = status.state;

            match status.state {
                TaskState::Active => session = self.on_active().await?,
                TaskState::Resetting => self.on_resetting(status, session.as_ref()).await,
                TaskState::Startup => self.on_startup().await,
                TaskState::Finished => {
                    self.on_finished().await;
                    return Ok(());
                }
            }
        }
    }

    async fn on_active(&self) -> Result<Option<SessionDirs>, RuntimeError> {
        let record = self.cfg.camera.record;
        let session = if record {
            let dirs = self.allocate_session().await?;
            self.ctx.shared().set_output_dir(Some(dirs.task.clone()));
            Some(dirs)
        } else {
            None
        };

        let recorder = self.ensure_recorder();
        if let Some(dirs) = &session {
            recorder.start_new_recording(dirs.task.clone());
        }

        if !self.shutdown.sleep(self.cfg.runtime.start_settle).await {
            self.ctx.shared().start.set();
        }
        Ok(session)
    }

    async fn allocate_session(&self) -> Result<SessionDirs, RuntimeError> {
        let base = self.cfg.session_base();
        let b = base.clone();
        let dirs = tokio::task::spawn_blocking(move || session::allocate(&b))
            .await
            .map_err(|e| RuntimeError::LoopPanicked {
                name: RELAY.into(),
                info: e.to_string(),
            })?
            .map_err(|source| RuntimeError::Session { base, source })?;

        info!(session = dirs.id, dir = %dirs.session.display(), "session created");
        self.bus.publish(
            Event::new(EventKind::SessionCreated)
                .with_session(dirs.id)
                .with_path(&dirs.session),
        );
        Ok(dirs)
    }

    async fn on_resetting(&self, status: TaskStatus, session: Option<&SessionDirs>) {
        let outcome = if status.failed { STATUS_FAIL } else { STATUS_SUCCESS };
        info!(status = outcome, "task result");
        let Some(dirs) = session else {
            return;
        };

        let file: PathBuf = dirs.status_file();
        match tokio::fs::write(&file, outcome).await {
            Ok(()) => self.bus.publish(
                Event::new(EventKind::StatusWritten)
                    .with_session(dirs.id)
                    .with_reason(outcome)
                    .with_path(&file),
            ),
            Err(e) => {
                warn!(file = %file.display(), err = %e, "cannot write status");
                self.bus.publish(
                    Event::new(EventKind::PersistenceFailed)
                        .with_path(&file)
                        .with_reason(e.to_string()),
                );
            }
        }

        self.ctx.shared().set_output_dir(Some(dirs.restore.clone()));
        if let Some(recorder) = self.recorder() {
            recorder.start_new_recording(dirs.restore.clone());
        }
    }

    async fn on_startup(&self) {
        let Some(recorder) = self.recorder() else {
            return;
        };
        recorder.pause();
        self.shutdown
            .sleep(self.cfg.experiment.timeout_between_experiments)
            .await;
        recorder.resume();
    }

    async fn on_finished(&self) {
        if let Some(recorder) = self.recorder() {
            recorder.stop();
            self.shutdown.sleep(self.cfg.runtime.finish_grace).await;
        }
    }

    /// Returns the recorder, creating it and spawning its capture loop on first use.
    fn ensure_recorder(&self) -> Recorder {
        let mut slot = self.recorder.lock();
        if let Some(recorder) = slot.as_ref() {
            return recorder.clone();
        }

        let recorder = Recorder::new(
            &self.cfg,
            Arc::clone(&self.store),
            Arc::clone(&self.snapshots),
            self.shutdown.clone(),
            self.bus.clone(),
        );
        if let Some(mut source) = self.sensor.lock().take() {
            let r = recorder.clone();
            let shutdown = self.shutdown.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let res = guarded(CAPTURE, move || r.run(source.as_mut()));
                // `join` only watches this handle once the other loops are done.
                if res.1.is_err() {
                    shutdown.signal();
                }
                res
            });
            *self.capture.lock() = Some(handle);
            self.bus
                .publish(Event::new(EventKind::LoopStarted).with_source(CAPTURE));
        }
        *slot = Some(recorder.clone());
        recorder
    }
}

/// Runs a blocking loop body, turning a panic into [`RuntimeError::LoopPanicked`].
fn guarded<F>(name: &'static str, f: F) -> LoopResult
where
    F: FnOnce() -> Result<(), RuntimeError>,
{
    let res = std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        Err(RuntimeError::LoopPanicked {
            name: name.to_owned(),
            info: panic_message(&*panic),
        })
    });
    (name, res)
}

/// Async counterpart of [`guarded`].
async fn guarded_async<Fut>(name: &'static str, fut: Fut) -> LoopResult
where
    Fut: Future<Output = Result<(), RuntimeError>>,
{
    let res = AssertUnwindSafe(fut).catch_unwind().await.unwrap_or_else(|panic| {
        Err(RuntimeError::LoopPanicked {
            name: name.to_owned(),
            info: panic_message(&*panic),
        })
    });
    (name, res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RawFrameStore;
    use crate::core::recorder::tests::counting_sensor;
    use crate::error::TaskError;
    use crate::tasks::TaskFn;
    use std::time::Duration;

    fn build(cfg: Config, task: impl Task) -> Arc<Coordinator> {
        Coordinator::builder(cfg)
            .with_task(task)
            .with_sensor(counting_sensor())
            .with_store(RawFrameStore)
            .build()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_twice_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = build(
            Config::for_testing("twice", tmp.path(), 20),
            TaskFn::new("idle", |ctx: &TaskContext| {
                ctx.finish();
                Ok::<_, TaskError>(())
            }),
        );
        coord.start().unwrap();
        assert!(matches!(coord.start(), Err(RuntimeError::AlreadyStarted)));
        coord.join().await.unwrap();
        assert!(matches!(coord.join().await, Err(RuntimeError::NotStarted)));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = build(
            Config::for_testing("nort", tmp.path(), 20),
            TaskFn::new("idle", |_: &TaskContext| Ok::<_, TaskError>(())),
        );
        assert!(matches!(coord.start(), Err(RuntimeError::NoRuntime)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preview_returns_newest_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = Config::for_testing("preview", tmp.path(), 50);
        cfg.camera.record = false;
        let coord = build(
            cfg,
            TaskFn::new("wait", |ctx: &TaskContext| ctx.sleep(Duration::from_secs(30))),
        );
        assert!(coord.get_preview().await.is_none());

        coord.start().unwrap();
        let mut seen = None;
        for _ in 0..50 {
            if let Some(p) = coord.get_preview().await {
                seen = Some(p);
                break;
            }
        }
        let first = seen.expect("no preview within deadline");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = coord.get_preview().await.expect("preview stopped flowing");
        assert!(later.seq > first.seq);

        coord.stop();
        coord.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fatal_task_error_is_reported_by_join() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = build(
            Config::for_testing("fatal", tmp.path(), 20),
            TaskFn::new("boom", |_: &TaskContext| Err::<(), _>(TaskError::fatal("estop"))),
        );
        let err = coord.run().await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_loop_failed");
        assert!(coord.shutdown().is_signaled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_task_is_isolated_and_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = build(
            Config::for_testing("panic", tmp.path(), 20),
            TaskFn::new("panics", |_: &TaskContext| -> Result<(), TaskError> {
                panic!("gripper driver crashed")
            }),
        );
        let err = coord.run().await.unwrap_err();
        match err {
            RuntimeError::LoopPanicked { name, info } => {
                assert_eq!(name, runner::LOOP_NAME);
                assert!(info.contains("gripper driver crashed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Fails the first cycle, succeeds the second, finishes on the third.
    fn three_cycles() -> impl Task {
        let mut cycle = 0;
        TaskFn::new("cycles", move |ctx: &TaskContext| {
            cycle += 1;
            match cycle {
                1 => Err(TaskError::fail("cube slipped")),
                2 => Ok(()),
                _ => {
                    ctx.finish();
                    Ok(())
                }
            }
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sessions_get_status_files_and_numbered_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::for_testing("cubes", tmp.path(), 50);
        let base = cfg.session_base();
        let coord = build(cfg, three_cycles());

        tokio::time::timeout(Duration::from_secs(10), coord.run())
            .await
            .expect("run did not finish")
            .unwrap();

        let status = |id: u32| std::fs::read_to_string(base.join(id.to_string()).join("status.txt"));
        assert_eq!(status(1).unwrap(), STATUS_FAIL);
        assert_eq!(status(2).unwrap(), STATUS_SUCCESS);
        assert!(status(3).is_err(), "finished session has no status");
        assert!(!base.join("4").exists());

        for id in 1..=3 {
            let session = base.join(id.to_string());
            assert!(session.join("task").is_dir());
            assert!(session.join("restore").is_dir());
        }
        assert_eq!(coord.state(), TaskState::Finished);
        assert!(coord.recorder().unwrap().persisted_frames() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn state_changes_are_relayed_once_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = build(Config::for_testing("order", tmp.path(), 50), three_cycles());
        let mut events = coord.events();
        tokio::time::timeout(Duration::from_secs(10), coord.run())
            .await
            .expect("run did not finish")
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::StateChanged {
                seen.push((ev.prev_state.unwrap(), ev.state.unwrap(), ev.session));
            }
        }
        use TaskState::*;
        assert_eq!(
            seen,
            vec![
                (Startup, Active, None),
                (Active, Resetting, Some(1)),
                (Resetting, Startup, Some(1)),
                (Startup, Active, Some(1)),
                (Active, Resetting, Some(2)),
                (Resetting, Startup, Some(2)),
                (Startup, Active, Some(2)),
                (Active, Finished, Some(3)),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_state_entry_per_action_under_snapshot_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = Config::for_testing("snap", tmp.path(), 50);
        cfg.camera.record_only_after_action = true;
        let base = cfg.session_base();
        let coord = build(
            cfg,
            TaskFn::new("push", |ctx: &TaskContext| {
                ctx.queue_actions(["reach", "grasp", "lift"], |_| Ok(()), true)?;
                ctx.finish();
                Ok::<_, TaskError>(())
            }),
        );
        tokio::time::timeout(Duration::from_secs(10), coord.run())
            .await
            .expect("run did not finish")
            .unwrap();

        let log = base.join("1").join("task").join(crate::capture::STATE_LOG_FILE);
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(log).unwrap()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(coord.recorder().unwrap().persisted_frames(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_ends_a_running_experiment_promptly() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::for_testing("stop", tmp.path(), 50);
        let deadline = cfg.runtime.finish_grace + cfg.runtime.quantum * 10;
        let coord = build(
            cfg,
            TaskFn::new("long", |ctx: &TaskContext| ctx.sleep(Duration::from_secs(60))),
        );
        let mut events = coord.events();
        coord.start().unwrap();
        while coord.state() != TaskState::Active {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        coord.stop();
        coord.join().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed < deadline, "loops took {elapsed:?}, deadline {deadline:?}");
        assert_eq!(coord.recorder().unwrap().status(), crate::core::RecorderStatus::Stopped);

        let mut stopped = BTreeSet::new();
        let mut all_within = false;
        while let Ok(ev) = events.try_recv() {
            match ev.kind {
                EventKind::LoopStopped => {
                    stopped.insert(ev.source.unwrap().to_string());
                }
                EventKind::AllStoppedWithin => all_within = true,
                _ => {}
            }
        }
        assert!(all_within);
        for name in [runner::LOOP_NAME, MONITOR, RELAY, CAPTURE] {
            assert!(stopped.contains(name), "{name} did not report stopping");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_sensor_ends_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reads = 0;
        let sensor = move || -> Result<crate::capture::SensorReading, crate::error::SensorError> {
            reads += 1;
            if reads == 4 {
                panic!("frame grabber crashed");
            }
            Ok(crate::core::recorder::tests::reading(reads))
        };
        let coord = Coordinator::builder(Config::for_testing("sensor", tmp.path(), 50))
            .with_task(TaskFn::new("long", |ctx: &TaskContext| {
                ctx.sleep(Duration::from_secs(60))
            }))
            .with_sensor(sensor)
            .build()
            .unwrap();
        let mut events = coord.events();

        let res = tokio::time::timeout(Duration::from_secs(3), coord.run())
            .await
            .expect("run kept going after the capture thread panicked");
        match res {
            Err(RuntimeError::LoopPanicked { name, info }) => {
                assert_eq!(name, CAPTURE);
                assert!(info.contains("frame grabber crashed"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(coord.shutdown().is_signaled());
        assert_eq!(coord.recorder().unwrap().status(), crate::core::RecorderStatus::Stopped);

        let mut failed = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::LoopFailed {
                failed.push(ev.source.unwrap().to_string());
            }
        }
        assert_eq!(failed, vec![CAPTURE.to_string()]);
    }

    fn wedged() -> LoopResult {
        panic!("relay wedged")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unguarded_panic_is_reaped_under_its_loop_name() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = build(
            Config::for_testing("reap", tmp.path(), 20),
            TaskFn::new("idle", |_: &TaskContext| Ok::<_, TaskError>(())),
        );
        let mut set = JoinSet::new();
        let id = set.spawn(async { wedged() }).id();
        let mut alive = Alive::from([(id, RELAY)]);
        let mut first = None;

        let joined = set.join_next().await.unwrap();
        coord.reap(joined, &mut alive, &mut first);

        assert!(alive.is_empty(), "reaped loop still listed: {alive:?}");
        match first {
            Some(RuntimeError::LoopPanicked { name, info }) => {
                assert_eq!(name, RELAY);
                assert!(info.contains("relay wedged"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(coord.shutdown().is_signaled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscribers_see_every_event_before_join_returns() {
        use std::sync::atomic::{AtomicU64, Ordering};

        struct Sessions(AtomicU64);

        #[async_trait::async_trait]
        impl Subscribe for Sessions {
            async fn on_event(&self, ev: &Event) {
                if ev.kind == EventKind::SessionCreated {
                    self.0.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let sessions = Arc::new(Sessions(AtomicU64::new(0)));
        let coord = Coordinator::builder(Config::for_testing("subs", tmp.path(), 50))
            .with_task(three_cycles())
            .with_sensor(counting_sensor())
            .with_subscribers(vec![sessions.clone() as Arc<dyn Subscribe>])
            .build()
            .unwrap();
        coord.run().await.unwrap();
        assert_eq!(sessions.0.load(Ordering::Relaxed), 3);
    }
}
