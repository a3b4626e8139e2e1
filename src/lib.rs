//! # capturevisor
//!
//! **Capturevisor** orchestrates cyclic data collection: a user [`Task`] is driven
//! through repeated experiment cycles while a [`Recorder`] captures frames and robot
//! state into numbered session directories, with previews relayed to a UI.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                       ┌───────────────────────┐
//!                       │   Task (user hooks)   │
//!                       │ startup / perform /   │
//!                       │ reset / recover       │
//!                       └───────────┬───────────┘
//!                                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Coordinator                                                      │
//! │  - Shutdown (one cooperative flag for every loop)                 │
//! │  - Bus (broadcast events) ──► listener ──► SubscriberSet          │
//! │  - SnapshotRequests (task ─► monitor ─► capture handshake)        │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               ▼
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  ┌──────────────┐
//!   │ task-runner  │   │   monitor    │   │    relay     │  │   capture    │
//!   │ (blocking)   │   │ (blocking)   │   │   (async)    │  │ (blocking)   │
//!   │ state machine│──►│ polls state, │──►│ state-entry  │─►│ Recorder::run│
//!   │              │   │ forwards     │   │ actions:     │  │ SensorSource │
//!   │              │   │ snapshots,   │   │ sessions,    │  │ ─► FrameStore│
//!   │              │   │ previews     │   │ status.txt   │  │ ─► StateLog  │
//!   └──────────────┘   └──────────────┘   └──────────────┘  └──────────────┘
//! ```
//!
//! ### Cycle
//! ```text
//! STARTUP ──► ACTIVE ──► RESETTING ──► STARTUP ──► …  ──► FINISHED
//!              │            │             │
//!              │            │             └─ recorder paused for the gap between sessions
//!              │            └─ status.txt = success | fail, recorder ─► restore/
//!              └─ new session dir N, recorder ─► task/, start gate opened
//! ```
//!
//! ## Layout on disk
//! ```text
//! <output_root>/<experiment>/<N>/task/     Video/ Bottom_Video/ states.json
//!                               /restore/  (same)
//!                               /status.txt
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                      |
//! |-------------------|-------------------------------------------------------------|-----------------------------------------|
//! | **Tasks**         | Define experiment cycles as trait impls or closures.        | [`Task`], [`TaskFn`], [`TaskContext`]   |
//! | **Capture**       | Plug in sensors and storage backends.                       | [`SensorSource`], [`FrameStore`]        |
//! | **Orchestration** | Run, stop and join the whole pipeline.                      | [`Coordinator`], [`Shutdown`]           |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, custom sinks).  | [`Subscribe`], [`LogWriter`]            |
//! | **Errors**        | Typed errors for configuration, sensors, tasks and runtime. | [`RuntimeError`], [`TaskError`]         |
//! | **Configuration** | YAML experiment settings with humantime durations.          | [`Config`]                              |
//!
//! ## Example
//! ```rust,no_run
//! use capturevisor::{
//!     Config, Coordinator, Frame, SensorError, SensorReading, TaskContext, TaskError, TaskFn,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::from_path("experiment.yaml")?;
//!
//!     let mut cycles = 0;
//!     let task = TaskFn::new("pick_place", move |ctx: &TaskContext| {
//!         cycles += 1;
//!         ctx.queue_actions(["open", "close"], |_| Ok(()), true)?;
//!         if cycles == 10 {
//!             ctx.finish();
//!         }
//!         Ok::<_, TaskError>(())
//!     });
//!
//!     let camera = || -> Result<SensorReading, SensorError> {
//!         Ok(SensorReading {
//!             primary: Frame::new(1, 1, 3, vec![0u8; 3]),
//!             secondary: Frame::new(1, 1, 1, vec![0u8; 1]),
//!             state: serde_json::json!({ "gripper": 0.0 }),
//!             timestamp: 0.0,
//!         })
//!     };
//!
//!     let coordinator = Coordinator::builder(cfg)
//!         .with_task(task)
//!         .with_sensor(camera)
//!         .build()?;
//!     coordinator.run().await?;
//!     Ok(())
//! }
//! ```
mod capture;
mod core;
mod error;
mod events;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use capture::{
    ClipWriter, Frame, FrameStore, Preview, RawFrameStore, SensorReading, SensorSource,
    StateLog, STATE_LOG_FILE,
};
pub use core::{
    allocate, wait_for_os_signal, CameraConfig, Config, Coordinator, CoordinatorBuilder,
    ExperimentConfig, Recorder, RecorderStatus, RuntimeConfig, SessionDirs, Shutdown,
    SnapshotRequests, BOTTOM_IMAGES_DIR, BOTTOM_VIDEO_DIR, IMAGES_DIR, VIDEO_DIR,
};
pub use error::{ConfigError, PersistenceError, RuntimeError, SensorError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use tasks::{Task, TaskContext, TaskFn, TaskState, TaskStatus};
