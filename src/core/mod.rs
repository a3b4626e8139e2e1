//! Runtime core: orchestration and lifecycle.
//!
//! The only entry point most users need is [`Coordinator`], built through
//! [`CoordinatorBuilder`] from a [`Config`].
//!
//! Internal modules:
//! - [`coordinator`]: owns the loops, relays state changes and previews, joins with grace;
//! - [`runner`]: drives one task through STARTUP → ACTIVE → RESETTING → STARTUP;
//! - [`recorder`]: capture thread, persistence policy and writer retargeting;
//! - [`snapshot`]: the "record now" handshake between task, monitor and capture;
//! - [`session`]: numbered session directories;
//! - [`shutdown`]: the shared cooperative shutdown flag and OS signal handling.

mod builder;
mod config;
mod coordinator;
mod gate;
mod recorder;
mod runner;
mod session;
mod shutdown;
mod snapshot;

pub use builder::CoordinatorBuilder;
pub use config::{CameraConfig, Config, ExperimentConfig, RuntimeConfig};
pub use coordinator::Coordinator;
pub(crate) use gate::Gate;
pub use recorder::{
    Recorder, RecorderStatus, BOTTOM_IMAGES_DIR, BOTTOM_VIDEO_DIR, IMAGES_DIR, VIDEO_DIR,
};
pub use session::{allocate, SessionDirs};
pub use shutdown::{wait_for_os_signal, Shutdown};
pub use snapshot::SnapshotRequests;
