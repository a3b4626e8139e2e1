//! # Capture collaborators.
//!
//! The boundary between the runtime and the outside world on the data path:
//! - [`SensorSource`]: where frames and robot state come from;
//! - [`FrameStore`] / [`ClipWriter`]: where frames go ([`RawFrameStore`] built in);
//! - [`StateLog`]: the per-target `states.json` record of persisted ticks.

mod frame;
mod state_log;
mod store;

pub use frame::{Frame, Preview, SensorReading, SensorSource};
pub use state_log::{StateLog, STATE_LOG_FILE};
pub use store::{ClipWriter, FrameStore, RawFrameStore};
