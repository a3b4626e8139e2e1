//! Frames and sensor readings exchanged with the external sensor source.

use bytes::Bytes;
use serde_json::Value;

use crate::error::SensorError;

/// One camera image: packed rows of `width * channels` bytes.
///
/// Cloning is cheap (the pixel buffer is reference counted).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Bytes,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u8, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            channels,
            data: data.into(),
        }
    }

    /// A frame is valid when it is non-empty and its buffer matches its geometry.
    pub fn is_valid(&self) -> bool {
        let expected = self.width as usize * self.height as usize * self.channels as usize;
        expected > 0 && self.data.len() == expected
    }
}

/// Everything the sensor source reports for one capture tick.
#[derive(Clone, Debug)]
pub struct SensorReading {
    /// Primary camera view (persisted under `Video/` or `Images/`).
    pub primary: Frame,
    /// Secondary camera view (persisted under `Bottom_Video/` or `Bottom_Images/`).
    pub secondary: Frame,
    /// Robot state at capture time, opaque to the runtime.
    pub state: Value,
    /// Sensor timestamp, seconds.
    pub timestamp: f64,
}

impl SensorReading {
    pub fn is_valid(&self) -> bool {
        self.primary.is_valid() && self.secondary.is_valid()
    }
}

/// External source of frames and robot state.
///
/// Owned by the recorder's capture thread; never called concurrently.
pub trait SensorSource: Send + 'static {
    /// Polls the latest frames and state.
    ///
    /// Return [`SensorError::Unavailable`] for transient failures (retried) and
    /// [`SensorError::Disconnected`] when the source is gone (trips shutdown).
    fn get_latest_frames(&mut self) -> Result<SensorReading, SensorError>;
}

impl<F> SensorSource for F
where
    F: FnMut() -> Result<SensorReading, SensorError> + Send + 'static,
{
    fn get_latest_frames(&mut self) -> Result<SensorReading, SensorError> {
        self()
    }
}

/// Newest frames observed by the recorder, as relayed to preview consumers.
#[derive(Clone, Debug)]
pub struct Preview {
    /// Refresh counter of the recorder; increases by one per successful sensor read.
    pub seq: u64,
    pub primary: Frame,
    pub secondary: Frame,
    pub state: Value,
    pub timestamp: f64,
}
