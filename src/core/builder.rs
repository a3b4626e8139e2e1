use std::sync::Arc;

use crate::{
    capture::{FrameStore, RawFrameStore, SensorSource},
    core::Config,
    error::ConfigError,
    subscribers::Subscribe,
    tasks::Task,
};

use super::coordinator::Coordinator;

/// Builder for constructing a [`Coordinator`].
///
/// A task and a sensor source are required; the frame store defaults to
/// [`RawFrameStore`].
pub struct CoordinatorBuilder {
    cfg: Config,
    task: Option<Box<dyn Task>>,
    sensor: Option<Box<dyn SensorSource>>,
    store: Option<Arc<dyn FrameStore>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl CoordinatorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            task: None,
            sensor: None,
            store: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the task driven through the cycle.
    pub fn with_task(mut self, task: impl Task) -> Self {
        self.task = Some(Box::new(task));
        self
    }

    /// Sets the source the recorder reads frames and robot state from.
    pub fn with_sensor(mut self, sensor: impl SensorSource) -> Self {
        self.sensor = Some(Box::new(sensor));
        self
    }

    /// Replaces the default frame store.
    pub fn with_store(mut self, store: impl FrameStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (state changes, sessions, recorder
    /// activity, loop lifecycle) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the configuration and builds the coordinator.
    ///
    /// Nothing is spawned until [`Coordinator::start`].
    pub fn build(self) -> Result<Arc<Coordinator>, ConfigError> {
        self.cfg.validate()?;
        let task = self.task.ok_or(ConfigError::Missing { what: "task" })?;
        let sensor = self.sensor.ok_or(ConfigError::Missing {
            what: "sensor source",
        })?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(RawFrameStore) as Arc<dyn FrameStore>);

        Ok(Arc::new(Coordinator::new_internal(
            self.cfg,
            task,
            sensor,
            store,
            self.subscribers,
        )))
    }
}
