//! # Event subscribers.
//!
//! ```text
//! Recorder / Runner / Relay ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!                                                                         │
//!                                                          ┌──────────────┼─────────┐
//!                                                          ▼              ▼         ▼
//!                                                      LogWriter       Metrics    Custom
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
