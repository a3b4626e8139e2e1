//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Coordinator` loops, `TaskRunner`, `Recorder`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the coordinator's event listener (fans out to `SubscriberSet`)
//!   and any receiver obtained through [`Coordinator::events`](crate::Coordinator::events).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
