//! # Task abstractions.
//!
//! This module provides the task-side types:
//! - [`Task`] - hooks implemented by experiment-specific behavior
//! - [`TaskState`] - phase of the task cycle
//! - [`TaskContext`] - handle passed to every hook (actions, snapshots, live frames)
//! - [`TaskStatus`] - state plus failed flag, as observed by the coordinator
//! - [`TaskFn`] - closure-backed task

pub(crate) mod context;
mod task;
mod task_fn;

pub(crate) use context::{ContextSettings, TaskShared};
pub use context::{TaskContext, TaskStatus};
pub use task::{Task, TaskState};
pub use task_fn::TaskFn;
