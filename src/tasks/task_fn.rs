//! # Closure-backed task (`TaskFn`)
//!
//! [`TaskFn`] wraps a closure `F: FnMut(&TaskContext) -> Result<(), TaskError>` used as
//! the task operation; the other hooks keep their no-op defaults. The closure owns its
//! state across cycles, so counters and handles can live in captured variables.
//!
//! ## Example
//! ```rust
//! use capturevisor::{Task, TaskContext, TaskError, TaskFn};
//!
//! let mut cycles = 0;
//! let task = TaskFn::new("shake", move |ctx: &TaskContext| {
//!     cycles += 1;
//!     if cycles == 3 {
//!         ctx.finish();
//!     }
//!     Ok::<_, TaskError>(())
//! });
//! assert_eq!(task.name(), "shake");
//! ```

use std::borrow::Cow;

use crate::error::TaskError;
use crate::tasks::{Task, TaskContext};

/// Function-backed task implementation.
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> TaskFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Task for TaskFn<F>
where
    F: FnMut(&TaskContext) -> Result<(), TaskError> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn perform_task(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        (self.f)(ctx)
    }
}
