//! # One-shot, auto-clearing gate.
//!
//! The relay opens the gate once the next cycle is prepared (directories allocated,
//! recorder targeted); the task runner passes it exactly once and the gate closes
//! behind it. A runner can therefore never race ahead of the coordinator into the
//! next cycle.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::shutdown::Shutdown;

#[derive(Debug, Default)]
pub(crate) struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Opens the gate and wakes the waiter.
    pub(crate) fn set(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cond.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_set(&self) -> bool {
        *self.open.lock()
    }

    /// Blocks until the gate opens, then closes it again.
    ///
    /// Wakes at least every `quantum` to check `shutdown`. Returns `false` when
    /// shutdown was observed before the gate opened.
    pub(crate) fn wait(&self, shutdown: &Shutdown, quantum: Duration) -> bool {
        let mut open = self.open.lock();
        loop {
            if *open {
                *open = false;
                return true;
            }
            if shutdown.is_signaled() {
                return false;
            }
            self.cond.wait_for(&mut open, quantum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn passes_once_then_clears() {
        let gate = Gate::new();
        let shutdown = Shutdown::new();
        gate.set();
        assert!(gate.wait(&shutdown, Duration::from_millis(10)));
        assert!(!gate.is_set());
    }

    #[test]
    fn waiter_released_by_set_from_other_thread() {
        let gate = Arc::new(Gate::new());
        let shutdown = Shutdown::new();
        let g = Arc::clone(&gate);
        let opener = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            g.set();
        });
        assert!(gate.wait(&shutdown, Duration::from_millis(100)));
        opener.join().unwrap();
    }

    #[test]
    fn shutdown_unblocks_within_a_quantum() {
        let gate = Gate::new();
        let shutdown = Shutdown::new();
        let s = shutdown.clone();
        let signaler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            s.signal();
        });
        let started = Instant::now();
        assert!(!gate.wait(&shutdown, Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_millis(500));
        signaler.join().unwrap();
    }
}
