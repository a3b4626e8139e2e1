//! # Process-wide cooperative shutdown.
//!
//! [`Shutdown`] is a one-way flag shared by every loop of the runtime. It is observable
//! from both worlds the runtime lives in:
//! - **blocking threads** (task runner, monitor, capture loop) use [`Shutdown::wait`],
//!   a condition-variable wait that returns as soon as the flag is set;
//! - **async tasks** (relay loop, join) await [`Shutdown::cancelled`], backed by a
//!   [`CancellationToken`].
//!
//! ## Rules
//! - `signal()` is idempotent and never blocks; the flag is never unset.
//! - Every loop replaces unconditional sleeps with `wait(quantum)` so a signal
//!   propagates within one quantum everywhere.
//!
//! [`wait_for_os_signal`] completes when the process receives a termination signal:
//! `SIGINT`, `SIGTERM` or `SIGQUIT` on unix, Ctrl-C elsewhere.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// Broadcastable, idempotent shutdown flag.
///
/// Cheap to clone; all clones observe the same flag.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use capturevisor::Shutdown;
///
/// let shutdown = Shutdown::new();
/// assert!(!shutdown.wait(Duration::from_millis(5)));
/// assert!(shutdown.signal());
/// assert!(!shutdown.signal()); // already signaled
/// assert!(shutdown.wait(Duration::from_secs(60))); // returns immediately
/// ```
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: Mutex<bool>,
    cond: Condvar,
    token: CancellationToken,
}

impl Shutdown {
    /// Creates a new, unsignaled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter.
    ///
    /// Returns `true` only for the call that actually flipped the flag.
    pub fn signal(&self) -> bool {
        let mut flag = self.inner.flag.lock();
        if *flag {
            return false;
        }
        *flag = true;
        self.inner.cond.notify_all();
        drop(flag);
        self.inner.token.cancel();
        true
    }

    /// Non-blocking read.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Blocks the calling thread up to `timeout` or until signaled.
    ///
    /// Returns whether the flag is set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut flag = self.inner.flag.lock();
        if !*flag && !timeout.is_zero() {
            self.inner
                .cond
                .wait_while_for(&mut flag, |signaled| !*signaled, timeout);
        }
        *flag
    }

    /// Completes once the flag is set.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Async counterpart of [`wait`](Self::wait): sleeps for `d` unless signaled first.
    ///
    /// Returns whether the flag is set.
    pub async fn sleep(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(d) => self.is_signaled(),
        }
    }
}

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_os_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
///
/// Returns `Ok(())` on Ctrl-C, or `Err` if signal registration fails.
#[cfg(not(unix))]
pub async fn wait_for_os_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn wait_times_out_when_not_signaled() {
        let s = Shutdown::new();
        let started = Instant::now();
        assert!(!s.wait(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert!(!s.is_signaled());
    }

    #[test]
    fn signal_wakes_blocked_waiter_promptly() {
        let s = Shutdown::new();
        let waiter = {
            let s = s.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let signaled = s.wait(Duration::from_secs(30));
                (signaled, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(s.signal());

        let (signaled, waited) = waiter.join().unwrap();
        assert!(signaled);
        assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    }

    #[test]
    fn signal_is_idempotent() {
        let s = Shutdown::new();
        assert!(s.signal());
        assert!(!s.signal());
        assert!(s.is_signaled());
        assert!(s.wait(Duration::ZERO));
    }

    #[tokio::test]
    async fn async_side_observes_signal() {
        let s = Shutdown::new();
        let other = s.clone();
        let handle = tokio::spawn(async move { other.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        s.signal();
        let woke = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("sleep did not observe shutdown")
            .unwrap();
        assert!(woke);
    }
}
