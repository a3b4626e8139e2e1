//! # Snapshot request protocol.
//!
//! A control thread asks the capture thread to persist exactly one extra frame and
//! blocks until that frame is on disk. Three parties take part, all through one
//! [`SnapshotRequests`] monitor (one mutex, one condition variable):
//!
//! ```text
//! task runner                 monitor loop                     capture loop
//! ───────────                 ────────────                     ────────────
//! request_and_wait()
//!   ├─ take ticket ─────────► forward_pending()
//!   │  (wait while another      ├─ pending += 1 ─────────────► has_pending() == true
//!   │   ticket is in flight)    │                              persist one tick
//!   │                           │   wait while pending > 0 ◄── fulfil_one(): pending -= 1
//!   │                           └─ acknowledge(ticket)
//!   └─ wait until acknowledged ◄┘
//! ```
//!
//! ## Rules
//! - At most one request is in flight; later requesters queue on the ticket.
//! - `pending` is only incremented by `forward_pending` and only decremented by
//!   `fulfil_one`, one unit each.
//! - Every wait wakes at least once per quantum and gives up once shutdown is signaled.
//! - `forward_pending` must not run on the capture thread (it waits for it).

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::shutdown::Shutdown;

#[derive(Debug, Default)]
struct State {
    /// Ticket of the request currently in flight.
    in_flight: Option<u64>,
    /// Whether the in-flight ticket was already turned into a pending unit.
    forwarded: bool,
    /// Frames the capture loop still owes.
    pending: u32,
    /// Last ticket handed out.
    issued: u64,
    /// Last ticket acknowledged.
    acknowledged: u64,
}

/// Monitor object for the snapshot handshake.
#[derive(Debug, Default)]
pub struct SnapshotRequests {
    state: Mutex<State>,
    cond: Condvar,
}

impl SnapshotRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requester side: asks for one persisted frame and blocks until it was written.
    ///
    /// Returns `false` if shutdown was observed first.
    pub fn request_and_wait(&self, shutdown: &Shutdown, quantum: Duration) -> bool {
        let mut st = self.state.lock();
        while st.in_flight.is_some() {
            if shutdown.is_signaled() {
                return false;
            }
            self.cond.wait_for(&mut st, quantum);
        }

        st.issued += 1;
        let ticket = st.issued;
        st.in_flight = Some(ticket);
        st.forwarded = false;
        self.cond.notify_all();

        while st.acknowledged < ticket {
            if shutdown.is_signaled() {
                return false;
            }
            self.cond.wait_for(&mut st, quantum);
        }
        true
    }

    /// Whether a requester is waiting for a snapshot that has not been forwarded yet.
    pub fn is_requested(&self) -> bool {
        let st = self.state.lock();
        st.in_flight.is_some() && !st.forwarded
    }

    /// Relay side: turns the in-flight request into one pending unit, waits until the
    /// capture loop has fulfilled it, then acknowledges the requester.
    ///
    /// Returns `true` if a request was served, `false` if there was none or shutdown
    /// interrupted the wait.
    pub fn forward_pending(&self, shutdown: &Shutdown, quantum: Duration) -> bool {
        let mut st = self.state.lock();
        let ticket = match st.in_flight {
            Some(t) if !st.forwarded => t,
            _ => return false,
        };
        st.forwarded = true;
        st.pending += 1;
        self.cond.notify_all();

        while st.pending > 0 {
            if shutdown.is_signaled() {
                return false;
            }
            self.cond.wait_for(&mut st, quantum);
        }

        st.acknowledged = ticket;
        st.in_flight = None;
        st.forwarded = false;
        self.cond.notify_all();
        true
    }

    /// Capture side: whether at least one frame is owed.
    pub fn has_pending(&self) -> bool {
        self.state.lock().pending > 0
    }

    /// Capture side: marks one owed frame as persisted.
    ///
    /// Wakes all waiters once nothing is owed any more. No-op when nothing was pending.
    pub fn fulfil_one(&self) -> bool {
        let mut st = self.state.lock();
        if st.pending == 0 {
            return false;
        }
        st.pending -= 1;
        if st.pending == 0 {
            self.cond.notify_all();
        }
        true
    }

    /// Number of acknowledged requests so far.
    pub fn served(&self) -> u64 {
        self.state.lock().acknowledged
    }
}
