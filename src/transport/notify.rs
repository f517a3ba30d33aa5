//! Counting notification shared by a buffer (producer side) and a worker
//! pool (consumer side).
//!
//! Every `notify_one` is remembered until a waiter consumes it, so a signal
//! raised while no worker is waiting is not lost. The pending count doubles as
//! the backlog the pool uses to decide when to grow.

use super::lock;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    pending: usize,
    closed: bool,
}

/// Mutex + condvar signal with a pending count
#[derive(Debug, Default)]
pub struct Notification {
    state: Mutex<State>,
    signal: Condvar,
}

impl Notification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one unit of work and wake one waiter
    pub fn notify_one(&self) {
        lock(&self.state).pending += 1;
        self.signal.notify_one();
    }

    /// Wait up to `timeout` for a pending signal and consume it.
    ///
    /// Returns `false` on timeout or once the notification is closed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.state);
        let (mut state, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |s| s.pending == 0 && !s.closed)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.closed || state.pending == 0 {
            return false;
        }
        state.pending -= 1;
        true
    }

    /// Consume one pending signal without waiting.
    ///
    /// Used when the work a signal announced is gone before any waiter took
    /// it. Returns `false` if nothing was pending.
    pub fn try_consume(&self) -> bool {
        let mut state = lock(&self.state);
        if state.pending == 0 {
            return false;
        }
        state.pending -= 1;
        true
    }

    /// Signals raised but not yet consumed
    pub fn backlog(&self) -> usize {
        lock(&self.state).pending
    }

    /// Release every waiter; later waits return immediately
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.signal.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}
