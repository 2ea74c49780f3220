//! Release/wait handshake used to wake a list consumer.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

/// A coalescing wake-up signal.
///
/// Any number of [`SyncSignal::signal`] calls made while nobody is waiting collapse into a single
/// pending permit. [`SyncSignal::wait`] consumes it.
#[derive(Debug, Default)]
pub struct SyncSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl SyncSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cond.notify_one();
    }

    /// Returns `true` as soon as a permit is (or already was) available, `false` once `timeout`
    /// has elapsed without one. Spurious wakeups are absorbed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if core::mem::take(&mut *pending) {
            return true;
        }

        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !core::mem::take(&mut *pending) {
                pending = self
                    .cond
                    .wait(pending)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        };

        loop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
            if core::mem::take(&mut *pending) {
                return true;
            }
            trace!("sync wait woke without a permit; retrying");
        }
    }

    /// Drops any pending permit.
    pub fn clear(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
