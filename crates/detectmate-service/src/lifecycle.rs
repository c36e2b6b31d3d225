//! Lifecycle primitives shared by the workers.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Single-shot latch signalling "stop requested".
///
/// Once set it never clears; `run()` blocks on it and the manager consults
/// it to deduplicate repeated `stop` commands. Safe to set from any thread,
/// including signal handlers' helper threads.
#[derive(Debug, Default)]
pub struct LifecycleLatch {
    state: Mutex<bool>,
    signal: Condvar,
}

impl LifecycleLatch {
    /// Creates an unset latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latch and wakes all waiters.
    pub fn set(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = true;
        self.signal.notify_all();
    }

    /// Whether stop has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the latch is set.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !*state {
            state = self
                .signal
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Completion flag for timed worker joins.
///
/// `JoinHandle::join` cannot be bounded, so workers mark completion here and
/// the stopping thread waits on the flag with a budget before joining.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    state: Mutex<bool>,
    signal: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks the worker as finished.
    pub(crate) fn mark(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = true;
        self.signal.notify_all();
    }

    /// Rearms the flag before a new worker run.
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = false;
    }

    /// Waits up to `timeout` for the worker to finish.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = std::time::Instant::now() + timeout;
        while !*state {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next, _timeout) = self
                .signal
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        true
    }
}
