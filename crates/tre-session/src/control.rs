use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::lifecycle::{apply, SessionState, TransitionError, Trigger};

/// Line counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub received: u64,
    pub evaluated: u64,
    pub dropped: u64,
}

/// Shared control token of a session.
///
/// Callers only ever change the state here; the worker observes it between
/// lines and does the actual work.
#[derive(Debug)]
pub struct Control {
    inner: Mutex<ControlInner>,
    received: AtomicU64,
    evaluated: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug)]
struct ControlInner {
    state: SessionState,
    stop_requested: bool,
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

impl Control {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlInner {
                state: SessionState::Idle,
                stop_requested: false,
            }),
            received: AtomicU64::new(0),
            evaluated: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Applies `trigger` and returns the new state.
    pub fn fire(&self, trigger: Trigger) -> Result<SessionState, TransitionError> {
        let mut inner = self.lock();
        let next = apply(inner.state, trigger)?;
        if trigger == Trigger::StopRequested {
            inner.stop_requested = true;
        }
        inner.state = next;
        Ok(next)
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    pub fn is_paused(&self) -> bool {
        self.lock().state == SessionState::Paused
    }

    pub(crate) fn count_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_evaluated(&self) {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> LineStats {
        LineStats {
            received: self.received.load(Ordering::Relaxed),
            evaluated: self.evaluated.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
