//! Time sources used to evaluate token expiry.
use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// Source of the current time.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give another
/// to a [`TokenProvider`](crate::TokenProvider).
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        // Unwrap Mutex to propagate poison (writer panicked)
        let mut offset = self.offset.lock().expect("Non-poisoned lock");
        *offset += by;
    }

    /// Set the time elapsed since the clock was created.
    pub fn set_elapsed(&self, elapsed: Duration) {
        *self.offset.lock().expect("Non-poisoned lock") = elapsed;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().expect("Non-poisoned lock")
    }
}
