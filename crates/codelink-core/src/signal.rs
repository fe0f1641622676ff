//! Thread wake-ups and interval timing shared by the link workers

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Auto-resetting wake-up flag
///
/// `set` wakes one waiter; the waiter consumes the flag on return.
#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// Create an unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake the waiter
    pub fn set(&self) {
        *lock(&self.flag) = true;
        self.cond.notify_all();
    }

    /// Wait until the flag is set or `timeout` passes, then clear it
    ///
    /// Returns whether the flag was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.flag);
        let (mut guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, false)
    }
}

#[derive(Debug, Default)]
struct Timing {
    last: Option<Instant>,
    longest: Duration,
}

/// Measures intervals between events and remembers the longest
#[derive(Debug, Default)]
pub struct Stopwatch {
    timing: Mutex<Timing>,
}

impl Stopwatch {
    /// Create a stopwatch with no interval running
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an event; returns the interval since the previous one
    pub fn restart(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut timing = lock(&self.timing);
        let interval = timing.last.map(|last| now.duration_since(last));
        if let Some(interval) = interval {
            timing.longest = timing.longest.max(interval);
        }
        timing.last = Some(now);
        interval
    }

    /// Time since the last event, `None` before the first
    pub fn elapsed(&self) -> Option<Duration> {
        lock(&self.timing).last.map(|last| last.elapsed())
    }

    /// Longest completed interval
    pub fn longest(&self) -> Duration {
        lock(&self.timing).longest
    }

    /// Forget the running interval; the longest is kept
    pub fn clear(&self) {
        lock(&self.timing).last = None;
    }
}
