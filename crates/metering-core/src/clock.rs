//! Virtualizable wall clock, used everywhere a worker needs to compute a
//! deadline or wait on a timer without depending on real elapsed time.
//!
//! Components take the current instant once per loop iteration and compute
//! deadlines from it, so there is never a race window between `now()` and
//! `new_timer_at()` under a mock clock (see `RetryingSender`'s worker loop).

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::oneshot;

/// A single-shot, cancellable timer.
pub struct Timer {
    receiver: oneshot::Receiver<()>,
    state: Arc<Mutex<TimerInner>>,
}

struct TimerInner {
    fired: bool,
    cancelled: bool,
}

impl Timer {
    fn new(receiver: oneshot::Receiver<()>, state: Arc<Mutex<TimerInner>>) -> Self {
        Self { receiver, state }
    }

    /// Wait for the timer to fire. Resolves to `true` if it fired, `false`
    /// if it was cancelled (via [`Timer::stop`]) before firing.
    pub async fn fired(self) -> bool {
        self.receiver.await.is_ok()
    }

    /// Cancel the timer. Returns `true` iff the timer was active (had not
    /// already fired or been cancelled) and is now cancelled. Idempotent:
    /// calling this twice returns `false` on the second call.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.fired || state.cancelled {
            false
        } else {
            state.cancelled = true;
            true
        }
    }
}

/// Abstraction over wall time so components can be driven deterministically
/// under test via [`MockClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn new_timer(&self, duration: StdDuration) -> Timer;

    /// Convenience wrapper: fires at `instant`, or immediately if `instant`
    /// is already in the past (mirrors a non-positive-duration timer).
    fn new_timer_at(&self, instant: DateTime<Utc>) -> Timer {
        let now = self.now();
        let duration = if instant <= now {
            StdDuration::ZERO
        } else {
            (instant - now).to_std().unwrap_or(StdDuration::ZERO)
        };
        self.new_timer(duration)
    }
}

// ============================================================================
// RealClock
// ============================================================================

/// Clock backed by the system wall clock and `tokio::time`.
#[derive(Debug, Clone, Default)]
pub struct RealClock;

impl RealClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn new_timer(&self, duration: StdDuration) -> Timer {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(TimerInner {
            fired: false,
            cancelled: false,
        }));
        let task_state = state.clone();
        tokio::spawn(async move {
            if !duration.is_zero() {
                tokio::time::sleep(duration).await;
            }
            let mut inner = task_state.lock().unwrap();
            if inner.cancelled {
                return;
            }
            inner.fired = true;
            drop(inner);
            let _ = tx.send(());
        });
        Timer::new(rx, state)
    }
}

// ============================================================================
// MockClock
// ============================================================================

struct PendingTimer {
    deadline: DateTime<Utc>,
    sender: Option<oneshot::Sender<()>>,
    state: Arc<Mutex<TimerInner>>,
}

struct MockClockInner {
    now: DateTime<Utc>,
    pending: Vec<PendingTimer>,
}

/// Clock with an explicitly advanced virtual time, for deterministic tests.
///
/// Every call to [`MockClock::set_now`] fires (in deadline order) every
/// pending timer whose deadline is now `<=` the new time.
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<Mutex<MockClockInner>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockClockInner {
                now: start,
                pending: Vec::new(),
            })),
        }
    }

    /// Advance the virtual clock to `new_now`, firing all newly-due timers.
    ///
    /// `new_now` may be earlier than the current time only if the caller
    /// intends to rewind in a test; doing so does not un-fire timers.
    pub fn set_now(&self, new_now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.now = new_now;
        inner.pending.retain_mut(|timer| {
            if timer.deadline > new_now {
                return true;
            }
            let mut state = timer.state.lock().unwrap();
            if !state.cancelled {
                state.fired = true;
                if let Some(sender) = timer.sender.take() {
                    let _ = sender.send(());
                }
            }
            false
        });
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().now
    }

    fn new_timer(&self, duration: StdDuration) -> Timer {
        let mut inner = self.inner.lock().unwrap();
        let deadline = inner.now + chrono::Duration::from_std(duration).unwrap_or_default();
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(TimerInner {
            fired: false,
            cancelled: false,
        }));
        if deadline <= inner.now {
            state.lock().unwrap().fired = true;
            let _ = tx.send(());
        } else {
            inner.pending.push(PendingTimer {
                deadline,
                sender: Some(tx),
                state: state.clone(),
            });
        }
        Timer::new(rx, state)
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
