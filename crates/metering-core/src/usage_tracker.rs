//! Shared-ownership / graceful-teardown primitive for components with
//! multiple upstream holders (e.g. one `RetryingSender` referenced by
//! several `Dispatcher`s). A counted handle with a finalizer, rather than
//! implicit GC: each owner calls [`UsageTracker::acquire`] once at
//! construction and [`UsageTracker::release`] once at shutdown; the
//! finalizer runs exactly once, when the last owner releases.

use std::future::Future;
use std::sync::{Arc, Mutex};

struct Inner {
    count: u32,
    finalized: bool,
}

/// A cloneable, thread-safe reference count with a one-shot finalizer.
#[derive(Clone)]
pub struct UsageTracker {
    inner: Arc<Mutex<Inner>>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                count: 0,
                finalized: false,
            }),
            ),
        }
    }

    /// Register a new owner, incrementing the usage count.
    pub fn acquire(&self) -> Self {
        let mut inner = self.inner.lock().unwrap();
        inner.count += 1;
        drop(inner);
        self.clone()
    }

    /// Release one owner's reference. When the count reaches zero, awaits
    /// `finalizer` and runs it exactly once — subsequent releases are
    /// idempotent no-ops.
    pub async fn release<F, Fut>(&self, finalizer: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let should_finalize = {
            let mut inner = self.inner.lock().unwrap();
            if inner.finalized || inner.count == 0 {
                false
            } else {
                inner.count -= 1;
                if inner.count == 0 {
                    inner.finalized = true;
                    true
                } else {
                    false
                }
            }
        };
        if should_finalize {
            finalizer().await;
        }
    }

    /// Current usage count, mostly useful for tests and diagnostics.
    pub fn count(&self) -> u32 {
        self.inner.lock().unwrap().count
    }
}

#[cfg(test)]
#[path = "usage_tracker_tests.rs"]
mod tests;
