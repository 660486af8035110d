//! Cross-cutting send-stats recorder, consulted by the `/status` endpoint.
//!
//! [`DefaultStatsRecorder`] tracks, per report id, which handlers (endpoint
//! names) are still outstanding; the dispatcher registers the full set
//! before fan-out, and each `RetryingSender` reports success or terminal
//! failure against its own handler name. One failure anywhere collapses the
//! whole report to failed — the recorder does not wait for every handler.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Snapshot of recent send outcomes, served verbatim by `/status`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub last_report_success: Option<DateTime<Utc>>,
    pub current_failure_count: u64,
    pub total_failure_count: u64,
}

/// Tracks send outcomes for reports fanned out to one or more handlers.
pub trait StatsRecorder: Send + Sync {
    /// Called by the dispatcher before fan-out: records that `id` is
    /// expected to succeed against every name in `handlers`.
    fn register(&self, id: &str, handlers: HashSet<String>);

    /// Removes `handler` from `id`'s outstanding set. When the set becomes
    /// empty, clears the current-failure run and records the success time.
    fn send_succeeded(&self, id: &str, handler: &str);

    /// Drops `id`'s pending entry entirely and records a failure. A second
    /// call for the same `id` (from a different handler) is a no-op warning,
    /// matching "one failure across any handler collapses the report."
    fn send_failed(&self, id: &str, handler: &str);

    fn snapshot(&self) -> Snapshot;
}

struct PendingSend {
    outstanding: HashSet<String>,
    sequence: u64,
}

struct State {
    pending: HashMap<String, PendingSend>,
    /// Insertion order of currently-pending ids, oldest first, for eviction.
    order: VecDeque<String>,
    last_report_success: Option<DateTime<Utc>>,
    current_failure_count: u64,
    total_failure_count: u64,
    next_sequence: u64,
}

/// Default, bounded-memory `StatsRecorder`.
///
/// Holds at most `max_pending_sends` entries; on overflow the oldest by
/// insertion order is evicted with a warning. Eviction never touches the
/// failure counters — it only means a late success/failure for that id will
/// be logged and ignored, same as after a restart.
pub struct DefaultStatsRecorder {
    clock: Arc<dyn Clock>,
    max_pending_sends: usize,
    state: Mutex<State>,
}

impl DefaultStatsRecorder {
    pub fn new(clock: Arc<dyn Clock>, max_pending_sends: usize) -> Self {
        Self {
            clock,
            max_pending_sends,
            state: Mutex::new(State {
                pending: HashMap::new(),
                order: VecDeque::new(),
                last_report_success: None,
                current_failure_count: 0,
                total_failure_count: 0,
                next_sequence: 0,
            }),
        }
    }

    pub fn with_default_capacity(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, 1000)
    }
}

impl StatsRecorder for DefaultStatsRecorder {
    fn register(&self, id: &str, handlers: HashSet<String>) {
        let mut state = self.state.lock().unwrap();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state
            .pending
            .insert(id.to_string(), PendingSend { outstanding: handlers, sequence });
        state.order.push_back(id.to_string());

        while state.pending.len() > self.max_pending_sends {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if state.pending.remove(&oldest).is_some() {
                tracing::warn!(report_id = %oldest, "evicting oldest pending send: stats capacity exceeded");
            }
        }
    }

    fn send_succeeded(&self, id: &str, handler: &str) {
        let mut state = self.state.lock().unwrap();
        match state.pending.get_mut(id) {
            Some(entry) => {
                entry.outstanding.remove(handler);
                if entry.outstanding.is_empty() {
                    state.pending.remove(id);
                    state.order.retain(|queued| queued != id);
                    state.current_failure_count = 0;
                    state.last_report_success = Some(self.clock.now());
                }
            }
            None => {
                tracing::warn!(report_id = %id, handler = %handler, "send_succeeded for unknown or already-resolved report id");
            }
        }
    }

    fn send_failed(&self, id: &str, handler: &str) {
        let mut state = self.state.lock().unwrap();
        if state.pending.remove(id).is_some() {
            state.order.retain(|queued| queued != id);
            state.current_failure_count += 1;
            state.total_failure_count += 1;
        } else {
            tracing::warn!(report_id = %id, handler = %handler, "send_failed for unknown or already-resolved report id");
        }
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().unwrap();
        Snapshot {
            last_report_success: state.last_report_success,
            current_failure_count: state.current_failure_count,
            total_failure_count: state.total_failure_count,
        }
    }
}

/// No-op recorder for dependency injection where stats are not needed.
#[derive(Debug, Default)]
pub struct NoopStatsRecorder;

impl StatsRecorder for NoopStatsRecorder {
    fn register(&self, _id: &str, _handlers: HashSet<String>) {}
    fn send_succeeded(&self, _id: &str, _handler: &str) {}
    fn send_failed(&self, _id: &str, _handler: &str) {}
    fn snapshot(&self) -> Snapshot {
        Snapshot::default()
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
