//! Fixed-interval synthetic report source, for metrics that need contiguous
//! coverage even when nothing upstream sends usage (e.g. "service is alive"
//! counters billed by uptime rather than activity).

use crate::clock::Clock;
use crate::routing::Input;
use crate::{MetricReport, MetricValue};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// What each tick emits: a fixed name, labels, and value. Timestamps are
/// computed by the source itself so consecutive reports tile the timeline
/// with no gap or overlap.
#[derive(Debug, Clone)]
pub struct HeartbeatSpec {
    pub metric: String,
    pub labels: std::collections::BTreeMap<String, String>,
    pub value: MetricValue,
    pub interval: std::time::Duration,
}

/// Emits one [`MetricReport`] per tick on a fixed interval, acquiring its
/// `Input` handle at construction and releasing it on [`HeartbeatSource::shutdown`].
///
/// The first report's `start_time` is the interval boundary at or before the
/// instant the source was constructed (rounding down to the interval so
/// restarts realign to the same grid rather than drifting). Every
/// subsequent report's `start_time` equals the previous report's `end_time`,
/// so the emitted sequence has no gap and no overlap.
pub struct HeartbeatSource {
    shutdown: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatSource {
    pub fn new(spec: HeartbeatSpec, clock: Arc<dyn Clock>, input: Arc<dyn Input>) -> Arc<Self> {
        input.acquire();
        let shutdown = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_worker(spec, clock, input, shutdown.clone()));

        Arc::new(Self {
            shutdown,
            stopped,
            worker: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Stop emitting, release the input handle, and wait for the worker to
    /// exit. Idempotent: a second call is a no-op.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

fn round_down(instant: DateTime<Utc>, interval: std::time::Duration) -> DateTime<Utc> {
    let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::seconds(1));
    if interval <= chrono::Duration::zero() {
        return instant;
    }
    let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
    let elapsed = instant - epoch;
    let remainder = chrono::Duration::nanoseconds(
        elapsed.num_nanoseconds().unwrap_or(0) % interval.num_nanoseconds().max(1),
    );
    instant - remainder
}

async fn run_worker(spec: HeartbeatSpec, clock: Arc<dyn Clock>, input: Arc<dyn Input>, shutdown: Arc<Notify>) {
    let mut boundary = round_down(clock.now(), spec.interval);
    let mut timer = Box::pin(clock.new_timer_at(boundary + chrono_duration(spec.interval)).fired());

    loop {
        tokio::select! {
            _ = &mut timer => {
                let next_boundary = boundary + chrono_duration(spec.interval);
                let report = MetricReport::new(
                    spec.metric.clone(),
                    boundary,
                    next_boundary,
                    spec.labels.clone(),
                    spec.value,
                )
                .expect("heartbeat boundaries are always non-decreasing");

                if let Err(e) = input.add_report(report).await {
                    tracing::error!(metric = %spec.metric, error = %e, "heartbeat report rejected downstream");
                }

                boundary = next_boundary;
                timer = Box::pin(clock.new_timer_at(boundary + chrono_duration(spec.interval)).fired());
            }
            _ = shutdown.notified() => {
                break;
            }
        }
    }

    input.release().await;
    tracing::info!(metric = %spec.metric, "heartbeat source exiting");
}

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_default()
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
