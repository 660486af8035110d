//! Durable queue + bounded exponential-backoff retry wrapping one endpoint.
//!
//! A single owning worker task drains the persisted queue head-first: a
//! failing head blocks later entries until it succeeds, expires past
//! `max_queue_time`, or is terminally rejected. `send` only hands the report
//! to the endpoint for idempotence-context construction and durably enqueues
//! it; delivery happens entirely on the worker.

use crate::clock::{Clock, Timer};
use crate::endpoint::Endpoint;
use crate::persistence::{Persistence, Queue};
use crate::stats::StatsRecorder;
use crate::usage_tracker::UsageTracker;
use crate::{ClosedError, EndpointError, EndpointReport, PersistenceError, PipelineError, StampedMetricReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// One durable queue entry: the report plus the instant it was enqueued,
/// used to enforce `max_queue_time` expiration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub enqueued_at: DateTime<Utc>,
    pub report: EndpointReport,
}

/// Backoff and expiration tuning, adjustable before construction.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub min_delay: StdDuration,
    pub max_delay: StdDuration,
    pub max_queue_time: StdDuration,
    /// Implementation-defined timeout for a single `Endpoint::send` call.
    pub send_timeout: StdDuration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: StdDuration::from_secs(2),
            max_delay: StdDuration::from_secs(60),
            max_queue_time: StdDuration::from_secs(3 * 60 * 60),
            send_timeout: StdDuration::from_secs(60),
        }
    }
}

/// A `Sender` that interposes a durable queue and exponential backoff in
/// front of exactly one [`Endpoint`].
pub struct RetryingSender {
    endpoint: Arc<dyn Endpoint>,
    queue_key: String,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    stats: Arc<dyn StatsRecorder>,
    usage: UsageTracker,
    closing: Arc<AtomicBool>,
    notify: Arc<Notify>,
    shutdown: Arc<Notify>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RetryingSender {
    /// Construct and immediately spawn the worker, which attempts to drain
    /// any pre-existing persisted queue (recovery across restarts).
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        stats: Arc<dyn StatsRecorder>,
        config: RetryConfig,
    ) -> Arc<Self> {
        let queue_key = format!("epqueue/{}", endpoint.name());
        let closing = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let sender = Arc::new(Self {
            endpoint: endpoint.clone(),
            queue_key: queue_key.clone(),
            persistence: persistence.clone(),
            clock: clock.clone(),
            stats: stats.clone(),
            usage: UsageTracker::new(),
            closing: closing.clone(),
            notify: notify.clone(),
            shutdown: shutdown.clone(),
            worker: tokio::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(run_worker(
            endpoint,
            queue_key,
            persistence,
            clock,
            stats,
            config,
            closing,
            notify,
            shutdown,
        ));
        // Stash the handle; no other task observes `worker` before this
        // completes since the Arc isn't published until `new` returns.
        if let Ok(mut guard) = sender.worker.try_lock() {
            *guard = Some(handle);
        }
        sender
    }

    /// Register a new upstream owner (e.g. a `Dispatcher` that references
    /// this endpoint for one of several metrics). Pair with exactly one
    /// call to [`RetryingSender::release`] per owner.
    pub fn acquire(&self) {
        self.usage.acquire();
    }

    /// Stable name of the wrapped endpoint.
    pub fn endpoints(&self) -> Vec<String> {
        vec![self.endpoint.name().to_string()]
    }

    /// Durably enqueue `report`. Returns once the report is persisted or a
    /// `build_report` failure is known; delivery itself happens on the
    /// worker and is not awaited here.
    pub async fn send(&self, report: StampedMetricReport) -> Result<(), PipelineError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ClosedError.into());
        }
        let id = report.id.clone();
        let built = match self.endpoint.build_report(report).await {
            Ok(b) => b,
            Err(err) => {
                self.stats.send_failed(&id, self.endpoint.name());
                return Err(err.into());
            }
        };
        let entry = QueueEntry {
            enqueued_at: self.clock.now(),
            report: built,
        };
        self.persistence
            .enqueue(&self.queue_key, &entry)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        self.notify.notify_one();
        Ok(())
    }

    /// Final release: stop accepting new input, let the worker drain the
    /// durable queue to empty (no hard deadline — bounded by
    /// `max_queue_time`), then release the wrapped endpoint.
    pub async fn release(&self) {
        self.usage
            .release(|| async {
                self.closing.store(true, Ordering::SeqCst);
                self.shutdown.notify_waiters();
                if let Some(handle) = self.worker.lock().await.take() {
                    let _ = handle.await;
                }
                self.endpoint.release().await;
            })
            .await;
    }
}

fn clamp_delay(previous: StdDuration, min: StdDuration, max: StdDuration) -> StdDuration {
    if previous.is_zero() {
        min
    } else {
        (previous * 2).clamp(min, max)
    }
}

fn jitter() -> StdDuration {
    StdDuration::from_millis(rand::random::<u64>() % 1000)
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    endpoint: Arc<dyn Endpoint>,
    queue_key: String,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    stats: Arc<dyn StatsRecorder>,
    config: RetryConfig,
    closing: Arc<AtomicBool>,
    notify: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    let mut delay = StdDuration::ZERO;

    loop {
        let head: Option<QueueEntry> = match persistence.peek(&queue_key).await {
            Ok(entry) => Some(entry),
            Err(PersistenceError::NotFound { .. }) => None,
            Err(e) => {
                tracing::error!(endpoint = %endpoint.name(), error = %e, "unrecoverable persistence error reading retry queue");
                std::process::exit(70);
            }
        };

        let Some(head) = head else {
            if closing.load(Ordering::SeqCst) {
                tracing::info!(endpoint = %endpoint.name(), "retry queue drained, worker exiting");
                break;
            }
            tokio::select! {
                _ = notify.notified() => {}
                _ = shutdown.notified() => {}
            }
            continue;
        };

        let result = tokio::time::timeout(config.send_timeout, endpoint.send(&head.report)).await;
        let err = match result {
            Ok(Ok(())) => {
                stats.send_succeeded(head.report.id(), endpoint.name());
                dequeue_or_abort(&persistence, &queue_key, &endpoint).await;
                delay = StdDuration::ZERO;
                continue;
            }
            Ok(Err(err)) => err,
            Err(_elapsed) => EndpointError::new(endpoint.name(), "endpoint send timed out", true),
        };

        let age = (clock.now() - head.enqueued_at)
            .to_std()
            .unwrap_or(StdDuration::ZERO);

        if age > config.max_queue_time {
            tracing::warn!(endpoint = %endpoint.name(), report_id = %head.report.id(), "retry queue entry expired past max_queue_time");
            stats.send_failed(head.report.id(), endpoint.name());
            dequeue_or_abort(&persistence, &queue_key, &endpoint).await;
            delay = StdDuration::ZERO;
        } else if endpoint.is_transient(&err) {
            delay = clamp_delay(delay, config.min_delay, config.max_delay);
            let sleep_for = delay + jitter();
            tracing::debug!(endpoint = %endpoint.name(), delay_ms = sleep_for.as_millis() as u64, "retrying after transient failure");
            let timer: Timer = clock.new_timer(sleep_for);
            timer.fired().await;
        } else {
            tracing::warn!(endpoint = %endpoint.name(), report_id = %head.report.id(), error = %err, "terminal endpoint failure, dropping report");
            stats.send_failed(head.report.id(), endpoint.name());
            dequeue_or_abort(&persistence, &queue_key, &endpoint).await;
            delay = StdDuration::ZERO;
        }
    }
}

async fn dequeue_or_abort(persistence: &Arc<dyn Persistence>, queue_key: &str, endpoint: &Arc<dyn Endpoint>) {
    if let Err(e) = Queue::dequeue::<QueueEntry>(persistence.as_ref(), queue_key).await {
        tracing::error!(endpoint = %endpoint.name(), error = %e, "unrecoverable persistence error dequeuing retry queue head");
        std::process::exit(70);
    }
}

#[cfg(test)]
#[path = "retrying_sender_tests.rs"]
mod tests;
