//! Per-metric time-bucketed accumulator. Owns one in-memory [`Bucket`] at a
//! time and a background task that flushes it on a timer, merging reports
//! with matching name and element-equal labels by summing values and
//! widening the time range.

use crate::clock::Clock;
use crate::persistence::{Persistence, Value};
use crate::routing::Input;
use crate::usage_tracker::UsageTracker;
use crate::{ClosedError, MetricDefinition, MetricReport, MetricValue, PersistenceError, PipelineError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// How a metric's reports are buffered before forwarding downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Merge reports with matching labels and flush every `buffer_seconds`.
    Aggregation { buffer_seconds: u64 },
    /// Stamp and forward each report immediately; no [`Aggregator`] task.
    Passthrough,
}

/// Tuning for an [`Aggregator`] instance. Only meaningful in
/// [`BufferMode::Aggregation`] — a builder wiring a passthrough metric does
/// not construct an `Aggregator` at all.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub buffer_duration: StdDuration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AggregatedReport {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    labels: BTreeMap<String, String>,
    value: MetricValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Bucket {
    created_at: DateTime<Utc>,
    reports: HashMap<String, Vec<AggregatedReport>>,
}

impl Bucket {
    fn fresh(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            reports: HashMap::new(),
        }
    }

    fn apply(&mut self, report: MetricReport) {
        let entries = self.reports.entry(report.name).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| e.labels == report.labels) {
            match existing.value.checked_add(&report.value) {
                Some(summed) => existing.value = summed,
                None => {
                    tracing::warn!("aggregated value variant mismatch, dropping incoming value");
                }
            }
            existing.start_time = existing.start_time.min(report.start_time);
            existing.end_time = existing.end_time.max(report.end_time);
        } else {
            entries.push(AggregatedReport {
                start_time: report.start_time,
                end_time: report.end_time,
                labels: report.labels,
                value: report.value,
            });
        }
    }
}

enum Command {
    AddReport(MetricReport, oneshot::Sender<Result<(), PipelineError>>),
}

/// Per-metric aggregator. Validates inbound reports synchronously against
/// its [`MetricDefinition`]; aggregation and flushing happen on a single
/// owning worker task.
pub struct Aggregator {
    metric: MetricDefinition,
    inbox: mpsc::Sender<Command>,
    usage: UsageTracker,
    closing: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    pub fn new(
        metric: MetricDefinition,
        config: AggregatorConfig,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        downstream: Arc<dyn Input>,
    ) -> Arc<Self> {
        downstream.acquire();
        let key = format!("aggregator/{}", metric.name);
        let (tx, rx) = mpsc::channel(64);
        let closing = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());

        let handle = tokio::spawn(run_worker(
            metric.clone(),
            key,
            config.buffer_duration,
            persistence,
            clock,
            downstream,
            rx,
            shutdown.clone(),
        ));

        Arc::new(Self {
            metric,
            inbox: tx,
            usage: UsageTracker::new(),
            closing,
            shutdown,
            worker: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Register a new upstream owner. Pair with one call to `release`.
    pub fn acquire(&self) {
        self.usage.acquire();
    }
}

#[async_trait]
impl Input for Aggregator {
    fn acquire(&self) {
        self.usage.acquire();
    }

    async fn add_report(&self, report: MetricReport) -> Result<(), PipelineError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ClosedError.into());
        }
        self.metric.validate(&report)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.inbox
            .send(Command::AddReport(report, ack_tx))
            .await
            .map_err(|_| PipelineError::from(ClosedError))?;
        ack_rx.await.map_err(|_| PipelineError::from(ClosedError))?
    }

    async fn release(&self) {
        self.usage
            .release(|| async {
                self.closing.store(true, Ordering::SeqCst);
                self.shutdown.notify_waiters();
                if let Some(handle) = self.worker.lock().await.take() {
                    let _ = handle.await;
                }
            })
            .await;
    }
}

async fn run_worker(
    metric: MetricDefinition,
    key: String,
    buffer_duration: StdDuration,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    downstream: Arc<dyn Input>,
    mut inbox: mpsc::Receiver<Command>,
    shutdown: Arc<Notify>,
) {
    let mut bucket = match persistence.load::<Bucket>(&key).await {
        Ok(b) => b,
        Err(PersistenceError::NotFound { .. }) => Bucket::fresh(clock.now()),
        Err(e) => {
            tracing::error!(metric = %metric.name, error = %e, "unrecoverable persistence error loading aggregator bucket");
            std::process::exit(70);
        }
    };

    let mut timer_fired = Box::pin(clock.new_timer_at(bucket.created_at + chrono_duration(buffer_duration)).fired());

    loop {
        tokio::select! {
            cmd = inbox.recv() => {
                match cmd {
                    Some(Command::AddReport(report, ack)) => {
                        bucket.apply(report);
                        let result = persist_bucket(&persistence, &key, &metric, &bucket).await;
                        let _ = ack.send(result);
                    }
                    None => break,
                }
            }
            _ = &mut timer_fired => {
                flush(&mut bucket, &metric, &downstream, &persistence, &clock, &key).await;
                timer_fired = Box::pin(clock.new_timer_at(bucket.created_at + chrono_duration(buffer_duration)).fired());
            }
            _ = shutdown.notified() => {
                break;
            }
        }
    }

    while let Ok(cmd) = inbox.try_recv() {
        match cmd {
            Command::AddReport(report, ack) => {
                bucket.apply(report);
                let _ = ack.send(Ok(()));
            }
        }
    }

    flush(&mut bucket, &metric, &downstream, &persistence, &clock, &key).await;
    downstream.release().await;
    tracing::info!(metric = %metric.name, "aggregator worker exiting");
}

fn chrono_duration(d: StdDuration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_default()
}

async fn persist_bucket(
    persistence: &Arc<dyn Persistence>,
    key: &str,
    metric: &MetricDefinition,
    bucket: &Bucket,
) -> Result<(), PipelineError> {
    match Value::store(persistence.as_ref(), key, bucket).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(metric = %metric.name, error = %e, "unrecoverable persistence error storing aggregator bucket");
            std::process::exit(70);
        }
    }
}

async fn flush(
    bucket: &mut Bucket,
    metric: &MetricDefinition,
    downstream: &Arc<dyn Input>,
    persistence: &Arc<dyn Persistence>,
    clock: &Arc<dyn Clock>,
    key: &str,
) {
    for (name, reports) in bucket.reports.drain() {
        for agg in reports {
            let report = MetricReport {
                name: name.clone(),
                start_time: agg.start_time,
                end_time: agg.end_time,
                labels: agg.labels,
                value: agg.value,
            };
            if let Err(e) = downstream.add_report(report).await {
                tracing::error!(metric = %metric.name, error = %e, "downstream rejected flushed report");
            }
        }
    }
    *bucket = Bucket::fresh(clock.now());
    let _ = persist_bucket(persistence, key, metric, bucket).await;
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
