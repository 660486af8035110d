//! Parallel fan-out to N child `Sender`s, with stats registration before
//! fan-out and aggregated per-child errors on the way back.

use crate::stats::StatsRecorder;
use crate::usage_tracker::UsageTracker;
use crate::{MultiError, PipelineError, StampedMetricReport};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Anything that accepts a stamped report and forwards it toward zero or
/// more endpoints. Implemented by
/// [`crate::retrying_sender::RetryingSender`] (leaf) and [`Dispatcher`]
/// (fan-out), so dispatchers can nest.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Register a new upstream owner. Pair with one call to `release`.
    fn acquire(&self);
    async fn send(&self, report: StampedMetricReport) -> Result<(), PipelineError>;
    fn endpoints(&self) -> Vec<String>;
    async fn release(&self);
}

#[async_trait]
impl Sender for crate::retrying_sender::RetryingSender {
    fn acquire(&self) {
        crate::retrying_sender::RetryingSender::acquire(self)
    }

    async fn send(&self, report: StampedMetricReport) -> Result<(), PipelineError> {
        crate::retrying_sender::RetryingSender::send(self, report).await
    }

    fn endpoints(&self) -> Vec<String> {
        crate::retrying_sender::RetryingSender::endpoints(self)
    }

    async fn release(&self) {
        crate::retrying_sender::RetryingSender::release(self).await
    }
}

/// Fans each report out to every child in parallel. Registers the full set
/// of downstream endpoint names with the stats recorder before fan-out so
/// the recorder can track per-handler outcomes independently of delivery
/// order.
pub struct Dispatcher {
    children: Vec<Arc<dyn Sender>>,
    stats: Arc<dyn StatsRecorder>,
    usage: UsageTracker,
}

impl Dispatcher {
    /// Takes ownership of each child: calls `child.acquire()` once per
    /// child, establishing this dispatcher as their owner.
    pub fn new(children: Vec<Arc<dyn Sender>>, stats: Arc<dyn StatsRecorder>) -> Self {
        for child in &children {
            child.acquire();
        }
        Self {
            children,
            stats,
            usage: UsageTracker::new(),
        }
    }

    /// Register a new upstream owner. Pair with one call to `release`.
    pub fn acquire(&self) {
        self.usage.acquire();
    }
}

#[async_trait]
impl Sender for Dispatcher {
    fn acquire(&self) {
        Dispatcher::acquire(self)
    }

    async fn send(&self, report: StampedMetricReport) -> Result<(), PipelineError> {
        let endpoints: HashSet<String> = self.endpoints().into_iter().collect();
        self.stats.register(&report.id, endpoints);

        let mut handles = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let child = child.clone();
            let report = report.clone();
            handles.push(tokio::spawn(async move { child.send(report).await }));
        }

        let attempted = handles.len();
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(join_err) => errors.push(PipelineError::Other(join_err.to_string())),
            }
        }

        MultiError { attempted, errors }
            .into_result()
            .map_err(PipelineError::from)
    }

    /// Deduplicated union of every child's endpoint names, preserving the
    /// order each name was first seen in child order.
    fn endpoints(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for child in &self.children {
            for name in child.endpoints() {
                if seen.insert(name.clone()) {
                    ordered.push(name);
                }
            }
        }
        ordered
    }

    async fn release(&self) {
        self.usage
            .release(|| async {
                let mut handles = Vec::with_capacity(self.children.len());
                for child in &self.children {
                    let child = child.clone();
                    handles.push(tokio::spawn(async move { child.release().await }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            })
            .await;
    }
}

/// Stamping adapter: a `Dispatcher` is also a valid pipeline-head `Input`
/// for passthrough metrics (no `Aggregator` involved) — each report is
/// stamped with a fresh id right here, on its first entry to the dispatch
/// layer, then fanned out exactly as from an aggregator flush.
#[async_trait]
impl crate::routing::Input for Dispatcher {
    fn acquire(&self) {
        Dispatcher::acquire(self)
    }

    async fn add_report(&self, report: crate::MetricReport) -> Result<(), PipelineError> {
        let stamped = crate::StampedMetricReport::new(report);
        Sender::send(self, stamped).await
    }

    async fn release(&self) {
        Sender::release(self).await;
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
