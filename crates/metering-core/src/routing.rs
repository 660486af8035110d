//! Metric-name routing and cross-cutting `Input` decorators.
//!
//! `Input` is the pipeline-head contract: anything that accepts a raw
//! [`MetricReport`] before it has been stamped with an id. [`Aggregator`]
//! and a [`crate::dispatcher::Dispatcher`] wrapped in [`ValidatingInput`]
//! (passthrough mode) are the two leaf implementations; [`Selector`],
//! [`LabelingInput`], and [`CallbackInput`] decorate or route between them.

use crate::usage_tracker::UsageTracker;
use crate::{MetricDefinition, MetricReport, PipelineError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Anything that accepts a raw, unstamped report.
#[async_trait]
pub trait Input: Send + Sync {
    /// Register a new upstream owner. Pair with one call to `release`.
    fn acquire(&self);
    async fn add_report(&self, report: MetricReport) -> Result<(), PipelineError>;
    async fn release(&self);
}

/// Routes `add_report` to one of N children keyed by `report.name`.
/// Unknown names are rejected; known names are forwarded verbatim. Owns its
/// children via [`UsageTracker`] — releasing the selector releases all of
/// them concurrently.
pub struct Selector {
    children: HashMap<String, Arc<dyn Input>>,
    usage: UsageTracker,
}

impl Selector {
    /// Takes ownership of each child: calls `child.acquire()` once per
    /// child, establishing this selector as their owner.
    pub fn new(children: HashMap<String, Arc<dyn Input>>) -> Self {
        for child in children.values() {
            child.acquire();
        }
        Self {
            children,
            usage: UsageTracker::new(),
        }
    }

    pub fn acquire(&self) {
        self.usage.acquire();
    }
}

#[async_trait]
impl Input for Selector {
    fn acquire(&self) {
        Selector::acquire(self)
    }

    async fn add_report(&self, report: MetricReport) -> Result<(), PipelineError> {
        match self.children.get(report.name.as_str()) {
            Some(child) => child.add_report(report).await,
            None => Err(PipelineError::Validation(crate::ValidationError::UnknownMetric {
                name: report.name,
            })),
        }
    }

    async fn release(&self) {
        self.usage
            .release(|| async {
                let mut handles = Vec::with_capacity(self.children.len());
                for child in self.children.values() {
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

/// Decorator that merges a static label set into each inbound report before
/// forwarding. Existing keys on the report are never overwritten; a
/// collision is logged and the report's own value is kept.
pub struct LabelingInput {
    defaults: HashMap<String, String>,
    delegate: Arc<dyn Input>,
}

impl LabelingInput {
    pub fn new(defaults: HashMap<String, String>, delegate: Arc<dyn Input>) -> Self {
        Self { defaults, delegate }
    }
}

#[async_trait]
impl Input for LabelingInput {
    fn acquire(&self) {
        self.delegate.acquire();
    }

    async fn add_report(&self, mut report: MetricReport) -> Result<(), PipelineError> {
        for (key, value) in &self.defaults {
            if report.labels.contains_key(key) {
                tracing::warn!(metric = %report.name, label = %key, "default label collides with report label, keeping report's value");
                continue;
            }
            report.labels.insert(key.clone(), value.clone());
        }
        self.delegate.add_report(report).await
    }

    async fn release(&self) {
        self.delegate.release().await;
    }
}

/// Decorator that validates each inbound report against a [`MetricDefinition`]
/// before forwarding. The aggregation path gets this for free from
/// [`crate::aggregator::Aggregator::add_report`]; passthrough metrics have no
/// aggregator in front of their dispatcher, so the builder wraps the
/// dispatcher in this instead, keeping "reject mismatched value variants
/// without side effect" true on both paths.
pub struct ValidatingInput {
    metric: MetricDefinition,
    delegate: Arc<dyn Input>,
}

impl ValidatingInput {
    pub fn new(metric: MetricDefinition, delegate: Arc<dyn Input>) -> Self {
        Self { metric, delegate }
    }
}

#[async_trait]
impl Input for ValidatingInput {
    fn acquire(&self) {
        self.delegate.acquire();
    }

    async fn add_report(&self, report: MetricReport) -> Result<(), PipelineError> {
        self.metric.validate(&report)?;
        self.delegate.add_report(report).await
    }

    async fn release(&self) {
        self.delegate.release().await;
    }
}

type ShutdownFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Decorator that runs a supplied closure during release, before releasing
/// its delegate. Used by the builder to tear down heartbeat sources
/// alongside the pipeline they feed.
pub struct CallbackInput {
    delegate: Arc<dyn Input>,
    on_release: std::sync::Mutex<Option<ShutdownFn>>,
}

impl CallbackInput {
    pub fn new<F, Fut>(delegate: Arc<dyn Input>, on_release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delegate,
            on_release: std::sync::Mutex::new(Some(Box::new(move || {
                Box::pin(on_release()) as Pin<Box<dyn Future<Output = ()> + Send>>
            }))),
        }
    }
}

#[async_trait]
impl Input for CallbackInput {
    fn acquire(&self) {
        self.delegate.acquire();
    }

    async fn add_report(&self, report: MetricReport) -> Result<(), PipelineError> {
        self.delegate.add_report(report).await
    }

    async fn release(&self) {
        let callback = self.on_release.lock().unwrap().take();
        if let Some(callback) = callback {
            callback().await;
        }
        self.delegate.release().await;
    }
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod tests;
