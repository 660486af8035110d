//! Contract for a downstream sink. Concrete implementations (disk writer,
//! remote billing API client) are collaborators; see [`crate::adapters`]
//! for the two this workspace ships.

use crate::{EndpointError, EndpointReport, StampedMetricReport};
use async_trait::async_trait;

/// A downstream destination for emitted reports.
///
/// `send` may be called multiple times for the same [`EndpointReport`]
/// across retries; implementations must be idempotent on the receiving
/// side (typically via [`EndpointReport::context`]).
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Stable identifier, unique across endpoints configured for a metric.
    fn name(&self) -> &str;

    /// Pre-compute and stash any idempotence context. Called exactly once
    /// per report, not once per retry.
    async fn build_report(
        &self,
        report: StampedMetricReport,
    ) -> Result<EndpointReport, EndpointError>;

    /// The actual network/file call. Retried by the caller on transient
    /// failure; must be safe to call more than once for the same report.
    async fn send(&self, report: &EndpointReport) -> Result<(), EndpointError>;

    /// Whether `err` should be retried. Default classification defers to
    /// the `transient` flag the error was constructed with.
    fn is_transient(&self, err: &EndpointError) -> bool {
        err.transient
    }

    /// Release any resources held by this endpoint. Invoked exactly once,
    /// by the finalizer of the `UsageTracker` of whatever wraps this
    /// endpoint (typically a `RetryingSender`), after its worker has
    /// drained. Default no-op.
    async fn release(&self) {}
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
