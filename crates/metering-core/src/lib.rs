//! # Metering Core
//!
//! Core reporting pipeline for the metering sidecar: metric-routed inputs,
//! per-metric time-bucket aggregation, a durable per-endpoint retry queue
//! with exponential backoff, fan-out dispatch, and a cross-cutting send-stats
//! recorder.
//!
//! ## Architecture
//!
//! The pipeline is a chain of `Input`/`Sender` stages connected by channels:
//!
//! ```text
//! App -> Selector -> Aggregator(metric) -> Dispatcher -> RetryingSender(ep) -> Endpoint(ep)
//! ```
//!
//! Every stateful stage owns a single task with an inbox channel; callers
//! suspend only until the worker has accepted (and, where required,
//! durably persisted) their input. Shutdown cascades through [`UsageTracker`]
//! handles shared between upstream owners and their downstream dependencies.
//!
//! ## Usage
//!
//! ```rust
//! use metering_core::{MetricDefinition, MetricValue, ValueType};
//!
//! let def = MetricDefinition::new("requests", ValueType::Int64);
//! assert!(def.accepts(&MetricValue::Int64(1)));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Standard result type for metering-core operations.
pub type MeteringResult<T> = Result<T, PipelineError>;

// ============================================================================
// Data model
// ============================================================================

/// The declared wire type of a metric, used to validate incoming reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Int64,
    Float64,
}

/// A tagged union carrying exactly one numeric variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Int64(i64),
    Float64(f64),
}

impl MetricValue {
    /// The [`ValueType`] this value's variant corresponds to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int64(_) => ValueType::Int64,
            Self::Float64(_) => ValueType::Float64,
        }
    }

    /// Sum two values of the same variant. Returns `None` on variant mismatch.
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Some(Self::Int64(a + b)),
            (Self::Float64(a), Self::Float64(b)) => Some(Self::Float64(a + b)),
            _ => None,
        }
    }
}

/// An immutable, labeled usage measurement over a time window.
///
/// Invariant: `start_time <= end_time`. Construct via [`MetricReport::new`]
/// to enforce it; the fields are public for pattern-matching and tests but
/// the invariant is the caller's responsibility if built by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Insertion order is irrelevant; keys are unique. Stored sorted so
    /// label-set equality comparisons (the aggregation key) are cheap.
    pub labels: BTreeMap<String, String>,
    pub value: MetricValue,
}

impl MetricReport {
    pub fn new(
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        labels: BTreeMap<String, String>,
        value: MetricValue,
    ) -> Result<Self, ValidationError> {
        if start_time > end_time {
            return Err(ValidationError::TimeRangeInverted);
        }
        Ok(Self {
            name: name.into(),
            start_time,
            end_time,
            labels,
            value,
        })
    }

    /// Two reports aggregate iff names match and label sets are element-equal.
    pub fn aggregation_key(&self) -> (&str, &BTreeMap<String, String>) {
        (&self.name, &self.labels)
    }
}

/// A [`MetricReport`] stamped with a stable, globally unique id on first
/// entry to the dispatch layer. The id is reused verbatim across retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedMetricReport {
    pub id: String,
    pub report: MetricReport,
}

impl StampedMetricReport {
    pub fn new(report: MetricReport) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            report,
        }
    }
}

/// A [`StampedMetricReport`] plus an endpoint-private idempotence context.
///
/// `context` is opaque to the core: an endpoint may stash a pre-allocated
/// request id in it at [`crate::endpoint::Endpoint::build_report`] time and
/// reuse it verbatim on every retry so the downstream service can dedupe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointReport {
    pub stamped: StampedMetricReport,
    pub context: Option<Vec<u8>>,
}

impl EndpointReport {
    pub fn id(&self) -> &str {
        &self.stamped.id
    }
}

/// Declares the name and wire type of a metric; supplied via configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub value_type: ValueType,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }

    /// Whether `value`'s variant matches this definition's declared type.
    pub fn accepts(&self, value: &MetricValue) -> bool {
        value.value_type() == self.value_type
    }

    /// Full validation of an inbound report against this definition.
    pub fn validate(&self, report: &MetricReport) -> Result<(), ValidationError> {
        if report.name != self.name {
            return Err(ValidationError::UnknownMetric {
                name: report.name.clone(),
            });
        }
        if !self.accepts(&report.value) {
            return Err(ValidationError::ValueTypeMismatch {
                metric: self.name.clone(),
                expected: self.value_type,
                actual: report.value.value_type(),
            });
        }
        if report.start_time > report.end_time {
            return Err(ValidationError::TimeRangeInverted);
        }
        Ok(())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => write!(f, "int64"),
            Self::Float64 => write!(f, "float64"),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A malformed or undefined report. Surfaced synchronously; the report is
/// never accepted and no counter or queue is touched.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("report references undefined metric '{name}'")]
    UnknownMetric { name: String },

    #[error("metric '{metric}' expects {expected} but report carries {actual}")]
    ValueTypeMismatch {
        metric: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("start_time must be <= end_time")]
    TimeRangeInverted,
}

/// Returned by `add_report`/`send` once a component's [`UsageTracker`] count
/// has reached zero and graceful closure has begun.
#[derive(Debug, Clone, thiserror::Error)]
#[error("component is closed and no longer accepts input")]
pub struct ClosedError;

/// IO failure interacting with the durable store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("no value stored under key '{key}'")]
    NotFound { key: String },

    #[error("io error accessing key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize value for key '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Returned by [`crate::endpoint::Endpoint::send`] /
/// [`crate::endpoint::Endpoint::build_report`].
#[derive(Debug, thiserror::Error)]
#[error("endpoint '{endpoint}' error: {message}")]
pub struct EndpointError {
    pub endpoint: String,
    pub message: String,
    pub transient: bool,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EndpointError {
    pub fn new(endpoint: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            message: message.into(),
            transient,
            source: None,
        }
    }
}

/// Composite error aggregating independent sub-failures, e.g. from
/// [`crate::dispatcher::Dispatcher::send`] fan-out or multi-child release.
#[derive(Debug, thiserror::Error)]
#[error("{} of {} operations failed: {}", .errors.len(), .attempted, .summary())]
pub struct MultiError {
    pub attempted: usize,
    pub errors: Vec<PipelineError>,
}

impl MultiError {
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Returns `Ok(())` if `errors` is empty, else `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Top-level error type unifying every failure mode the pipeline surfaces.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Closed(#[from] ClosedError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Multi(#[from] MultiError),

    #[error("{0}")]
    Other(String),
}

/// High-level error categorization, mirrored from the retry/alerting split
/// the rest of the pipeline is built around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Configuration,
}

impl PipelineError {
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Closed(_) => ErrorCategory::Permanent,
            Self::Endpoint(e) if e.transient => ErrorCategory::Transient,
            Self::Endpoint(_) => ErrorCategory::Permanent,
            Self::Persistence(_) => ErrorCategory::Transient,
            Self::Multi(_) => ErrorCategory::Transient,
            Self::Other(_) => ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

pub mod adapters;
pub mod aggregator;
pub mod builder;
pub mod clock;
pub mod dispatcher;
pub mod endpoint;
pub mod heartbeat;
pub mod persistence;
pub mod routing;
pub mod retrying_sender;
pub mod stats;
pub mod usage_tracker;

pub use adapters::{BearerCredential, DiskEndpoint, HttpEndpoint};
pub use aggregator::{Aggregator, AggregatorConfig, BufferMode};
pub use builder::{
    build_pipeline, BuildError, EndpointKind, EndpointSpec, HeartbeatSourceSpec, MetricMode, MetricSpec,
    Pipeline, PipelineConfig,
};
pub use clock::{Clock, MockClock, RealClock, Timer};
pub use dispatcher::{Dispatcher, Sender};
pub use endpoint::Endpoint;
pub use heartbeat::HeartbeatSource;
pub use persistence::{InMemoryPersistence, OnDiskPersistence, Persistence, Queue, Value};
pub use retrying_sender::{RetryConfig, RetryingSender};
pub use routing::{CallbackInput, Input, LabelingInput, Selector, ValidatingInput};
pub use stats::{DefaultStatsRecorder, NoopStatsRecorder, Snapshot, StatsRecorder};
pub use usage_tracker::UsageTracker;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
