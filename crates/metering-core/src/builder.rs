//! Wires a full reporting pipeline (`Selector` -> `Aggregator`/passthrough ->
//! `Dispatcher` -> `RetryingSender` -> `Endpoint`) from plain construction
//! specs. The specs are intentionally document-format-agnostic; translating
//! a configuration document into these types is `metering-api::config`'s job.

use crate::adapters::{BearerCredential, DiskEndpoint, HttpEndpoint};
use crate::aggregator::{Aggregator, AggregatorConfig, BufferMode};
use crate::clock::Clock;
use crate::dispatcher::{Dispatcher, Sender};
use crate::endpoint::Endpoint;
use crate::heartbeat::{HeartbeatSource, HeartbeatSpec};
use crate::persistence::Persistence;
use crate::retrying_sender::{RetryConfig, RetryingSender};
use crate::routing::{CallbackInput, Input, LabelingInput, Selector, ValidatingInput};
use crate::stats::StatsRecorder;
use crate::{MetricDefinition, MetricValue, ValueType};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One endpoint's transport, independent of how it was declared in a
/// configuration document.
#[derive(Debug, Clone)]
pub enum EndpointKind {
    Disk { path: PathBuf },
    Http {
        url: String,
        credential: Option<Arc<str>>,
        timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub name: String,
    pub kind: EndpointKind,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub enum MetricMode {
    Aggregation { buffer_duration: Duration },
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub name: String,
    pub value_type: ValueType,
    pub endpoints: Vec<String>,
    pub mode: MetricMode,
}

#[derive(Debug, Clone)]
pub struct HeartbeatSourceSpec {
    pub metric: String,
    pub interval: Duration,
    pub value: MetricValue,
    pub labels: BTreeMap<String, String>,
}

/// Full set of inputs needed to build a pipeline. Produced by translating a
/// configuration document (`metering-api::config::Config::to_pipeline_config`).
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub metrics: Vec<MetricSpec>,
    pub endpoints: Vec<EndpointSpec>,
    pub heartbeats: Vec<HeartbeatSourceSpec>,
    pub default_labels: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("metric '{metric}' references undefined endpoint '{endpoint}'")]
    UndefinedEndpoint { metric: String, endpoint: String },

    #[error("heartbeat source references undefined metric '{metric}'")]
    UndefinedHeartbeatMetric { metric: String },

    #[error("failed to construct endpoint '{name}': {source}")]
    EndpointConstruction {
        name: String,
        #[source]
        source: crate::EndpointError,
    },
}

/// The assembled pipeline: the entry `Input` everything upstream calls
/// `add_report` on, plus the heartbeat sources that must be shut down
/// alongside it (their `Input` handle is already wrapped into `entry` via
/// `CallbackInput`, so releasing `entry` tears them down too).
pub struct Pipeline {
    pub entry: Arc<dyn Input>,
}

/// Builds a full pipeline from [`PipelineConfig`]. Assumes the config has
/// already been validated (referential integrity, non-empty names); invalid
/// references are still reported here defensively as [`BuildError`].
pub fn build_pipeline(
    config: PipelineConfig,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    stats: Arc<dyn StatsRecorder>,
) -> Result<Pipeline, BuildError> {
    let mut endpoints_by_name: HashMap<String, Arc<dyn Endpoint>> = HashMap::new();
    for spec in &config.endpoints {
        let endpoint: Arc<dyn Endpoint> = match &spec.kind {
            EndpointKind::Disk { path } => Arc::new(DiskEndpoint::new(spec.name.clone(), path.clone())),
            EndpointKind::Http { url, credential, timeout } => {
                let credential = credential.clone().map(BearerCredential);
                Arc::new(
                    HttpEndpoint::new(spec.name.clone(), url.clone(), credential, *timeout).map_err(|e| {
                        BuildError::EndpointConstruction {
                            name: spec.name.clone(),
                            source: e,
                        }
                    })?,
                )
            }
        };
        endpoints_by_name.insert(spec.name.clone(), endpoint);
    }

    let mut senders_by_name: HashMap<String, Arc<dyn Sender>> = HashMap::new();
    for spec in &config.endpoints {
        let endpoint = endpoints_by_name.remove(&spec.name).expect("inserted above");
        let sender = RetryingSender::new(
            endpoint,
            persistence.clone(),
            clock.clone(),
            stats.clone(),
            spec.retry.clone(),
        );
        senders_by_name.insert(spec.name.clone(), sender as Arc<dyn Sender>);
    }

    let mut metric_inputs: HashMap<String, Arc<dyn Input>> = HashMap::new();
    for spec in &config.metrics {
        let mut children = Vec::with_capacity(spec.endpoints.len());
        for endpoint_name in &spec.endpoints {
            let sender = senders_by_name
                .get(endpoint_name)
                .cloned()
                .ok_or_else(|| BuildError::UndefinedEndpoint {
                    metric: spec.name.clone(),
                    endpoint: endpoint_name.clone(),
                })?;
            children.push(sender);
        }
        let dispatcher = Arc::new(Dispatcher::new(children, stats.clone()));
        let definition = MetricDefinition::new(spec.name.clone(), spec.value_type);

        let input: Arc<dyn Input> = match spec.mode {
            MetricMode::Passthrough => Arc::new(ValidatingInput::new(definition, dispatcher)),
            MetricMode::Aggregation { buffer_duration } => Aggregator::new(
                definition,
                AggregatorConfig { buffer_duration },
                persistence.clone(),
                clock.clone(),
                dispatcher,
            ),
        };
        metric_inputs.insert(spec.name.clone(), input);
    }

    let selector = Arc::new(Selector::new(metric_inputs.clone()));
    let labeled: Arc<dyn Input> = if config.default_labels.is_empty() {
        selector
    } else {
        Arc::new(LabelingInput::new(config.default_labels.clone(), selector))
    };

    let mut heartbeats = Vec::with_capacity(config.heartbeats.len());
    for spec in &config.heartbeats {
        let target = metric_inputs
            .get(&spec.metric)
            .cloned()
            .ok_or_else(|| BuildError::UndefinedHeartbeatMetric {
                metric: spec.metric.clone(),
            })?;
        let source = HeartbeatSource::new(
            HeartbeatSpec {
                metric: spec.metric.clone(),
                labels: spec.labels.clone(),
                value: spec.value,
                interval: spec.interval,
            },
            clock.clone(),
            target,
        );
        heartbeats.push(source);
    }

    let entry: Arc<dyn Input> = if heartbeats.is_empty() {
        labeled
    } else {
        Arc::new(CallbackInput::new(labeled, move || async move {
            for source in heartbeats {
                source.shutdown().await;
            }
        }))
    };

    Ok(Pipeline { entry })
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
