//! The declarative configuration document: identities, metrics, endpoints,
//! sources and filters. Deserialized from YAML or JSON and validated once at
//! startup before the pipeline is built or the HTTP listener binds.

use crate::errors::ConfigError;
use metering_core::{
    EndpointKind as PipelineEndpointKind, EndpointSpec as PipelineEndpointSpec,
    HeartbeatSourceSpec, MetricMode as PipelineMetricMode, MetricSpec as PipelineMetricSpec,
    MetricValue, PipelineConfig, RetryConfig, ValueType,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

impl Config {
    /// Parse from a file, dispatching on extension (`.yaml`/`.yml` vs
    /// everything else, which is treated as JSON).
    pub fn from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }

    /// Validate referential integrity and per-entry constraints. Returns the
    /// first violation encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut identity_names = HashSet::new();
        for identity in &self.identities {
            if !identity_names.insert(identity.name.as_str()) {
                return Err(ConfigError::DuplicateIdentity {
                    name: identity.name.clone(),
                });
            }
            identity.credential.validate(&identity.name)?;
        }

        let mut metric_names = HashSet::new();
        let mut metric_types: HashMap<&str, ValueTypeConfig> = HashMap::new();
        for metric in &self.metrics {
            if !metric_names.insert(metric.name.as_str()) {
                return Err(ConfigError::DuplicateMetric {
                    name: metric.name.clone(),
                });
            }
            if let MetricModeConfig::Aggregation { buffer_seconds } = &metric.mode {
                if *buffer_seconds == 0 {
                    return Err(ConfigError::InvalidBufferSeconds {
                        name: metric.name.clone(),
                    });
                }
            }
            metric_types.insert(metric.name.as_str(), metric.r#type);
        }

        let mut endpoint_names = HashSet::new();
        for endpoint in &self.endpoints {
            if !endpoint_names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::DuplicateEndpoint {
                    name: endpoint.name.clone(),
                });
            }
            if let EndpointKindConfig::Http { identity, .. } = &endpoint.kind {
                if let Some(identity) = identity {
                    if !identity_names.contains(identity.as_str()) {
                        return Err(ConfigError::UndefinedIdentity {
                            name: endpoint.name.clone(),
                            identity: identity.clone(),
                        });
                    }
                }
            }
        }

        for metric in &self.metrics {
            for endpoint in &metric.endpoints {
                if !endpoint_names.contains(endpoint.as_str()) {
                    return Err(ConfigError::UndefinedEndpoint {
                        metric: metric.name.clone(),
                        endpoint: endpoint.clone(),
                    });
                }
            }
        }

        for source in &self.sources {
            let SourceKindConfig::Heartbeat {
                metric,
                interval_seconds,
                value,
                ..
            } = &source.kind;
            let expected: ValueType = (*metric_types
                .get(metric.as_str())
                .ok_or_else(|| ConfigError::UndefinedSourceMetric {
                    metric: metric.clone(),
                })?)
            .into();
            if expected != value.value_type() {
                return Err(ConfigError::SourceValueTypeMismatch {
                    metric: metric.clone(),
                    expected: expected.to_string(),
                    actual: value.value_type().to_string(),
                });
            }
            if *interval_seconds == 0 {
                return Err(ConfigError::InvalidInterval {
                    metric: metric.clone(),
                });
            }
        }

        Ok(())
    }

    /// Translate a validated document into [`PipelineConfig`]. Callers must
    /// call [`Config::validate`] first; referential integrity is assumed.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let identities: HashMap<&str, &Credential> = self
            .identities
            .iter()
            .map(|i| (i.name.as_str(), &i.credential))
            .collect();

        let endpoints = self
            .endpoints
            .iter()
            .map(|endpoint| PipelineEndpointSpec {
                name: endpoint.name.clone(),
                kind: match &endpoint.kind {
                    EndpointKindConfig::Disk { path } => {
                        PipelineEndpointKind::Disk { path: path.clone() }
                    }
                    EndpointKindConfig::Http {
                        url,
                        identity,
                        timeout_seconds,
                    } => PipelineEndpointKind::Http {
                        url: url.clone(),
                        credential: identity.as_deref().and_then(|name| {
                            identities.get(name).map(|c| match c {
                                Credential::Bearer { token } => std::sync::Arc::from(token.as_str()),
                            })
                        }),
                        timeout: Duration::from_secs(*timeout_seconds),
                    },
                },
                retry: RetryConfig::default(),
            })
            .collect();

        let metrics = self
            .metrics
            .iter()
            .map(|metric| PipelineMetricSpec {
                name: metric.name.clone(),
                value_type: metric.r#type.into(),
                endpoints: metric.endpoints.clone(),
                mode: match metric.mode {
                    MetricModeConfig::Aggregation { buffer_seconds } => {
                        PipelineMetricMode::Aggregation {
                            buffer_duration: Duration::from_secs(buffer_seconds),
                        }
                    }
                    MetricModeConfig::Passthrough => PipelineMetricMode::Passthrough,
                },
            })
            .collect();

        let heartbeats = self
            .sources
            .iter()
            .map(|source| {
                let SourceKindConfig::Heartbeat {
                    metric,
                    interval_seconds,
                    value,
                    labels,
                } = &source.kind;
                HeartbeatSourceSpec {
                    metric: metric.clone(),
                    interval: Duration::from_secs(*interval_seconds),
                    value: *value,
                    labels: labels.clone(),
                }
            })
            .collect();

        let mut default_labels = HashMap::new();
        for filter in &self.filters {
            let FilterKindConfig::AddLabels { omit_empty, labels } = &filter.kind;
            for (key, value) in labels {
                if *omit_empty && value.is_empty() {
                    continue;
                }
                default_labels.insert(key.clone(), value.clone());
            }
        }

        PipelineConfig {
            metrics,
            endpoints,
            heartbeats,
            default_labels,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTypeConfig {
    Int,
    Double,
}

impl std::fmt::Display for ValueTypeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Double => write!(f, "double"),
        }
    }
}

impl From<ValueTypeConfig> for ValueType {
    fn from(value: ValueTypeConfig) -> Self {
        match value {
            ValueTypeConfig::Int => ValueType::Int64,
            ValueTypeConfig::Double => ValueType::Float64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub name: String,
    pub credential: Credential,
}

/// An identity's credential payload. Never shown in `Debug` output or
/// re-serialized verbatim — a custom impl substitutes `<REDACTED>` so the
/// configuration can be echoed back (e.g. a future `/admin/config`
/// endpoint) without leaking tokens.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Credential {
    Bearer { token: String },
}

impl Credential {
    fn validate(&self, identity_name: &str) -> Result<(), ConfigError> {
        match self {
            Self::Bearer { token } if token.is_empty() => Err(ConfigError::EmptyCredential {
                name: identity_name.to_string(),
            }),
            Self::Bearer { .. } => Ok(()),
        }
    }
}

impl Serialize for Credential {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let Self::Bearer { .. } = self;
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "bearer")?;
        map.serialize_entry("token", "<REDACTED>")?;
        map.end()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self::Bearer { .. } = self;
        f.debug_struct("Bearer").field("token", &"<REDACTED>").finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub r#type: ValueTypeConfig,
    pub endpoints: Vec<String>,
    pub mode: MetricModeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MetricModeConfig {
    Aggregation { buffer_seconds: u64 },
    Passthrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: EndpointKindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EndpointKindConfig {
    Disk {
        path: PathBuf,
    },
    Http {
        url: String,
        identity: Option<String>,
        timeout_seconds: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceKindConfig {
    Heartbeat {
        metric: String,
        interval_seconds: u64,
        value: MetricValue,
        #[serde(default)]
        labels: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub kind: FilterKindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FilterKindConfig {
    AddLabels {
        #[serde(default)]
        omit_empty: bool,
        labels: BTreeMap<String, String>,
    },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
