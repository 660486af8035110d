//! Request/response bodies for the HTTP ingress surface.

use crate::errors::ReportHandlerError;
use chrono::{DateTime, Utc};
use metering_core::{MetricReport, MetricValue, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire body for `POST /report`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub value: ValueRequest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRequest {
    pub int64_value: Option<i64>,
    pub double_value: Option<f64>,
}

impl ReportRequest {
    pub fn into_metric_report(self) -> Result<MetricReport, ReportHandlerError> {
        let value = match (self.value.int64_value, self.value.double_value) {
            (Some(v), None) => MetricValue::Int64(v),
            (None, Some(v)) => MetricValue::Float64(v),
            (None, None) => {
                return Err(ReportHandlerError::Malformed(
                    "value must set exactly one of int64Value or doubleValue".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ReportHandlerError::Malformed(
                    "value must not set both int64Value and doubleValue".to_string(),
                ))
            }
        };
        Ok(MetricReport::new(
            self.name,
            self.start_time,
            self.end_time,
            self.labels,
            value,
        )?)
    }
}

/// Response body for `POST /report` on success.
#[derive(Debug, Serialize)]
pub struct ReportAccepted {
    pub accepted: bool,
}

/// Response body for `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Response body for `GET /healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[cfg(test)]
#[path = "responses_tests.rs"]
mod tests;
