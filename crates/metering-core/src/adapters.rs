//! Concrete [`Endpoint`] implementations: an append-only disk writer and an
//! HTTP client for a remote billing API.

use crate::endpoint::Endpoint;
use crate::{EndpointError, EndpointReport, StampedMetricReport};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

/// Writes each [`EndpointReport`] as one JSON line appended to a file. Never
/// transient: a write failure on a local disk is treated as terminal so a
/// jammed sidecar doesn't retry forever against a full or missing volume.
pub struct DiskEndpoint {
    name: String,
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl DiskEndpoint {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            lock: AsyncMutex::new(()),
        }
    }
}

#[async_trait]
impl Endpoint for DiskEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build_report(
        &self,
        report: StampedMetricReport,
    ) -> Result<EndpointReport, EndpointError> {
        Ok(EndpointReport {
            stamped: report,
            context: None,
        })
    }

    async fn send(&self, report: &EndpointReport) -> Result<(), EndpointError> {
        let mut line = serde_json::to_vec(report)
            .map_err(|e| EndpointError::new(&self.name, format!("serialize report: {e}"), false))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EndpointError::new(&self.name, format!("create parent dir: {e}"), false))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EndpointError::new(&self.name, format!("open output file: {e}"), false))?;
        file.write_all(&line)
            .await
            .map_err(|e| EndpointError::new(&self.name, format!("write report: {e}"), false))?;
        Ok(())
    }
}

/// Identity credential attached to outbound requests. Held in memory only;
/// never logged or re-serialized (callers construct this from a redacted
/// configuration value).
#[derive(Clone)]
pub struct BearerCredential(pub Arc<str>);

/// Sends each [`EndpointReport`] as a JSON POST to a remote billing API,
/// reusing `context` as an idempotency key header across retries so the
/// receiver can dedupe resends of the same report.
pub struct HttpEndpoint {
    name: String,
    url: String,
    credential: Option<BearerCredential>,
    client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        credential: Option<BearerCredential>,
        timeout: Duration,
    ) -> Result<Self, EndpointError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EndpointError::new(&name, format!("build http client: {e}"), false))?;
        Ok(Self {
            name,
            url: url.into(),
            credential,
            client,
        })
    }
}

#[async_trait]
impl Endpoint for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build_report(
        &self,
        report: StampedMetricReport,
    ) -> Result<EndpointReport, EndpointError> {
        let context = report.id.clone().into_bytes();
        Ok(EndpointReport {
            stamped: report,
            context: Some(context),
        })
    }

    async fn send(&self, report: &EndpointReport) -> Result<(), EndpointError> {
        let idempotency_key = report
            .context
            .as_ref()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .unwrap_or_else(|| report.id().to_string());

        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", idempotency_key)
            .json(&report.stamped);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(&*credential.0);
        }

        let response = request.send().await.map_err(|e| {
            let transient = e.is_timeout() || e.is_connect() || e.is_request();
            EndpointError::new(&self.name, e.to_string(), transient)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let transient = status.is_server_error() || status.as_u16() == 429;
        let body = response.text().await.unwrap_or_default();
        Err(EndpointError::new(
            &self.name,
            format!("http {status}: {body}"),
            transient,
        ))
    }
}

#[cfg(test)]
#[path = "adapters_tests.rs"]
mod tests;
