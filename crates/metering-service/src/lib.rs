//! # Metering Service
//!
//! Process entry point for the metering sidecar: logging initialization,
//! configuration loading, pipeline construction via
//! `metering_core::build_pipeline`, HTTP server startup, and SIGINT-driven
//! graceful shutdown. `metering-cli` owns argument parsing and hands a
//! [`RunConfig`] to [`run`].

use metering_api::{Config, ServerConfig, ServiceError};
use metering_core::{Clock, DefaultStatsRecorder, InMemoryPersistence, OnDiskPersistence, Persistence, RealClock, StatsRecorder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How many outstanding sends the in-process stats recorder tracks at once.
/// Bounded so a misbehaving endpoint can't grow the recorder unboundedly;
/// overflow evicts the oldest entry with a warning, same as the rest of the
/// pipeline's bounded-memory structures.
const MAX_PENDING_SENDS: usize = 10_000;

/// Fully resolved run parameters, produced by `metering-cli` from parsed
/// command-line flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub config_path: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub local_port: Option<u16>,
    pub no_state: bool,
    pub no_http: bool,
    pub log_level: String,
    pub json_logs: bool,
}

/// Install the global `tracing` subscriber. Defaults the filter to this
/// workspace's crates at `info` and honors `RUST_LOG` when set.
pub fn init_logging(log_level: &str, json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("metering_service={log_level},metering_api={log_level},metering_core={log_level}").into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load and validate configuration, build the pipeline, and run until a
/// SIGINT is received. Returns once the pipeline has drained and (if the
/// ingress server was started) the listener has shut down.
pub async fn run(run_config: RunConfig) -> Result<(), ServiceError> {
    let config = Config::from_path(&run_config.config_path).map_err(ServiceError::Configuration)?;
    config.validate().map_err(ServiceError::Configuration)?;

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let persistence: Arc<dyn Persistence> = if run_config.no_state {
        Arc::new(InMemoryPersistence::new())
    } else {
        let state_dir = run_config
            .state_dir
            .clone()
            .expect("state_dir is required unless --no-state is set");
        Arc::new(
            OnDiskPersistence::new(state_dir)
                .await
                .map_err(|e| ServiceError::StateInit(e.to_string()))?,
        )
    };
    let stats: Arc<dyn StatsRecorder> = Arc::new(DefaultStatsRecorder::new(clock.clone(), MAX_PENDING_SENDS));

    let pipeline = metering_core::build_pipeline(config.to_pipeline_config(), persistence, clock, stats.clone())?;
    pipeline.entry.acquire();

    let shutdown_entry = pipeline.entry.clone();
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining pipeline");
        shutdown_entry.release().await;
        info!("pipeline drained, exiting");
    };

    if run_config.no_http {
        shutdown.await;
        return Ok(());
    }

    let local_port = run_config
        .local_port
        .expect("local_port is required unless --no-http is set");
    let server_config = ServerConfig {
        bind_address: ([0, 0, 0, 0], local_port).into(),
        ..ServerConfig::default()
    };

    tokio::select! {
        result = metering_api::start_server(server_config, pipeline.entry.clone(), stats) => result,
        _ = shutdown => Ok(()),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
