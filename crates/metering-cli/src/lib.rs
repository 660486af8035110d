//! Argument parsing for the metering sidecar binary. `main.rs` parses [`Cli`],
//! installs logging, and hands the resulting [`metering_service::RunConfig`]
//! to [`metering_service::run`].

use clap::Parser;
use metering_api::ServiceError;
use metering_service::RunConfig;
use std::path::PathBuf;

/// Metering sidecar: ingests usage reports, aggregates them in memory,
/// persists in-flight state durably, and forwards to remote endpoints with
/// bounded retry.
#[derive(Parser, Debug)]
#[command(name = "metering-sidecar")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sidecar metering agent")]
pub struct Cli {
    /// Path to the configuration document (YAML or JSON).
    #[arg(long, env = "METERING_CONFIG")]
    pub config: PathBuf,

    /// Directory holding durable pipeline state. Required unless --no-state.
    #[arg(long, env = "METERING_STATE_DIR", required_unless_present = "no_state")]
    pub state_dir: Option<PathBuf>,

    /// Port the ingress HTTP server binds to. Required unless --no-http.
    #[arg(long, env = "METERING_LOCAL_PORT", required_unless_present = "no_http")]
    pub local_port: Option<u16>,

    /// Run with in-memory persistence; in-flight state does not survive a restart.
    #[arg(long)]
    pub no_state: bool,

    /// Do not start the ingress HTTP server.
    #[arg(long)]
    pub no_http: bool,

    /// Log level passed to the tracing filter.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit structured JSON logs instead of human-readable text.
    #[arg(long)]
    pub json_logs: bool,
}

impl From<Cli> for RunConfig {
    fn from(cli: Cli) -> Self {
        Self {
            config_path: cli.config,
            state_dir: cli.state_dir,
            local_port: cli.local_port,
            no_state: cli.no_state,
            no_http: cli.no_http,
            log_level: cli.log_level,
            json_logs: cli.json_logs,
        }
    }
}

/// Maps a top-level service failure to a process exit code, matching clap's
/// own convention of reserving 2 for argument-group violations.
pub fn exit_code_for(err: &ServiceError) -> i32 {
    match err {
        ServiceError::Configuration(_) => 1,
        ServiceError::BindFailed { .. } => 2,
        ServiceError::ServerFailed { .. } => 3,
        ServiceError::PipelineBuild(_) => 4,
        ServiceError::StateInit(_) => 4,
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
