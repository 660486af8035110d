use clap::Parser;
use metering_cli::{exit_code_for, Cli};
use metering_service::RunConfig;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    metering_service::init_logging(&cli.log_level, cli.json_logs);

    let run_config = RunConfig::from(cli);
    if let Err(err) = metering_service::run(run_config).await {
        error!(error = %err, "metering sidecar exited with an error");
        std::process::exit(exit_code_for(&err));
    }
}
