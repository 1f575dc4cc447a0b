use std::process::ExitCode;

use anyhow::Context;
use envconfig::Envconfig;
use tracing::{error, info};

use elasticsearch_exporter::config::Config;
use elasticsearch_exporter::{lifecycle, logging};

async fn serve(config: Config) -> anyhow::Result<()> {
    let shutdown = lifecycle::shutdown_signal().context("failed to handle shutdown signals")?;
    let listener = lifecycle::bind(config.address)
        .await
        .context("failed to start http server")?;

    lifecycle::run(config, listener, shutdown)
        .await
        .context("http server failed")
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(err) => {
            // Logging is configured from the same environment.
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.address,
        "starting elasticsearch_exporter"
    );

    match serve(config).await {
        Ok(()) => {
            info!("elasticsearch_exporter stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("elasticsearch_exporter failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
