use anyhow::Result;
use clap::Parser;
use mendeley_uploader::cli::{run, Cli};
use mendeley_uploader::load_config::load_config;
use mendeley_uploader::telemetry::{init_tracing, with_startup_logging, LogBuffer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = with_startup_logging(|| load_config(cli.config.as_deref()))?;

    let logs = LogBuffer::new(config.log_capacity);
    init_tracing(&config.log_file, &logs)?;
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let result = run(cli, config, logs).await;
    match &result {
        Ok(_) => tracing::info!("CLI completed successfully"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}
