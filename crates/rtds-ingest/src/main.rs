//! RTDS Ingest - dataset import tool

use anyhow::Result;
use clap::Parser;
use rtds_common::logging::{init_logging, LogConfig, LogLevel};
use rtds_ingest::cli::{self, Cli};
use rtds_ingest::ImportSettings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("rtds-ingest")
        .build();

    // An explicit LOG_LEVEL in the environment wins over the flag
    let log_config = if std::env::var_os("LOG_LEVEL").is_some() {
        LogConfig::from_env().unwrap_or(log_config)
    } else {
        log_config
    };

    let _guard = init_logging(&log_config)?;

    let settings = ImportSettings::from_env()?;
    cli::run(cli, settings).await
}
