//! ## netran-cli
//! **Operational interface for the capture → accounting pipeline**
//!
//! Lists capture devices, prints the effective configuration, and runs the
//! pipeline until interrupted.

use std::process::ExitCode;

use clap::Parser;
use netran_telemetry::EventLogger;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    EventLogger::init(&config.telemetry.log_level).map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Devices(args) => commands::list_devices(args),
        Commands::Run(args) => commands::run_pipeline(args, config).await,
        Commands::Config => commands::print_config(&config),
    }
}
