//! Aegis - Main Entry Point
//!
//! Drift monitor for deployed classification models.

use clap::Parser;
use aegis_ml::cli::{
    cmd_check, cmd_run, cmd_simulate, cmd_status, cmd_validate, show_help, simulation_settings, Cli, Commands,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aegis=info,aegis_ml=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Some(Commands::Run { serve }) => {
            cmd_run(config, serve).await?;
        }
        Some(Commands::Check) => {
            cmd_check(config).await?;
        }
        Some(Commands::Status) => {
            cmd_status(config)?;
        }
        Some(Commands::Validate) => {
            cmd_validate(config)?;
        }
        Some(Commands::Simulate { source, drift_feature, drift_after, tick_ms, limit, seed }) => {
            let settings = simulation_settings(source, drift_feature, drift_after, tick_ms, limit, seed);
            cmd_simulate(config, settings).await?;
        }
        None => show_help(),
    }

    Ok(())
}
