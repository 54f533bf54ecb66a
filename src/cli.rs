//! CLI for the fluxgate coordinator.

use clap::{Parser, Subcommand};

/// Fluxgate sensor-telemetry coordinator
#[derive(Parser, Debug)]
#[command(name = "fluxgate")]
#[command(about = "Bridges sensor telemetry to persistence and live viewers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the coordinator and viewer gateway (default)
    Serve,
}

/// Run the CLI command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) | None => crate::server::run().await,
    }
}
