//! glb CLI
//!
//! Operator commands for a running glb daemon.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// glb - inspect and reload a glb daemon
#[derive(Parser, Debug)]
#[command(name = "glb")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon address
    #[arg(long, default_value = "http://localhost:9090", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the registry with cursors and failure counts
    Status {
        /// Only show this service
        service: Option<String>,

        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },

    /// Re-read the daemon's configuration file
    Reload,

    /// Validate a configuration file without contacting the daemon
    Check {
        /// Configuration file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Status { service, json } => {
            commands::status(&client, service, json).await?;
        }
        Commands::Reload => {
            commands::reload(&client).await?;
        }
        Commands::Check { config } => {
            commands::check(&config)?;
        }
    }

    Ok(())
}
