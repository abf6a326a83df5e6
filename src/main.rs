//! relay CLI entrypoint.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relay::commands;

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Provider migration and resilience controller for outbound messaging"
)]
struct Cli {
    /// Path to relay.toml (defaults to ./relay.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator API daemon with the health monitor.
    Serve {
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print migration status from the flag store.
    Status,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("RELAY_LOG")
        .unwrap_or_else(|_| EnvFilter::new("relay=info,audit=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve { port } => commands::serve::execute(cli.config.as_deref(), port).await,
        Commands::Status => commands::status::execute(cli.config.as_deref()).await,
    }
}
