//! Coordination service binary

use clap::{Parser, Subcommand};
use lazylog::coordination::CoordServer;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lazylog-coordsvc")]
#[command(about = "lazylog ephemeral-sequential coordination service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordination service
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:2181")]
        bind: String,

        /// Session timeout in seconds
        #[arg(long, default_value = "30")]
        session_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            session_timeout,
        } => {
            let server = CoordServer::bind(&bind, Duration::from_secs(session_timeout)).await?;
            server.serve().await?;
        }
    }

    Ok(())
}
