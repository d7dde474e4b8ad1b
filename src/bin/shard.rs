//! Shard binary

use clap::{Parser, Subcommand};
use lazylog::common::parse_peer_list;
use lazylog::{ShardConfig, ShardServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lazylog-shard")]
#[command(about = "lazylog GP-indexed record shard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a shard
    Serve {
        /// Shard ID
        #[arg(long)]
        id: u64,

        /// Bind address for the wire protocol
        #[arg(long, default_value = "0.0.0.0:6001")]
        bind: String,

        /// Sequencer addresses (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        sequencers: Vec<String>,

        /// Optional JSON config file; CLI arguments take priority
        #[arg(long)]
        config: Option<PathBuf>,
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
            id,
            bind,
            sequencers,
            config,
        } => {
            let mut shard_config = match config {
                Some(path) => lazylog::Config::from_file(path)?.shard.unwrap_or_default(),
                None => ShardConfig::default(),
            };
            shard_config.shard_id = id;
            shard_config.bind_addr = bind;
            if !sequencers.is_empty() {
                shard_config.sequencers = parse_peer_list(&sequencers)?;
            }

            let server = ShardServer::bind(shard_config).await?;
            let handle = server.handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.shutdown();
                }
            });
            server.serve().await?;
        }
    }

    Ok(())
}
