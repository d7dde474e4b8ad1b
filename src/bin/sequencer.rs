//! Sequencer binary

use clap::{Parser, Subcommand};
use lazylog::common::parse_peer_list;
use lazylog::{SequencerConfig, SequencerServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lazylog-sequencer")]
#[command(about = "lazylog sequencer replica")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a sequencer replica
    Serve {
        /// Replica ID
        #[arg(long)]
        id: u64,

        /// Bind address for the wire protocol
        #[arg(long, default_value = "0.0.0.0:5001")]
        bind: String,

        /// Peer sequencer addresses (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Shard addresses in dispatch order (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        shards: Vec<String>,

        /// Coordination service address
        #[arg(long, default_value = "127.0.0.1:2181")]
        coordination: String,

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
            peers,
            shards,
            coordination,
            config,
        } => {
            let mut seq_config = match config {
                Some(path) => lazylog::Config::from_file(path)?
                    .sequencer
                    .unwrap_or_default(),
                None => SequencerConfig::default(),
            };
            seq_config.rep_id = id;
            seq_config.bind_addr = bind;
            seq_config.coordination = coordination;
            if !peers.is_empty() {
                seq_config.peers = parse_peer_list(&peers)?;
            }
            if !shards.is_empty() {
                seq_config.shards = parse_peer_list(&shards)?;
            }

            let server = SequencerServer::bind(seq_config).await?;
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
