//! Client CLI
//!
//! One-shot append/readrange commands plus the interactive REPL.

use clap::{Parser, Subcommand};
use lazylog::client::{LogClient, RangeReport, RangeRow};
use lazylog::common::parse_peer_list;
use lazylog::ClientConfig;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "lazylog")]
#[command(about = "lazylog client")]
#[command(version)]
struct Cli {
    /// Client ID, part of every record id this client mints
    #[arg(long, default_value = "1")]
    id: u64,

    /// Sequencer addresses (comma-separated host:port)
    #[arg(long, value_delimiter = ',')]
    sequencers: Vec<String>,

    /// Shard addresses (comma-separated host:port)
    #[arg(long, value_delimiter = ',')]
    shards: Vec<String>,

    /// Give up on an append after this many milliseconds
    #[arg(long)]
    append_timeout_ms: Option<u64>,

    /// Optional JSON config file; CLI arguments take priority
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one payload and print its record id
    Append {
        /// Payload text (must not contain '|' or newline)
        text: String,
    },

    /// Read a GP range and print it in order
    Readrange {
        /// First GP, inclusive
        from: u64,

        /// Last GP, inclusive
        to: u64,
    },

    /// Interactive session (default)
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => lazylog::Config::from_file(path)?.client.unwrap_or_default(),
        None => ClientConfig::default(),
    };
    config.client_id = cli.id;
    if !cli.sequencers.is_empty() {
        config.sequencers = parse_peer_list(&cli.sequencers)?;
    }
    if !cli.shards.is_empty() {
        config.shards = parse_peer_list(&cli.shards)?;
    }
    if cli.append_timeout_ms.is_some() {
        config.append_timeout_ms = cli.append_timeout_ms;
    }
    if config.sequencers.is_empty() || config.shards.is_empty() {
        anyhow::bail!("need --sequencers and --shards (or a config file)");
    }

    let client = LogClient::new(config);

    match cli.command {
        Some(Commands::Append { text }) => do_append(&client, &text).await,
        Some(Commands::Readrange { from, to }) => do_readrange(&client, from, to).await,
        Some(Commands::Repl) | None => repl(&client).await?,
    }

    Ok(())
}

async fn do_append(client: &LogClient, text: &str) {
    match client.append(text).await {
        Ok(record_id) => println!("Append OK record_id={record_id}"),
        Err(e) => {
            tracing::debug!("append failed: {e}");
            println!("Append FAILED");
        }
    }
}

async fn do_readrange(client: &LogClient, from: u64, to: u64) {
    match client.read_range(from, to).await {
        Ok(report) => print_report(&report),
        Err(e) => println!("Readrange FAILED: {e}"),
    }
}

fn print_report(report: &RangeReport) {
    for shard in &report.not_ready {
        println!("Shard {shard} NOT_READY for range");
    }
    for row in &report.rows {
        match row {
            RangeRow::Present {
                pos,
                record_id,
                payload,
            } => println!("{pos} | {record_id} | {payload}"),
            RangeRow::Missing { pos } => println!("{pos} | MISSING"),
        }
    }
}

async fn repl(client: &LogClient) -> anyhow::Result<()> {
    println!("Client interactive. Commands:");
    println!("  append <text>");
    println!("  readrange <from> <to>");
    println!("  quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        if let Some(text) = line.strip_prefix("append ") {
            do_append(client, text).await;
        } else if let Some(args) = line.strip_prefix("readrange ") {
            let mut parts = args.split_whitespace();
            match (
                parts.next().and_then(|f| f.parse::<u64>().ok()),
                parts.next().and_then(|t| t.parse::<u64>().ok()),
            ) {
                (Some(from), Some(to)) => do_readrange(client, from, to).await,
                _ => println!("bad args"),
            }
        } else {
            println!("Unknown command");
        }
    }
    Ok(())
}
