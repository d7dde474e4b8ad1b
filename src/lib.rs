//! # lazylog
//!
//! A distributed, totally-ordered append-only log with:
//! - A replicated sequencer ensemble that orders appends and assigns
//!   global positions (GPs)
//! - GP-indexed shards that store records and serve range reads
//! - Leader election through an ephemeral-sequential coordination service
//! - A thin client that appends to every sequencer and assembles ranges
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │      Coordination service    │
//!                │  (ephemeral-sequential nodes │
//!                │   under /lazylog/election)   │
//!                └──────────────┬───────────────┘
//!                               │ session + children polling
//!          ┌────────────────────┼────────────────────┐
//!          │                    │                    │
//!    ┌─────▼──────┐      ┌──────▼─────┐       ┌──────▼─────┐
//!    │ Sequencer 1│◄────►│ Sequencer 2│◄─────►│ Sequencer 3│
//!    │  (leader)  │  HB  │ (follower) │  HB   │ (follower) │
//!    └─────┬──────┘      └────────────┘       └────────────┘
//!          │ PUT pos%N / UPDATESTABLE
//!    ┌─────┼──────────────────┬────────────────────┐
//!    │     │                  │                    │
//! ┌──▼─────▼──┐        ┌──────▼─────┐       ┌──────▼─────┐
//! │  Shard 0  │        │  Shard 1   │       │  Shard 2   │
//! └───────────┘        └────────────┘       └────────────┘
//! ```
//!
//! Clients send `APPEND` to every sequencer and wait until all of them ACK;
//! the leader batches pending records, assigns dense GPs, dispatches each
//! record to shard `pos % N`, folds the contiguous durable prefix into
//! `last_ordered_gp`, and disseminates `stable_gp` to peers and shards.
//! Range reads go to every shard; a shard behind the requested range first
//! catches its `stable_gp` up from the sequencers.
//!
//! ## Usage
//!
//! ### Start the coordination service
//! ```bash
//! lazylog-coordsvc serve --bind 0.0.0.0:2181
//! ```
//!
//! ### Start a sequencer
//! ```bash
//! lazylog-sequencer serve \
//!   --id 1 \
//!   --bind 0.0.0.0:5001 \
//!   --peers 127.0.0.1:5002,127.0.0.1:5003 \
//!   --shards 127.0.0.1:6001,127.0.0.1:6002,127.0.0.1:6003 \
//!   --coordination 127.0.0.1:2181
//! ```
//!
//! ### Start a shard
//! ```bash
//! lazylog-shard serve \
//!   --id 0 \
//!   --bind 0.0.0.0:6001 \
//!   --sequencers 127.0.0.1:5001,127.0.0.1:5002,127.0.0.1:5003
//! ```
//!
//! ### Use the client REPL
//! ```bash
//! lazylog --id 1 \
//!   --sequencers 127.0.0.1:5001,127.0.0.1:5002,127.0.0.1:5003 \
//!   --shards 127.0.0.1:6001,127.0.0.1:6002,127.0.0.1:6003
//! > append hello
//! Append OK record_id=1-1722600000000-1
//! > readrange 1 1
//! 1 | 1-1722600000000-1 | hello
//! ```

pub mod client;
pub mod common;
pub mod coordination;
pub mod sequencer;
pub mod shard;

// Re-export commonly used types
pub use client::LogClient;
pub use common::{ClientConfig, Config, Error, Result, SequencerConfig, ShardConfig};
pub use sequencer::SequencerServer;
pub use shard::ShardServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
