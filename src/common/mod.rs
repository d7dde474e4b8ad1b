//! Common utilities and types shared across lazylog

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;
pub mod wire;

pub use config::{ClientConfig, Config, NodeRole, SequencerConfig, ShardConfig};
pub use error::{Error, Result};
pub use metrics::{SequencerMetrics, ShardMetrics};
pub use utils::{jitter_ms, parse_peer_list, timestamp_now_millis, validate_peer};
pub use wire::{Entry, Message};
