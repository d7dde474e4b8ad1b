//! Configuration for lazylog components

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Role (sequencer, shard or client)
    pub role: NodeRole,

    /// Sequencer-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<SequencerConfig>,

    /// Shard-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardConfig>,

    /// Client-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Sequencer,
    Shard,
    Client,
}

/// Sequencer replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Replica ID (unique within the ensemble)
    pub rep_id: u64,

    /// Bind address for the wire protocol
    pub bind_addr: String,

    /// Peer sequencer addresses (host:port, excluding this replica)
    pub peers: Vec<String>,

    /// Shard addresses in dispatch order (pos % len picks the shard)
    pub shards: Vec<String>,

    /// Coordination service address
    pub coordination: String,

    /// Ordering loop idle period
    #[serde(default = "default_order_period")]
    pub order_period_ms: u64,

    /// Heartbeat interval lower bound
    #[serde(default = "default_hb_min")]
    pub hb_min_ms: u64,

    /// Heartbeat interval upper bound
    #[serde(default = "default_hb_max")]
    pub hb_max_ms: u64,

    /// Follower liveness timeout (observability only)
    #[serde(default = "default_hb_timeout")]
    pub hb_timeout_ms: u64,

    /// Election children polling period
    #[serde(default = "default_election_poll")]
    pub election_poll_ms: u64,

    /// Per-RPC deadline
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

fn default_order_period() -> u64 {
    20
}
fn default_hb_min() -> u64 {
    100
}
fn default_hb_max() -> u64 {
    300
}
fn default_hb_timeout() -> u64 {
    700
}
fn default_election_poll() -> u64 {
    500
}
fn default_rpc_timeout() -> u64 {
    2_000
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            rep_id: 1,
            bind_addr: "0.0.0.0:5001".to_string(),
            peers: vec![],
            shards: vec![],
            coordination: "127.0.0.1:2181".to_string(),
            order_period_ms: default_order_period(),
            hb_min_ms: default_hb_min(),
            hb_max_ms: default_hb_max(),
            hb_timeout_ms: default_hb_timeout(),
            election_poll_ms: default_election_poll(),
            rpc_timeout_ms: default_rpc_timeout(),
        }
    }
}

impl SequencerConfig {
    pub fn order_period(&self) -> Duration {
        Duration::from_millis(self.order_period_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn election_poll(&self) -> Duration {
        Duration::from_millis(self.election_poll_ms)
    }

    pub fn hb_timeout(&self) -> Duration {
        Duration::from_millis(self.hb_timeout_ms)
    }
}

/// Shard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Shard ID
    pub shard_id: u64,

    /// Bind address for the wire protocol
    pub bind_addr: String,

    /// Sequencer addresses queried for stable catch-up
    pub sequencers: Vec<String>,

    /// Per-RPC deadline
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            shard_id: 0,
            bind_addr: "0.0.0.0:6001".to_string(),
            sequencers: vec![],
            rpc_timeout_ms: default_rpc_timeout(),
        }
    }
}

impl ShardConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client ID (part of every record_id this client mints)
    pub client_id: u64,

    /// Sequencer addresses
    pub sequencers: Vec<String>,

    /// Shard addresses
    pub shards: Vec<String>,

    /// Sleep between append rounds while some sequencer has not acked
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Per-RPC deadline
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Overall append deadline; unset means retry forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_timeout_ms: Option<u64>,
}

fn default_retry_delay() -> u64 {
    50
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: 1,
            sequencers: vec![],
            shards: vec![],
            retry_delay_ms: default_retry_delay(),
            rpc_timeout_ms: default_rpc_timeout(),
            append_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn append_timeout(&self) -> Option<Duration> {
        self.append_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::Internal(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        match self.role {
            NodeRole::Sequencer => {
                let seq = self
                    .sequencer
                    .as_ref()
                    .ok_or_else(|| crate::Error::InvalidConfig("sequencer config required".into()))?;
                if seq.shards.is_empty() {
                    return Err(crate::Error::InvalidConfig(
                        "sequencer needs at least one shard".into(),
                    ));
                }
                if seq.hb_min_ms > seq.hb_max_ms {
                    return Err(crate::Error::InvalidConfig(
                        "hb_min_ms must not exceed hb_max_ms".into(),
                    ));
                }
            }
            NodeRole::Shard => {
                let shard = self
                    .shard
                    .as_ref()
                    .ok_or_else(|| crate::Error::InvalidConfig("shard config required".into()))?;
                if shard.sequencers.is_empty() {
                    return Err(crate::Error::InvalidConfig(
                        "shard needs at least one sequencer".into(),
                    ));
                }
            }
            NodeRole::Client => {
                let client = self
                    .client
                    .as_ref()
                    .ok_or_else(|| crate::Error::InvalidConfig("client config required".into()))?;
                if client.sequencers.is_empty() || client.shards.is_empty() {
                    return Err(crate::Error::InvalidConfig(
                        "client needs sequencers and shards".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let seq = SequencerConfig::default();
        assert_eq!(seq.order_period_ms, 20);
        assert_eq!(seq.hb_timeout_ms, 700);
        assert_eq!(seq.election_poll_ms, 500);
        assert_eq!(seq.rpc_timeout_ms, 2_000);

        let client = ClientConfig::default();
        assert_eq!(client.retry_delay_ms, 50);
        assert!(client.append_timeout().is_none());
    }

    #[test]
    fn test_validate_rejects_empty_shards() {
        let config = Config {
            role: NodeRole::Sequencer,
            sequencer: Some(SequencerConfig::default()),
            shard: None,
            client: None,
            log_level: "info".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config {
            role: NodeRole::Shard,
            sequencer: None,
            shard: Some(ShardConfig {
                shard_id: 2,
                bind_addr: "0.0.0.0:6003".into(),
                sequencers: vec!["127.0.0.1:5001".into()],
                rpc_timeout_ms: 1_500,
            }),
            client: None,
            log_level: "debug".into(),
        };
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.role, NodeRole::Shard);
        assert!(loaded.validate().is_ok());
        let shard = loaded.shard.unwrap();
        assert_eq!(shard.shard_id, 2);
        assert_eq!(shard.rpc_timeout_ms, 1_500);
    }

    #[test]
    fn test_missing_timing_fields_use_defaults() {
        let json = r#"{
            "role": "sequencer",
            "sequencer": {
                "rep_id": 3,
                "bind_addr": "0.0.0.0:5003",
                "peers": ["127.0.0.1:5001"],
                "shards": ["127.0.0.1:6001"],
                "coordination": "127.0.0.1:2181"
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let seq = config.sequencer.unwrap();
        assert_eq!(seq.order_period_ms, 20);
        assert_eq!(seq.hb_min_ms, 100);
        assert_eq!(seq.hb_max_ms, 300);
    }
}
