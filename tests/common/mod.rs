//! In-process cluster harness shared by the integration tests

use lazylog::client::{LogClient, RangeReport, RangeRow};
use lazylog::common::wire::{self, Message};
use lazylog::coordination::CoordServer;
use lazylog::sequencer::{SequencerHandle, SequencerServer};
use lazylog::shard::{ShardHandle, ShardServer};
use lazylog::{ClientConfig, SequencerConfig, ShardConfig};
use std::time::Duration;
use tokio::net::TcpListener;

pub const RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Reserve `n` loopback addresses by binding and immediately releasing
/// them, so configs can reference every address before any server is up.
pub async fn reserve_addrs(n: usize) -> Vec<String> {
    let mut listeners = Vec::with_capacity(n);
    for _ in 0..n {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().to_string())
        .collect()
}

/// Start a coordination service on an ephemeral port.
pub async fn start_coord() -> String {
    let server = CoordServer::bind("127.0.0.1:0", Duration::from_secs(30))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.serve());
    addr
}

/// Start a coordination service on a previously reserved address.
pub async fn start_coord_at(addr: &str) {
    let server = CoordServer::bind(addr, Duration::from_secs(30))
        .await
        .unwrap();
    tokio::spawn(server.serve());
}

pub struct Cluster {
    pub coord_addr: String,
    pub sequencer_addrs: Vec<String>,
    pub shard_addrs: Vec<String>,
    pub sequencers: Vec<SequencerHandle>,
    pub shards: Vec<ShardHandle>,
}

impl Cluster {
    /// Boot coordsvc + `n_seq` sequencers + `n_shard` shards with fast
    /// test timings.
    pub async fn start(n_seq: usize, n_shard: usize) -> Cluster {
        let coord_addr = start_coord().await;
        Self::start_with(coord_addr, n_seq, n_shard, None).await
    }

    /// Boot against an existing (or not-yet-started) coordination
    /// address; `dead_shard` leaves that shard's address unbound so every
    /// PUT to it fails.
    pub async fn start_with(
        coord_addr: String,
        n_seq: usize,
        n_shard: usize,
        dead_shard: Option<usize>,
    ) -> Cluster {
        let addrs = reserve_addrs(n_seq + n_shard).await;
        let sequencer_addrs = addrs[..n_seq].to_vec();
        let shard_addrs = addrs[n_seq..].to_vec();

        let mut shards = Vec::new();
        for (i, addr) in shard_addrs.iter().enumerate() {
            if dead_shard == Some(i) {
                continue;
            }
            let server = ShardServer::bind(ShardConfig {
                shard_id: i as u64,
                bind_addr: addr.clone(),
                sequencers: sequencer_addrs.clone(),
                rpc_timeout_ms: RPC_TIMEOUT.as_millis() as u64,
            })
            .await
            .unwrap();
            shards.push(server.handle());
            tokio::spawn(server.serve());
        }

        let mut sequencers = Vec::new();
        for (i, addr) in sequencer_addrs.iter().enumerate() {
            let peers: Vec<String> = sequencer_addrs
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, a)| a.clone())
                .collect();
            let server = SequencerServer::bind(SequencerConfig {
                rep_id: (i + 1) as u64,
                bind_addr: addr.clone(),
                peers,
                shards: shard_addrs.clone(),
                coordination: coord_addr.clone(),
                order_period_ms: 5,
                hb_min_ms: 30,
                hb_max_ms: 60,
                hb_timeout_ms: 200,
                election_poll_ms: 50,
                rpc_timeout_ms: RPC_TIMEOUT.as_millis() as u64,
            })
            .await
            .unwrap();
            sequencers.push(server.handle());
            tokio::spawn(server.serve());
        }

        Cluster {
            coord_addr,
            sequencer_addrs,
            shard_addrs,
            sequencers,
            shards,
        }
    }

    pub fn client(&self, client_id: u64) -> LogClient {
        LogClient::new(ClientConfig {
            client_id,
            sequencers: self.sequencer_addrs.clone(),
            shards: self.shard_addrs.clone(),
            retry_delay_ms: 20,
            rpc_timeout_ms: RPC_TIMEOUT.as_millis() as u64,
            append_timeout_ms: Some(10_000),
        })
    }

    /// Index of the current leader, polling HBQ until one appears.
    pub async fn wait_for_leader(&self) -> usize {
        for _ in 0..200 {
            for (i, addr) in self.sequencer_addrs.iter().enumerate() {
                if let Ok(Message::HbReply {
                    is_leader: true, ..
                }) = wire::call(addr, &Message::Hbq, RPC_TIMEOUT).await
                {
                    return i;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no leader elected within deadline");
    }

    /// HBQ snapshot of one replica.
    pub async fn hbq(&self, index: usize) -> Message {
        wire::call(&self.sequencer_addrs[index], &Message::Hbq, RPC_TIMEOUT)
            .await
            .unwrap()
    }
}

/// Poll a range until every position is present, panicking on deadline.
pub async fn wait_range_complete(
    client: &LogClient,
    from: u64,
    to: u64,
    deadline: Duration,
) -> RangeReport {
    let started = std::time::Instant::now();
    loop {
        let report = client.read_range(from, to).await.unwrap();
        let complete = report
            .rows
            .iter()
            .all(|row| matches!(row, RangeRow::Present { .. }));
        if complete {
            return report;
        }
        if started.elapsed() > deadline {
            panic!("range [{from}, {to}] incomplete after {deadline:?}: {report:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// The (record_id, payload) pairs of a fully present report.
pub fn present_pairs(report: &RangeReport) -> Vec<(String, String)> {
    report
        .rows
        .iter()
        .filter_map(|row| match row {
            RangeRow::Present {
                record_id, payload, ..
            } => Some((record_id.clone(), payload.clone())),
            RangeRow::Missing { .. } => None,
        })
        .collect()
}
