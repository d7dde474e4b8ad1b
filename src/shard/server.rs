//! Shard server
//!
//! Stores leader PUTs, tracks the stable GP, and serves range reads. A
//! read past the local stable point first catches up by querying the
//! sequencers' HBQ, preferring the leader's answer.

use crate::common::wire::{self, Entry, Message};
use crate::common::{Error, Result, ShardConfig, ShardMetrics};
use crate::shard::store::ShardStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// All state of one shard.
pub struct ShardNode {
    pub shard_id: u64,
    pub config: ShardConfig,
    pub metrics: ShardMetrics,
    store: Mutex<ShardStore>,
    stable_gp: AtomicU64,
}

impl ShardNode {
    pub fn new(config: ShardConfig) -> Self {
        Self {
            shard_id: config.shard_id,
            store: Mutex::new(ShardStore::new()),
            stable_gp: AtomicU64::new(0),
            metrics: ShardMetrics::default(),
            config,
        }
    }

    pub fn stable(&self) -> u64 {
        self.stable_gp.load(Ordering::Acquire)
    }

    pub fn record_count(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn handle_put(&self, pos: u64, record_id: String, payload: String) -> Message {
        self.store.lock().unwrap().put(pos, record_id, payload);
        self.metrics.puts_stored.fetch_add(1, Ordering::Relaxed);
        Message::PutOk
    }

    pub fn handle_update_stable(&self, upto: u64) -> Message {
        self.stable_gp.fetch_max(upto, Ordering::AcqRel);
        Message::Ok
    }

    /// Serve `[from, to]` if the range is stable, catching up from the
    /// sequencers first when it is not.
    pub async fn handle_read_range(&self, from: u64, to: u64) -> Message {
        if self.stable() < to {
            self.catch_up_stable(to).await;
        }
        if self.stable() < to {
            self.metrics
                .ranges_not_ready
                .fetch_add(1, Ordering::Relaxed);
            return Message::NotReady;
        }

        let entries: Vec<Entry> = self
            .store
            .lock()
            .unwrap()
            .range(from, to)
            .into_iter()
            .map(|(pos, rec)| Entry {
                pos,
                record_id: rec.record_id,
                payload: rec.payload,
            })
            .collect();
        self.metrics.ranges_served.fetch_add(1, Ordering::Relaxed);
        Message::BatchVal { entries }
    }

    /// Query every sequencer's HBQ for a fresher stable GP. The leader's
    /// answer wins immediately; otherwise the maximum seen is adopted.
    async fn catch_up_stable(&self, want: u64) {
        self.metrics.catchup_queries.fetch_add(1, Ordering::Relaxed);
        let mut best = self.stable();
        for seq in &self.config.sequencers {
            match wire::call(seq, &Message::Hbq, self.config.rpc_timeout()).await {
                Ok(Message::HbReply {
                    is_leader, stable, ..
                }) => {
                    best = best.max(stable);
                    if is_leader {
                        break;
                    }
                }
                Ok(other) => {
                    tracing::warn!("Sequencer {seq} answered HBQ with {other}");
                }
                Err(e) => {
                    tracing::debug!("HBQ to {seq} failed: {e}");
                }
            }
        }
        self.stable_gp.fetch_max(best, Ordering::AcqRel);
        if best < want {
            tracing::debug!(
                "Shard {} still behind after catch-up (stable {best}, want {want})",
                self.shard_id
            );
        }
    }
}

pub struct ShardServer {
    listener: TcpListener,
    node: Arc<ShardNode>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Handle for inspecting and stopping a running shard.
#[derive(Clone)]
pub struct ShardHandle {
    node: Arc<ShardNode>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ShardHandle {
    pub fn node(&self) -> &Arc<ShardNode> {
        &self.node
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl ShardServer {
    /// Bind the wire listener; `bind_addr` may use port 0.
    pub async fn bind(config: ShardConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let node = Arc::new(ShardNode::new(config));
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            node,
            shutdown: Arc::new(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ShardHandle {
        ShardHandle {
            node: self.node.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run the shard until shutdown.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("Starting shard {}", self.node.shard_id);
        tracing::info!("  Wire API: {addr}");
        tracing::info!("  Sequencers: {:?}", self.node.config.sequencers);

        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, _) = accepted?;
                    let node = self.node.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(node, stream).await {
                            tracing::debug!("Connection handler: {e}");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(
                            "Shard {} shutting down: {:?}",
                            self.node.shard_id,
                            self.node.metrics.snapshot()
                        );
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(node: Arc<ShardNode>, mut stream: TcpStream) -> Result<()> {
    let deadline = node.config.rpc_timeout();
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let request = match tokio::time::timeout(deadline, wire::read_frame(&mut reader)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(Error::UnknownTag(tag))) => {
            tracing::debug!("Unknown tag {tag:?}");
            let reply = Message::Err {
                reason: Some("UNKNOWN".into()),
            };
            wire::write_frame(&mut write_half, &reply).await?;
            return Ok(());
        }
        Ok(Err(Error::Protocol(e))) => {
            tracing::debug!("Malformed frame: {e}");
            wire::write_frame(&mut write_half, &Message::Err { reason: None }).await?;
            return Ok(());
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(Error::Timeout("request read".into())),
    };

    let reply = match request {
        Message::Put {
            pos,
            record_id,
            payload,
        } => node.handle_put(pos, record_id, payload),
        Message::UpdateStable { upto } => node.handle_update_stable(upto),
        Message::ReadRange { from, to } => node.handle_read_range(from, to).await,
        other => {
            tracing::debug!("Unsupported request {other} on shard");
            Message::Err {
                reason: Some("UNKNOWN".into()),
            }
        }
    };
    tokio::time::timeout(deadline, wire::write_frame(&mut write_half, &reply))
        .await
        .map_err(|_| Error::Timeout("reply write".into()))??;
    Ok(())
}
