//! Sequencer server
//!
//! Accept loop plus the background tasks of one replica: the election
//! driver, the role task that starts leader loops on promotion, and the
//! follower liveness monitor. Each accepted connection carries one
//! request and one reply.

use crate::common::wire::{self, Message};
use crate::common::{Error, Result, SequencerConfig};
use crate::sequencer::election::{ElectionDriver, LeaderEvent};
use crate::sequencer::leader;
use crate::sequencer::node::SequencerNode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

pub struct SequencerServer {
    listener: TcpListener,
    node: Arc<SequencerNode>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Handle for inspecting and stopping a running server; used by the
/// binaries' Ctrl-C path and by tests.
#[derive(Clone)]
pub struct SequencerHandle {
    node: Arc<SequencerNode>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SequencerHandle {
    pub fn node(&self) -> &Arc<SequencerNode> {
        &self.node
    }

    /// Stop the server: demote, seal, close the coordination session.
    pub fn shutdown(&self) {
        self.node.set_leader(false);
        let _ = self.shutdown.send(true);
    }
}

impl SequencerServer {
    /// Bind the wire listener; `bind_addr` may use port 0.
    pub async fn bind(config: SequencerConfig) -> Result<Self> {
        if config.shards.is_empty() {
            return Err(Error::InvalidConfig(
                "sequencer needs at least one shard".into(),
            ));
        }
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let node = Arc::new(SequencerNode::new(config));
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

    pub fn handle(&self) -> SequencerHandle {
        SequencerHandle {
            node: self.node.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run the replica until shutdown.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        let node = self.node;
        tracing::info!("Starting sequencer replica {}", node.rep_id);
        tracing::info!("  Wire API: {addr}");
        tracing::info!("  Peers: {:?}", node.config.peers);
        tracing::info!("  Shards: {:?}", node.config.shards);
        tracing::info!("  Coordination: {}", node.config.coordination);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let driver = ElectionDriver::new(node.clone(), event_tx, self.shutdown.subscribe());
        tokio::spawn(driver.run());
        tokio::spawn(run_role_task(node.clone(), event_rx));
        tokio::spawn(run_liveness_monitor(
            node.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, _) = accepted?;
                    let node = node.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(node, stream).await {
                            tracing::debug!("Connection handler: {e}");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(
                            "Sequencer replica {} shutting down: {:?}",
                            node.rep_id,
                            node.metrics.snapshot()
                        );
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Start the leader loops on promotion; they stop themselves on the next
/// step-down because they re-check `is_leader` every iteration.
async fn run_role_task(
    node: Arc<SequencerNode>,
    mut events: mpsc::UnboundedReceiver<LeaderEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LeaderEvent::BecomeLeader { view } => {
                tracing::info!("Replica {} leads view {view}", node.rep_id);
                tokio::spawn(leader::run_ordering_loop(node.clone()));
                tokio::spawn(leader::run_heartbeat_loop(node.clone()));
            }
            LeaderEvent::StepDown => {
                tracing::info!(
                    "Replica {} sealed (pending {} buffered appends)",
                    node.rep_id,
                    node.pending_len()
                );
            }
        }
    }
}

/// Warn when the leader's heartbeat goes quiet. Observability only; the
/// coordination service stays authoritative for leadership.
async fn run_liveness_monitor(node: Arc<SequencerNode>, mut shutdown: watch::Receiver<bool>) {
    let timeout = node.config.hb_timeout();
    let mut warned = false;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(timeout / 2) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }
        if node.is_leader() {
            warned = false;
            continue;
        }
        let age = node.hb_age();
        if age > timeout {
            if !warned {
                tracing::warn!(
                    "No leader heartbeat for {age:?} on replica {}",
                    node.rep_id
                );
                warned = true;
            }
        } else {
            warned = false;
        }
    }
}

async fn handle_connection(node: Arc<SequencerNode>, mut stream: TcpStream) -> Result<()> {
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

    let reply = dispatch(&node, request);
    tokio::time::timeout(deadline, wire::write_frame(&mut write_half, &reply))
        .await
        .map_err(|_| Error::Timeout("reply write".into()))??;
    Ok(())
}

fn dispatch(node: &SequencerNode, request: Message) -> Message {
    match request {
        Message::Append {
            record_id, payload, ..
        } => node.handle_append(record_id, payload),
        Message::Hb {
            view,
            rep_id,
            last_ordered,
        } => node.handle_hb(view, rep_id, last_ordered),
        Message::Hbq => node.handle_hbq(),
        Message::StableUpdate { stable } => node.handle_stable_update(stable),
        Message::Gc { upto } => node.handle_gc(upto),
        other => {
            tracing::debug!("Unsupported request {other} on sequencer");
            Message::Err {
                reason: Some("UNKNOWN".into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn start_replica() -> (String, SequencerHandle) {
        let server = SequencerServer::bind(SequencerConfig {
            rep_id: 7,
            bind_addr: "127.0.0.1:0".into(),
            peers: vec![],
            shards: vec!["127.0.0.1:1".into()],
            // Coordination is not running; the replica stays sealed.
            coordination: "127.0.0.1:1".into(),
            rpc_timeout_ms: 500,
            ..SequencerConfig::default()
        })
        .await
        .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let handle = server.handle();
        tokio::spawn(server.serve());
        (addr, handle)
    }

    #[tokio::test]
    async fn test_sealed_replica_rejects_appends() {
        let (addr, _handle) = start_replica().await;
        let reply = wire::call(
            &addr,
            &Message::Append {
                record_id: "r1".into(),
                client_id: "1".into(),
                payload: "p".into(),
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(reply, Message::Retry);
    }

    #[tokio::test]
    async fn test_hbq_reports_follower_state() {
        let (addr, _handle) = start_replica().await;
        let reply = wire::call(&addr, &Message::Hbq, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            reply,
            Message::HbReply {
                view: 1,
                is_leader: false,
                last_ordered: 0,
                stable: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_stable_update_and_gc() {
        let (addr, handle) = start_replica().await;
        let reply = wire::call(
            &addr,
            &Message::StableUpdate { stable: 12 },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(reply, Message::StableAck);
        assert_eq!(handle.node().stable(), 12);
        assert_eq!(handle.node().last_ordered(), 12);

        let reply = wire::call(&addr, &Message::Gc { upto: 5 }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Message::GcOk);
    }

    #[tokio::test]
    async fn test_unknown_request_gets_err_unknown() {
        let (addr, _handle) = start_replica().await;
        let err = wire::call(&addr, &Message::PutOk, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote(Some(r)) if r == "UNKNOWN"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, handle) = start_replica().await;
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = wire::call(&addr, &Message::Hbq, Duration::from_millis(300)).await;
        assert!(result.is_err());
    }
}
