//! Leader-side loops: ordering, stable dissemination, heartbeats
//!
//! Both loops run only while `is_leader` holds and re-check it every
//! iteration, so a STEP_DOWN stops GP assignment before the next batch.

use crate::common::wire::{self, Message};
use crate::common::jitter_ms;
use crate::sequencer::node::SequencerNode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// What promotion learned from the surviving replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredState {
    pub view: u64,
    pub last_ordered: u64,
    pub stable: u64,
}

/// Query every peer's HBQ and compute the ordering high-water mark.
///
/// The returned view is one past the largest view seen, and
/// `last_ordered` is the largest fold any replica reports, so installing
/// this state guarantees the new view never re-assigns a GP.
pub async fn recover_from_peers(node: &Arc<SequencerNode>) -> RecoveredState {
    let deadline = node.config.rpc_timeout();
    let mut handles = Vec::with_capacity(node.config.peers.len());
    for peer in &node.config.peers {
        let peer = peer.clone();
        handles.push(tokio::spawn(async move {
            wire::call(&peer, &Message::Hbq, deadline).await
        }));
    }

    let mut state = RecoveredState {
        view: node.view(),
        last_ordered: node.last_ordered(),
        stable: node.stable(),
    };
    for handle in handles {
        match handle.await {
            Ok(Ok(Message::HbReply {
                view,
                last_ordered,
                stable,
                ..
            })) => {
                state.view = state.view.max(view);
                state.last_ordered = state.last_ordered.max(last_ordered);
                state.stable = state.stable.max(stable);
            }
            Ok(Ok(other)) => {
                tracing::warn!("Peer answered HBQ with {other} during promotion");
            }
            Ok(Err(e)) => {
                tracing::warn!("Peer unreachable during promotion: {e}");
            }
            Err(e) => {
                tracing::warn!("Promotion query task failed: {e}");
            }
        }
    }
    state.view += 1;
    state
}

/// The ordering loop: batch, assign, dispatch, advance, disseminate.
pub async fn run_ordering_loop(node: Arc<SequencerNode>) {
    tracing::info!(
        "Ordering loop started (view {}, next_gp {})",
        node.view(),
        node.next_gp()
    );
    while node.is_leader() {
        let batch = node.take_batch();
        if batch.is_empty() {
            tokio::time::sleep(node.config.order_period()).await;
            continue;
        }

        // A step-down between snapshot and assignment must not cost the
        // batch its records or assign GPs from a dead view.
        if !node.is_leader() {
            node.requeue_batch(batch);
            break;
        }

        node.metrics.batches_ordered.fetch_add(1, Ordering::Relaxed);
        let assigned: Vec<(u64, String)> = batch
            .into_iter()
            .map(|rid| (node.allocate_gp(), rid))
            .collect();

        for (pos, rid) in assigned {
            let payload = node.take_payload(&rid);
            let shard_count = node.config.shards.len() as u64;
            let shard = &node.config.shards[(pos % shard_count) as usize];
            let put = Message::Put {
                pos,
                record_id: rid,
                payload,
            };
            match wire::call(shard, &put, node.config.rpc_timeout()).await {
                Ok(Message::PutOk) => {
                    node.mark_durable(pos);
                    node.metrics
                        .records_dispatched
                        .fetch_add(1, Ordering::Relaxed);
                }
                Ok(other) => {
                    node.metrics
                        .dispatch_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Shard {shard} answered PUT for {pos} with {other}");
                }
                Err(e) => {
                    node.metrics
                        .dispatch_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Failed to deliver {pos} to shard {shard}: {e}");
                }
            }
        }

        if let Some(new_last) = node.advance_contiguous() {
            if new_last > node.stable() {
                broadcast_stable(&node, new_last).await;
            }
        }
    }
    tracing::info!("Ordering loop ended");
}

/// Disseminate a new stable GP to peers, then shards, acks best-effort.
///
/// The loop never blocks on peer acks; a peer that missed the update
/// catches up through HB or a shard's HBQ during a read.
pub async fn broadcast_stable(node: &Arc<SequencerNode>, stable: u64) {
    let update = Message::StableUpdate { stable };
    for peer in &node.config.peers {
        match wire::call(peer, &update, node.config.rpc_timeout()).await {
            Ok(Message::StableAck) => {}
            Ok(other) => tracing::warn!("Peer {peer} answered STABLE_UPDATE with {other}"),
            Err(e) => tracing::warn!("STABLE_UPDATE to {peer} failed: {e}"),
        }
    }
    node.raise_stable(stable);
    node.metrics
        .stable_broadcasts
        .fetch_add(1, Ordering::Relaxed);

    let update = Message::UpdateStable { upto: stable };
    for shard in &node.config.shards {
        match wire::call(shard, &update, node.config.rpc_timeout()).await {
            Ok(Message::Ok) => {}
            Ok(other) => tracing::warn!("Shard {shard} answered UPDATESTABLE with {other}"),
            Err(e) => tracing::warn!("UPDATESTABLE to {shard} failed: {e}"),
        }
    }
    tracing::info!("Stable GP advanced to {stable}");
}

/// Emit `HB|view|rep_id|last_ordered` to every peer with jittered pacing.
pub async fn run_heartbeat_loop(node: Arc<SequencerNode>) {
    while node.is_leader() {
        let hb = Message::Hb {
            view: node.view(),
            rep_id: node.rep_id,
            last_ordered: node.last_ordered(),
        };
        for peer in &node.config.peers {
            if let Err(e) = wire::call(peer, &hb, node.config.rpc_timeout()).await {
                tracing::debug!("HB to {peer} failed: {e}");
            }
        }
        tokio::time::sleep(jitter_ms(node.config.hb_min_ms, node.config.hb_max_ms)).await;
    }
}

/// Promote this replica: recover the high-water mark, install the new
/// view, then unseal. The leader loops start only after this returns, so
/// no GP is ever assigned from a stale counter. Unreachable peers simply
/// do not contribute to the recovered state.
pub async fn promote(node: &Arc<SequencerNode>) -> u64 {
    let recovered = recover_from_peers(node).await;
    node.install_view(recovered.view, recovered.last_ordered, recovered.stable);
    node.set_leader(true);
    recovered.view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::wire::{read_frame, write_frame};
    use crate::common::SequencerConfig;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    /// One-request fake replica that answers HBQ with a fixed reply.
    async fn fake_replica(reply: Message) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let reply = reply.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.split();
                    let mut reader = BufReader::new(read_half);
                    if read_frame(&mut reader).await.is_ok() {
                        let _ = write_frame(&mut write_half, &reply).await;
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_recovery_takes_high_water_mark() {
        let peer_a = fake_replica(Message::HbReply {
            view: 2,
            is_leader: false,
            last_ordered: 14,
            stable: 14,
        })
        .await;
        let peer_b = fake_replica(Message::HbReply {
            view: 3,
            is_leader: false,
            last_ordered: 9,
            stable: 7,
        })
        .await;

        let node = Arc::new(SequencerNode::new(SequencerConfig {
            rep_id: 1,
            peers: vec![peer_a, peer_b],
            shards: vec!["127.0.0.1:1".into()],
            rpc_timeout_ms: 500,
            ..SequencerConfig::default()
        }));

        let recovered = recover_from_peers(&node).await;
        assert_eq!(recovered.view, 4);
        assert_eq!(recovered.last_ordered, 14);
        assert_eq!(recovered.stable, 14);

        node.install_view(recovered.view, recovered.last_ordered, recovered.stable);
        assert_eq!(node.allocate_gp(), 15);
    }

    #[tokio::test]
    async fn test_recovery_survives_dead_peers() {
        let node = Arc::new(SequencerNode::new(SequencerConfig {
            rep_id: 1,
            // Nothing listens here; recovery falls back to local state.
            peers: vec!["127.0.0.1:1".into()],
            shards: vec!["127.0.0.1:1".into()],
            rpc_timeout_ms: 200,
            ..SequencerConfig::default()
        }));
        node.handle_stable_update(6);

        let recovered = recover_from_peers(&node).await;
        assert_eq!(recovered.view, 2);
        assert_eq!(recovered.last_ordered, 6);
        assert_eq!(recovered.stable, 6);
    }
}
