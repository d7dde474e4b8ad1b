//! Election driver
//!
//! Maps coordination-service state onto the replica's `is_leader`/`sealed`
//! flags. The replica owning the ephemeral-sequential child with the
//! numerically smallest suffix leads; followers buffer appends while a
//! leader candidate exists and seal when the cluster has none. Only this
//! driver flips the flags, and promotion recovers the GP high-water mark
//! before the flip, so consumers on the transition channel may start
//! ordering immediately.

use crate::common::Result;
use crate::coordination::{
    sequence_suffix, CoordSession, ELECTION_PATH, ELECTION_PREFIX, ROOT_PATH,
};
use crate::sequencer::leader;
use crate::sequencer::node::SequencerNode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Role transitions delivered to the server's role task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderEvent {
    BecomeLeader { view: u64 },
    StepDown,
}

pub struct ElectionDriver {
    node: Arc<SequencerNode>,
    events: mpsc::UnboundedSender<LeaderEvent>,
    shutdown: watch::Receiver<bool>,
}

impl ElectionDriver {
    pub fn new(
        node: Arc<SequencerNode>,
        events: mpsc::UnboundedSender<LeaderEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            node,
            events,
            shutdown,
        }
    }

    /// Participate in the election until shutdown. Session loss demotes
    /// and re-registers under a fresh child name.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.session_round().await {
                Ok(()) => break, // shutdown observed inside the round
                Err(e) => {
                    tracing::warn!("Coordination session lost: {e}");
                    self.demote_if_leader();
                    if self.sleep_or_shutdown(Duration::from_secs(1)).await {
                        break;
                    }
                }
            }
        }
        self.demote_if_leader();
        tracing::info!("Election driver stopped");
    }

    /// One session: register, then poll children until an error or
    /// shutdown. Returns Ok only on shutdown.
    async fn session_round(&mut self) -> Result<()> {
        let deadline = self.node.config.rpc_timeout();
        let mut session = CoordSession::connect(&self.node.config.coordination, deadline).await?;
        session.ensure(ROOT_PATH).await?;
        session.ensure(ELECTION_PATH).await?;
        let my_name = session
            .create_sequential(ELECTION_PATH, ELECTION_PREFIX)
            .await?;
        tracing::info!("Registered election node {my_name}");

        loop {
            let children = session.children(ELECTION_PATH).await?;
            let smallest = children
                .iter()
                .filter_map(|name| sequence_suffix(name).map(|seq| (seq, name.clone())))
                .min();
            let am_smallest = smallest
                .as_ref()
                .map(|(_, name)| *name == my_name)
                .unwrap_or(false);

            if am_smallest && !self.node.is_leader() {
                let view = leader::promote(&self.node).await;
                tracing::info!("BECOME_LEADER (view {view}, node {my_name})");
                let _ = self.events.send(LeaderEvent::BecomeLeader { view });
            } else if !am_smallest && self.node.is_leader() {
                tracing::info!("STEP_DOWN (node {my_name})");
                self.node.set_leader(false);
                let _ = self.events.send(LeaderEvent::StepDown);
            } else if !am_smallest {
                // A follower buffers appends as long as somebody holds the
                // smallest node: the all-ack append protocol needs every
                // replica, and whatever a follower buffers is dispatched
                // on promotion. Without a leader candidate it rejects.
                self.node.set_sealed(smallest.is_none());
            }

            if self
                .sleep_or_shutdown(self.node.config.election_poll())
                .await
            {
                return Ok(());
            }
        }
    }

    fn demote_if_leader(&self) {
        if self.node.is_leader() {
            tracing::info!("STEP_DOWN (coordination unavailable)");
            self.node.set_leader(false);
            let _ = self.events.send(LeaderEvent::StepDown);
        }
    }

    /// Sleep for `period`; true when shutdown fired instead.
    async fn sleep_or_shutdown(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => false,
            changed = self.shutdown.changed() => {
                changed.is_err() || *self.shutdown.borrow()
            }
        }
    }
}
