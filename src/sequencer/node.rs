//! Sequencer replica state
//!
//! All replica state lives in one [`SequencerNode`] value shared by the
//! connection handlers, the election driver and the leader loops. Atomics
//! are single-writer in practice (the leader for `next_gp`, the election
//! driver for `is_leader`/`sealed`) and read without locks everywhere else.

use crate::common::wire::Message;
use crate::common::{SequencerConfig, SequencerMetrics};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Default)]
struct Pending {
    /// Insertion-ordered record ids waiting for GP assignment.
    order: Vec<String>,
    /// record_id → payload; keys match `order` exactly.
    payload: HashMap<String, String>,
}

pub struct SequencerNode {
    pub rep_id: u64,
    pub config: SequencerConfig,
    pub metrics: SequencerMetrics,

    view_id: AtomicU64,
    is_leader: AtomicBool,
    sealed: AtomicBool,
    next_gp: AtomicU64,
    last_ordered_gp: AtomicU64,
    stable_gp: AtomicU64,

    pending: Mutex<Pending>,
    /// GPs acked by shards but not yet folded into `last_ordered_gp`.
    durable: Mutex<BTreeSet<u64>>,
    last_hb_recv: Mutex<Instant>,
}

fn raise(atomic: &AtomicU64, value: u64) {
    atomic.fetch_max(value, Ordering::AcqRel);
}

impl SequencerNode {
    /// A fresh replica: sealed follower in view 1, next GP 1.
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            rep_id: config.rep_id,
            view_id: AtomicU64::new(1),
            is_leader: AtomicBool::new(false),
            sealed: AtomicBool::new(true),
            next_gp: AtomicU64::new(1),
            last_ordered_gp: AtomicU64::new(0),
            stable_gp: AtomicU64::new(0),
            pending: Mutex::new(Pending::default()),
            durable: Mutex::new(BTreeSet::new()),
            last_hb_recv: Mutex::new(Instant::now()),
            metrics: SequencerMetrics::default(),
            config,
        }
    }

    // === State reads ===

    pub fn view(&self) -> u64 {
        self.view_id.load(Ordering::Acquire)
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    pub fn sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn last_ordered(&self) -> u64 {
        self.last_ordered_gp.load(Ordering::Acquire)
    }

    pub fn stable(&self) -> u64 {
        self.stable_gp.load(Ordering::Acquire)
    }

    pub fn next_gp(&self) -> u64 {
        self.next_gp.load(Ordering::Acquire)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().order.len()
    }

    /// Time since the last leader heartbeat arrived.
    pub fn hb_age(&self) -> std::time::Duration {
        self.last_hb_recv.lock().unwrap().elapsed()
    }

    // === Role transitions (election driver only) ===

    /// Promotion unseals; demotion seals until the driver observes who
    /// leads now.
    pub fn set_leader(&self, leader: bool) {
        self.is_leader.store(leader, Ordering::Release);
        self.sealed.store(!leader, Ordering::Release);
    }

    /// Follower-side seal control: a follower buffers appends while some
    /// replica leads, and rejects them while the cluster has no leader.
    pub fn set_sealed(&self, sealed: bool) {
        self.sealed.store(sealed, Ordering::Release);
    }

    /// Install recovered ordering state before the first assignment of a
    /// new view: `next_gp` restarts past every GP any replica has folded.
    pub fn install_view(&self, view: u64, recovered_last: u64, recovered_stable: u64) {
        raise(&self.view_id, view);
        raise(&self.last_ordered_gp, recovered_last);
        raise(&self.stable_gp, recovered_stable.min(recovered_last));
        self.next_gp
            .store(self.last_ordered() + 1, Ordering::Release);
    }

    // === Request handlers ===

    pub fn handle_append(&self, record_id: String, payload: String) -> Message {
        if self.sealed() {
            self.metrics
                .appends_rejected
                .fetch_add(1, Ordering::Relaxed);
            return Message::Retry;
        }
        let mut pending = self.pending.lock().unwrap();
        // A re-sent record id replaces its payload without taking a second
        // slot in the order, so one append gets at most one GP per view.
        if !pending.payload.contains_key(&record_id) {
            pending.order.push(record_id.clone());
        }
        pending.payload.insert(record_id, payload);
        drop(pending);
        self.metrics
            .appends_admitted
            .fetch_add(1, Ordering::Relaxed);
        Message::Ack
    }

    pub fn handle_hb(&self, view: u64, _rep_id: u64, last_ordered: u64) -> Message {
        raise(&self.view_id, view);
        raise(&self.last_ordered_gp, last_ordered);
        *self.last_hb_recv.lock().unwrap() = Instant::now();
        Message::HbAck
    }

    pub fn handle_hbq(&self) -> Message {
        Message::HbReply {
            view: self.view(),
            is_leader: self.is_leader(),
            last_ordered: self.last_ordered(),
            stable: self.stable(),
        }
    }

    pub fn handle_stable_update(&self, stable: u64) -> Message {
        raise(&self.last_ordered_gp, stable);
        raise(&self.stable_gp, stable);
        Message::StableAck
    }

    pub fn handle_gc(&self, upto: u64) -> Message {
        tracing::debug!("GC up to {upto} requested (reserved, no-op)");
        Message::GcOk
    }

    // === Leader-side operations ===

    /// Snapshot and clear the pending order; payloads stay behind until
    /// each record is dispatched.
    pub fn take_batch(&self) -> Vec<String> {
        std::mem::take(&mut self.pending.lock().unwrap().order)
    }

    /// Put a snapshotted batch back at the front, keeping insertion order.
    pub fn requeue_batch(&self, batch: Vec<String>) {
        let mut pending = self.pending.lock().unwrap();
        let tail = std::mem::replace(&mut pending.order, batch);
        pending.order.extend(tail);
    }

    /// Remove and return a record's payload; empty when a race got there
    /// first.
    pub fn take_payload(&self, record_id: &str) -> String {
        self.pending
            .lock()
            .unwrap()
            .payload
            .remove(record_id)
            .unwrap_or_default()
    }

    pub fn allocate_gp(&self) -> u64 {
        self.next_gp.fetch_add(1, Ordering::AcqRel)
    }

    pub fn mark_durable(&self, pos: u64) {
        self.durable.lock().unwrap().insert(pos);
    }

    /// Fold the unbroken prefix of durable positions into
    /// `last_ordered_gp`; returns the new value when it moved.
    pub fn advance_contiguous(&self) -> Option<u64> {
        let mut durable = self.durable.lock().unwrap();
        let start = self.last_ordered();
        let mut cur = start;
        while durable.contains(&(cur + 1)) {
            cur += 1;
        }
        if cur == start {
            return None;
        }
        raise(&self.last_ordered_gp, cur);
        let rest = durable.split_off(&(cur + 1));
        *durable = rest;
        Some(cur)
    }

    /// Monotonic raise after dissemination.
    pub fn raise_stable(&self, stable: u64) {
        raise(&self.stable_gp, stable);
    }
}
