//! Log client
//!
//! Appends go to every sequencer and the call completes only when all of
//! them have acked, so the record survives any single replica taking over
//! leadership. Range reads fan out to every shard and the results are
//! assembled in GP order with explicit holes.

use crate::common::wire::{self, Message};
use crate::common::{timestamp_now_millis, ClientConfig, Error, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One position of an assembled range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRow {
    Present {
        pos: u64,
        record_id: String,
        payload: String,
    },
    /// No shard returned this position.
    Missing { pos: u64 },
}

/// Assembled result of a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeReport {
    pub rows: Vec<RangeRow>,
    /// Shards that answered NOT_READY for this range.
    pub not_ready: Vec<String>,
}

pub struct LogClient {
    config: ClientConfig,
    local_counter: AtomicU64,
}

impl LogClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            local_counter: AtomicU64::new(0),
        }
    }

    /// Mint `"{client_id}-{epoch_ms}-{local_counter}"`, unique within this
    /// client by the counter alone.
    fn make_record_id(&self) -> String {
        let counter = self.local_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!(
            "{}-{}-{}",
            self.config.client_id,
            timestamp_now_millis(),
            counter
        )
    }

    /// Append `payload`, returning the record id once every sequencer has
    /// acked.
    ///
    /// Delivery is at-least-once: if leadership churns between the acks
    /// and dispatch, the record can surface at more than one GP. Readers
    /// needing exactly-once semantics deduplicate by record id.
    ///
    /// RETRY replies and transient I/O failures are treated identically:
    /// the peer is simply not acked yet and the round repeats after
    /// `retry_delay`. With no `append_timeout` configured this retries
    /// until it succeeds.
    pub async fn append(&self, payload: &str) -> Result<String> {
        if payload.contains('|') || payload.contains('\n') {
            return Err(Error::InvalidPayload);
        }
        let record_id = self.make_record_id();
        let msg = Message::Append {
            record_id: record_id.clone(),
            client_id: self.config.client_id.to_string(),
            payload: payload.to_string(),
        };

        let started = Instant::now();
        let mut acked = vec![false; self.config.sequencers.len()];
        loop {
            for (i, seq) in self.config.sequencers.iter().enumerate() {
                if acked[i] {
                    continue;
                }
                match wire::call(seq, &msg, self.config.rpc_timeout()).await {
                    Ok(Message::Ack) => acked[i] = true,
                    Ok(Message::Retry) => {
                        tracing::debug!("Sequencer {seq} sealed, will retry");
                    }
                    Ok(other) => {
                        tracing::warn!("Sequencer {seq} answered APPEND with {other}");
                    }
                    Err(e) => {
                        tracing::debug!("APPEND to {seq} failed: {e}");
                    }
                }
            }
            if acked.iter().all(|a| *a) {
                return Ok(record_id);
            }
            if let Some(deadline) = self.config.append_timeout() {
                if started.elapsed() > deadline {
                    return Err(Error::Timeout(format!(
                        "append {record_id}: {} of {} acks",
                        acked.iter().filter(|a| **a).count(),
                        acked.len()
                    )));
                }
            }
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Read `[from, to]` from every shard and assemble the union in GP
    /// order; positions no shard returned become [`RangeRow::Missing`].
    pub async fn read_range(&self, from: u64, to: u64) -> Result<RangeReport> {
        let mut found: BTreeMap<u64, (String, String)> = BTreeMap::new();
        let mut not_ready = Vec::new();

        let msg = Message::ReadRange { from, to };
        for shard in &self.config.shards {
            match wire::call(shard, &msg, self.config.rpc_timeout()).await {
                Ok(Message::BatchVal { entries }) => {
                    for e in entries {
                        found.insert(e.pos, (e.record_id, e.payload));
                    }
                }
                Ok(Message::NotReady) => {
                    not_ready.push(shard.clone());
                }
                Ok(other) => {
                    tracing::warn!("Shard {shard} answered READRANGE with {other}");
                }
                Err(e) => {
                    tracing::warn!("READRANGE to {shard} failed: {e}");
                }
            }
        }

        let mut rows = Vec::new();
        if from <= to {
            for pos in from..=to {
                rows.push(match found.remove(&pos) {
                    Some((record_id, payload)) => RangeRow::Present {
                        pos,
                        record_id,
                        payload,
                    },
                    None => RangeRow::Missing { pos },
                });
            }
        }
        Ok(RangeReport { rows, not_ready })
    }
}
