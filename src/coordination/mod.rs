//! Ephemeral-sequential coordination
//!
//! Leader election is delegated to a ZooKeeper-style service: each replica
//! keeps a session open, creates an ephemeral-sequential node under the
//! election path, and the replica owning the numerically smallest node is
//! the leader. This module holds the session client used by the election
//! driver and a minimal compatible service (`CoordServer`) for local
//! clusters and tests.
//!
//! The protocol is line-delimited like the log protocol: `ENSURE|path`,
//! `CREATE_SEQ|parent|prefix`, `CHILDREN|path`, `PING`. A session is a TCP
//! connection; any request refreshes it, and its ephemeral nodes disappear
//! when the connection closes or the session times out.

pub mod client;
pub mod server;

pub use client::CoordSession;
pub use server::CoordServer;

/// Root path created by every sequencer at startup.
pub const ROOT_PATH: &str = "/lazylog";

/// Parent of the ephemeral-sequential election nodes.
pub const ELECTION_PATH: &str = "/lazylog/election";

/// Prefix of election node names; the service appends a 10-digit counter.
pub const ELECTION_PREFIX: &str = "n_";

/// Numeric suffix of an election node name, used for leader ordering.
///
/// Returns `None` for names that do not end in a digit run, which keeps
/// foreign children from ever winning an election.
pub fn sequence_suffix(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
