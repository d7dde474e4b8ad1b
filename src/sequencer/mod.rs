//! The sequencer ensemble: replica state, leader loops, election

pub mod election;
pub mod leader;
pub mod node;
pub mod server;

pub use election::{ElectionDriver, LeaderEvent};
pub use node::SequencerNode;
pub use server::{SequencerHandle, SequencerServer};
