//! GP-indexed record shards

pub mod server;
pub mod store;

pub use server::{ShardHandle, ShardNode, ShardServer};
pub use store::{ShardStore, StoredRecord};
