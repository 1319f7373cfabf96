mod client;
mod message;
mod server;

pub use client::ClientReplica;
pub use message::{ObjectPayload, ReliableMessage, SnapshotPayload, UnreliableMessage};
pub use server::{ServerOutput, ServerReplicator};
