//! Membership & Failure Detection
//!
//! Heartbeat gossip over the internal HTTP API. Every node periodically
//! pushes its member table to a couple of random peers; receivers merge the
//! view using heartbeat counters as the authority. A timeout-driven detector
//! classifies silent peers as suspected and then down.
//!
//! ## Core Mechanisms
//! - **Emission**: every 500 ms the node bumps its own heartbeat and gossips
//!   its full member table to up to two random not-down peers.
//! - **Failure Detection**: a 1 s sweep compares each peer's last-seen
//!   timestamp against the suspicion (3 s) and failure (6 s) windows.
//! - **Merge Rules**: heartbeats are monotone, so a strictly higher counter
//!   wins; second-hand "down" reports only downgrade to suspected. A node
//!   declares a peer down on its own evidence alone.
//! - **Recovery Events**: a suspected/down peer whose heartbeat advances to
//!   alive is announced on a channel so the coordinator can replay hints.

pub mod handlers;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;

pub use service::GossipService;
pub use types::{GossipPayload, Member, MemberState, NodeStatus};
