use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Liveness classification of a peer from the local detector's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Heard from recently; eligible for quorum and hint delivery.
    Alive,
    /// Missed the suspicion window, or reported down second-hand.
    Suspected,
    /// Missed the failure window; excluded from preference lists.
    Down,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Alive => write!(f, "alive"),
            NodeStatus::Suspected => write!(f, "suspected"),
            NodeStatus::Down => write!(f, "down"),
        }
    }
}

/// A gossip participant as seen locally.
///
/// `last_seen` is a local monotonic timestamp, never sent over the wire; the
/// receiver always stamps its own clock when it hears about a member.
#[derive(Debug, Clone)]
pub struct Member {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    /// Monotone counter incremented by the owning node on every emission.
    pub heartbeat: u64,
    pub status: NodeStatus,
    pub last_seen: Instant,
}

/// Wire form of one member-table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberState {
    pub host: String,
    pub port: u16,
    pub heartbeat: u64,
    pub status: NodeStatus,
}

/// Body of `POST /internal/gossip`: the emitter's identity plus its full
/// member table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPayload {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub heartbeat: u64,
    #[serde(default)]
    pub members: std::collections::HashMap<String, MemberState>,
}
