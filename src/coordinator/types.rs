use serde_json::Value;
use thiserror::Error;

use crate::clock::VectorClock;

/// A write buffered on behalf of an unreachable replica, awaiting delivery.
#[derive(Debug, Clone)]
pub struct HintedWrite {
    pub key: String,
    pub value: Value,
    pub vector_clock: VectorClock,
    /// The rightful owner this write is destined for.
    pub target_node: String,
    /// Milliseconds since the Unix epoch when the hint was buffered.
    pub timestamp: u64,
    pub attempts: u32,
}

/// Coordinator-level error taxonomy. Transport and storage failures are
/// retried and absorbed internally; what reaches the caller is one of these.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("insufficient replicas for read quorum")]
    ReadQuorumNotMet,
    #[error("insufficient replicas for write quorum")]
    WriteQuorumNotMet,
    #[error("key not found")]
    NotFound,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("storage error: {0}")]
    Storage(String),
}
