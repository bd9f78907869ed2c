use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clock::VectorClock;

/// The unit persisted per key.
///
/// Invariant: the top-level vector clock dominates (or, right after a merge,
/// is pairwise-concurrent with) the clock of every entry in `conflicts`.
/// The timestamp records the last local mutation and is informational only;
/// it is never used as a tie-breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Opaque JSON value supplied by the client.
    pub value: Value,
    #[serde(default)]
    pub vector_clock: VectorClock,
    /// Concurrently-written sibling versions awaiting application-level
    /// resolution. Empty for causally clean keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<StoredValue>,
    /// Milliseconds since the Unix epoch of the last local mutation.
    #[serde(default)]
    pub timestamp: u64,
}

impl StoredValue {
    /// A fresh version with no siblings, stamped now.
    pub fn new(value: Value, vector_clock: VectorClock) -> Self {
        Self {
            value,
            vector_clock,
            conflicts: Vec::new(),
            timestamp: now_ms(),
        }
    }

    /// A copy of this version without its sibling list, for pushing onto
    /// another version's `conflicts`.
    pub fn without_conflicts(&self) -> Self {
        Self {
            value: self.value.clone(),
            vector_clock: self.vector_clock.clone(),
            conflicts: Vec::new(),
            timestamp: self.timestamp,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
