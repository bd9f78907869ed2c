//! Vector Clocks
//!
//! Per-key causality tracking. Every write stamps the key with a vector of
//! per-node counters; comparing two clocks tells us whether one write
//! causally descends from the other or whether they happened concurrently.
//!
//! ## Core Mechanisms
//! - **Increment**: a coordinator bumps its own component before replicating,
//!   so writes issued by different coordinators are always distinguishable.
//! - **Compare**: implements the standard partial order over counter vectors.
//!   Missing entries count as zero.
//! - **Merge**: component-wise maximum, used when reconciling concurrent
//!   versions into a single dominating clock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of comparing two vector clocks under the causal partial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Identical counters on every component.
    Equal,
    /// `self` is causally newer: >= everywhere, > somewhere.
    Dominates,
    /// `self` is causally older: <= everywhere, < somewhere.
    Dominated,
    /// Neither dominates; the writes happened concurrently.
    Concurrent,
}

/// A mapping from node identifier to a monotone write counter.
///
/// Serialized as a flat JSON object `{"nodeA": 2, "nodeB": 1}`. A missing
/// entry denotes zero, so the empty clock is the causal bottom element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `node_id`, with missing entries reading as zero.
    pub fn get(&self, node_id: &str) -> u64 {
        self.counters.get(node_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.values().all(|&count| count == 0)
    }

    /// Number of node components tracked.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Bumps this node's component by one.
    pub fn increment(&mut self, node_id: &str) {
        *self.counters.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Component-wise maximum. The result dominates (or equals) both inputs.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &count) in &other.counters {
            let entry = self.counters.entry(node.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    /// `merge(other)` followed by `increment(node_id)`; stamps a new write
    /// that causally descends from everything `other` has seen.
    pub fn merge_and_increment(&mut self, other: &VectorClock, node_id: &str) {
        self.merge(other);
        self.increment(node_id);
    }

    /// Compares under the causal partial order. Entries absent on one side
    /// are treated as zero, so `{}` is dominated by any non-empty clock.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut self_greater = false;
        let mut other_greater = false;

        for node in self.counters.keys().chain(other.counters.keys()) {
            let mine = self.get(node);
            let theirs = other.get(node);
            if mine > theirs {
                self_greater = true;
            } else if mine < theirs {
                other_greater = true;
            }
        }

        match (self_greater, other_greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Dominates,
            (false, true) => ClockOrdering::Dominated,
            (true, true) => ClockOrdering::Concurrent,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (node, count)) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", node, count)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        let mut vc = VectorClock::new();
        for (node, count) in entries {
            for _ in 0..*count {
                vc.increment(node);
            }
        }
        vc
    }

    #[test]
    fn test_empty_clocks_are_equal() {
        let a = VectorClock::new();
        let b = VectorClock::new();
        assert_eq!(a.compare(&b), ClockOrdering::Equal);
        assert!(a.is_empty());
    }

    #[test]
    fn test_increment_dominates_empty() {
        let mut a = VectorClock::new();
        a.increment("nodeA");

        let empty = VectorClock::new();
        assert_eq!(a.compare(&empty), ClockOrdering::Dominates);
        assert_eq!(empty.compare(&a), ClockOrdering::Dominated);
    }

    #[test]
    fn test_successive_increments_are_ordered() {
        let older = clock(&[("nodeA", 1)]);
        let newer = clock(&[("nodeA", 2)]);

        assert_eq!(newer.compare(&older), ClockOrdering::Dominates);
        assert_eq!(older.compare(&newer), ClockOrdering::Dominated);
    }

    #[test]
    fn test_concurrent_writes_detected() {
        let a = clock(&[("nodeA", 1)]);
        let b = clock(&[("nodeB", 1)]);

        assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
        assert_eq!(b.compare(&a), ClockOrdering::Concurrent);
    }

    #[test]
    fn test_merge_is_component_wise_max() {
        let mut a = clock(&[("nodeA", 2), ("nodeB", 1)]);
        let b = clock(&[("nodeA", 1), ("nodeB", 3), ("nodeC", 1)]);

        a.merge(&b);
        assert_eq!(a.get("nodeA"), 2);
        assert_eq!(a.get("nodeB"), 3);
        assert_eq!(a.get("nodeC"), 1);
    }

    #[test]
    fn test_merged_clock_dominates_both_inputs() {
        let a = clock(&[("nodeA", 1)]);
        let b = clock(&[("nodeB", 1)]);

        let mut merged = a.clone();
        merged.merge(&b);

        assert_eq!(merged.compare(&a), ClockOrdering::Dominates);
        assert_eq!(merged.compare(&b), ClockOrdering::Dominates);
    }

    #[test]
    fn test_merge_and_increment_descends_from_other() {
        let other = clock(&[("nodeA", 3)]);
        let mut vc = clock(&[("nodeB", 1)]);

        vc.merge_and_increment(&other, "nodeB");
        assert_eq!(vc.get("nodeA"), 3);
        assert_eq!(vc.get("nodeB"), 2);
        assert_eq!(vc.compare(&other), ClockOrdering::Dominates);
    }

    #[test]
    fn test_partial_order_properties() {
        let a = clock(&[("nodeA", 1), ("nodeB", 2)]);
        let b = clock(&[("nodeA", 2), ("nodeB", 2)]);
        let c = clock(&[("nodeA", 2), ("nodeB", 3)]);

        // Reflexive
        assert_eq!(a.compare(&a), ClockOrdering::Equal);

        // Antisymmetric (modulo equality)
        assert_eq!(b.compare(&a), ClockOrdering::Dominates);
        assert_eq!(a.compare(&b), ClockOrdering::Dominated);

        // Transitive
        assert_eq!(c.compare(&b), ClockOrdering::Dominates);
        assert_eq!(c.compare(&a), ClockOrdering::Dominates);
    }

    #[test]
    fn test_explicit_zero_entry_equals_missing() {
        let json = r#"{"nodeA": 1, "nodeB": 0}"#;
        let with_zero: VectorClock = serde_json::from_str(json).unwrap();
        let without = clock(&[("nodeA", 1)]);

        assert_eq!(with_zero.compare(&without), ClockOrdering::Equal);
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let vc = clock(&[("nodeA", 2), ("nodeB", 1)]);
        let json = serde_json::to_string(&vc).unwrap();
        assert_eq!(json, r#"{"nodeA":2,"nodeB":1}"#);

        let restored: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vc);
    }
}
