//! Operation Statistics
//!
//! Lock-free counters for the coordinator's request paths and background
//! features. A reporter task logs a summary periodically; the full summary
//! is also served from `/admin/stats`.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::storage::StoredValue;

#[derive(Debug, Default)]
pub struct NodeStats {
    get_count: AtomicU64,
    put_count: AtomicU64,
    successful_gets: AtomicU64,
    successful_puts: AtomicU64,
    failed_gets: AtomicU64,
    failed_puts: AtomicU64,
    not_found_gets: AtomicU64,
    sloppy_quorum_used: AtomicU64,
    read_repair_count: AtomicU64,
    hint_store_count: AtomicU64,
    hint_deliver_count: AtomicU64,
    conflicts_detected: AtomicU64,
    conflicts_resolved: AtomicU64,
    total_get_latency_ms: AtomicU64,
    total_put_latency_ms: AtomicU64,
    max_get_latency_ms: AtomicU64,
    max_put_latency_ms: AtomicU64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_get(&self) {
        self.get_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.put_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_success(&self, start: Instant) {
        let latency = start.elapsed().as_millis() as u64;
        self.successful_gets.fetch_add(1, Ordering::Relaxed);
        self.total_get_latency_ms.fetch_add(latency, Ordering::Relaxed);
        self.max_get_latency_ms.fetch_max(latency, Ordering::Relaxed);
    }

    pub fn record_put_success(&self, start: Instant) {
        let latency = start.elapsed().as_millis() as u64;
        self.successful_puts.fetch_add(1, Ordering::Relaxed);
        self.total_put_latency_ms.fetch_add(latency, Ordering::Relaxed);
        self.max_put_latency_ms.fetch_max(latency, Ordering::Relaxed);
    }

    pub fn record_get_failure(&self) {
        self.failed_gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put_failure(&self) {
        self.failed_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_not_found(&self) {
        self.not_found_gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sloppy_quorum(&self) {
        self.sloppy_quorum_used.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_repair(&self) {
        self.read_repair_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hint_stored(&self) {
        self.hint_store_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hint_delivered(&self) {
        self.hint_deliver_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict_detected(&self) {
        self.conflicts_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conflicts_detected(&self) -> u64 {
        self.conflicts_detected.load(Ordering::Relaxed)
    }

    pub fn hints_stored(&self) -> u64 {
        self.hint_store_count.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> StatsSummary {
        let successful_gets = self.successful_gets.load(Ordering::Relaxed);
        let successful_puts = self.successful_puts.load(Ordering::Relaxed);

        StatsSummary {
            operations: OperationStats {
                get_count: self.get_count.load(Ordering::Relaxed),
                put_count: self.put_count.load(Ordering::Relaxed),
                successful_gets,
                successful_puts,
                failed_gets: self.failed_gets.load(Ordering::Relaxed),
                failed_puts: self.failed_puts.load(Ordering::Relaxed),
                not_found_gets: self.not_found_gets.load(Ordering::Relaxed),
            },
            latency: LatencyStats {
                avg_get_latency_ms: self.total_get_latency_ms.load(Ordering::Relaxed)
                    / successful_gets.max(1),
                avg_put_latency_ms: self.total_put_latency_ms.load(Ordering::Relaxed)
                    / successful_puts.max(1),
                max_get_latency_ms: self.max_get_latency_ms.load(Ordering::Relaxed),
                max_put_latency_ms: self.max_put_latency_ms.load(Ordering::Relaxed),
            },
            features: FeatureStats {
                sloppy_quorum_used: self.sloppy_quorum_used.load(Ordering::Relaxed),
                read_repairs: self.read_repair_count.load(Ordering::Relaxed),
                hints_stored: self.hint_store_count.load(Ordering::Relaxed),
                hints_delivered: self.hint_deliver_count.load(Ordering::Relaxed),
                conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
                conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsSummary {
    pub operations: OperationStats,
    pub latency: LatencyStats,
    pub features: FeatureStats,
}

/// Every get lands in exactly one of successful, failed or not-found, so
/// the three terminal counters always sum back to `get_count`.
#[derive(Debug, Serialize)]
pub struct OperationStats {
    pub get_count: u64,
    pub put_count: u64,
    pub successful_gets: u64,
    pub successful_puts: u64,
    pub failed_gets: u64,
    pub failed_puts: u64,
    pub not_found_gets: u64,
}

#[derive(Debug, Serialize)]
pub struct LatencyStats {
    pub avg_get_latency_ms: u64,
    pub avg_put_latency_ms: u64,
    pub max_get_latency_ms: u64,
    pub max_put_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct FeatureStats {
    pub sloppy_quorum_used: u64,
    pub read_repairs: u64,
    pub hints_stored: u64,
    pub hints_delivered: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
}

/// Rough byte footprint of one stored entry: a fixed per-entry overhead,
/// the value payload, the vector clock, and siblings weighted at half since
/// they share most of the entry's framing. An estimate for the admin
/// surface, not an exact accounting.
pub fn estimate_value_size(stored: &StoredValue) -> u64 {
    let mut size = 50u64;

    size += match &stored.value {
        Value::String(s) => s.len() as u64,
        Value::Object(_) => 100,
        _ => 20,
    };

    size += 16 + 8 * stored.vector_clock.len() as u64;

    for conflict in &stored.conflicts {
        size += estimate_value_size(conflict) / 2;
    }

    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = NodeStats::new();
        stats.record_get();
        stats.record_get();
        stats.record_put();
        stats.record_conflict_detected();
        stats.record_hint_stored();

        let summary = stats.summary();
        assert_eq!(summary.operations.get_count, 2);
        assert_eq!(summary.operations.put_count, 1);
        assert_eq!(summary.features.conflicts_detected, 1);
        assert_eq!(summary.features.hints_stored, 1);
    }

    #[test]
    fn test_latency_avg_handles_zero_ops() {
        let stats = NodeStats::new();
        let summary = stats.summary();
        assert_eq!(summary.latency.avg_get_latency_ms, 0);
        assert_eq!(summary.latency.avg_put_latency_ms, 0);
    }

    #[test]
    fn test_get_outcomes_partition_get_count() {
        let stats = NodeStats::new();
        for _ in 0..3 {
            stats.record_get();
        }
        stats.record_get_success(Instant::now());
        stats.record_get_failure();
        stats.record_get_not_found();

        let ops = stats.summary().operations;
        assert_eq!(
            ops.successful_gets + ops.failed_gets + ops.not_found_gets,
            ops.get_count
        );
    }

    #[test]
    fn test_estimate_value_size_by_value_type() {
        use crate::clock::VectorClock;
        use crate::storage::StoredValue;
        use serde_json::json;

        let mut clock = VectorClock::new();
        clock.increment("nodeA");

        // 50 base + 5 string bytes + 16 + 8 per clock entry
        let string_value = StoredValue::new(json!("hello"), clock.clone());
        assert_eq!(estimate_value_size(&string_value), 50 + 5 + 16 + 8);

        let object_value = StoredValue::new(json!({"a": 1}), clock.clone());
        assert_eq!(estimate_value_size(&object_value), 50 + 100 + 16 + 8);

        let number_value = StoredValue::new(json!(42), clock);
        assert_eq!(estimate_value_size(&number_value), 50 + 20 + 16 + 8);
    }

    #[test]
    fn test_estimate_value_size_weights_siblings_at_half() {
        use crate::clock::VectorClock;
        use crate::storage::StoredValue;
        use serde_json::json;

        let mut clock_a = VectorClock::new();
        clock_a.increment("nodeA");
        let mut clock_b = VectorClock::new();
        clock_b.increment("nodeB");

        let sibling = StoredValue::new(json!(1), clock_b);
        let sibling_size = estimate_value_size(&sibling);

        let mut principal = StoredValue::new(json!(2), clock_a);
        let base_size = estimate_value_size(&principal);
        principal.conflicts.push(sibling);

        assert_eq!(
            estimate_value_size(&principal),
            base_size + sibling_size / 2
        );
    }
}
