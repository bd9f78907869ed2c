use anyhow::{bail, Result};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::hints::HintStore;
use super::protocol::InternalPutRequest;
use super::types::KvError;
use crate::clock::{ClockOrdering, VectorClock};
use crate::config::Config;
use crate::gossip::{GossipService, NodeStatus};
use crate::ring::ConsistentHashRing;
use crate::stats::{estimate_value_size, NodeStats};
use crate::storage::{now_ms, Storage, StoredValue};

/// Retries for replica reads and writes.
pub(crate) const MAX_RETRY_ATTEMPTS: u32 = 3;
/// Base of the exponential backoff between retries.
const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Per-attempt timeout for internal reads and repairs.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Per-attempt timeout for internal writes.
const REPLICA_PUT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    BASE_RETRY_DELAY * 2u32.saturating_pow(attempt)
}

/// The per-node replication coordinator. Symmetric: every node runs one and
/// any node can coordinate any request.
pub struct Coordinator {
    pub(crate) node_id: String,
    pub(crate) ring: Arc<ConsistentHashRing>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) gossip: Arc<GossipService>,
    pub(crate) hints: HintStore,
    pub(crate) stats: Arc<NodeStats>,
    pub(crate) client: reqwest::Client,
    replication: usize,
    read_quorum: usize,
    write_quorum: usize,
    /// Serializes local read-modify-write so clock comparison and store are
    /// atomic with respect to other local writers.
    local_write_lock: Mutex<()>,
}

impl Coordinator {
    /// Builds the coordinator, re-validating the quorum invariants; a node
    /// must never run with R + W <= N.
    pub fn new(
        config: &Config,
        ring: Arc<ConsistentHashRing>,
        storage: Arc<dyn Storage>,
        gossip: Arc<GossipService>,
        stats: Arc<NodeStats>,
    ) -> Result<Arc<Self>> {
        if config.read_quorum == 0 || config.write_quorum == 0 || config.replication_factor == 0 {
            bail!("invalid quorum parameters: all values must be positive");
        }
        if config.read_quorum + config.write_quorum <= config.replication_factor {
            bail!(
                "invalid quorum configuration: R({}) + W({}) must be > N({})",
                config.read_quorum,
                config.write_quorum,
                config.replication_factor
            );
        }

        Ok(Arc::new(Self {
            node_id: config.node_id.clone(),
            ring,
            storage,
            gossip,
            hints: HintStore::new(),
            stats: stats.clone(),
            client: reqwest::Client::new(),
            replication: config.replication_factor,
            read_quorum: config.read_quorum,
            write_quorum: config.write_quorum,
            local_write_lock: Mutex::new(()),
        }))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn gossip(&self) -> &GossipService {
        &self.gossip
    }

    /// Number of keys and estimated byte footprint of the local store.
    pub fn storage_footprint(&self) -> (u64, u64) {
        let mut key_count = 0u64;
        let mut data_size_bytes = 0u64;
        self.storage.iterate(&mut |key, stored| {
            key_count += 1;
            data_size_bytes += key.len() as u64 + estimate_value_size(stored);
            true
        });
        (key_count, data_size_bytes)
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Coordinates a client write: stamp the clock, fan out to N replicas,
    /// wait for W acknowledgements, then buffer hints for any substitutes.
    pub async fn put(self: Arc<Self>, key: &str, value: Value) -> Result<(), KvError> {
        let start = Instant::now();
        self.stats.record_put();

        let vector_clock = self.next_clock(key);
        let (nodes, replacements) = self.responsible_nodes(key);
        if nodes.is_empty() {
            warn!("No nodes available in the ring for key {}", key);
            self.stats.record_put_failure();
            return Err(KvError::WriteQuorumNotMet);
        }

        debug!(
            "Putting key {} to nodes {:?} with clock {}",
            key, nodes, vector_clock
        );

        let timestamp = now_ms();
        let mut writes: FuturesUnordered<_> = nodes
            .iter()
            .map(|node| {
                let this = self.clone();
                let node = node.clone();
                let key = key.to_string();
                let value = value.clone();
                let vector_clock = vector_clock.clone();
                async move {
                    let ok = this
                        .write_to_node(&node, &key, &value, &vector_clock, timestamp)
                        .await;
                    (node, ok)
                }
            })
            .collect();

        let mut successes = Vec::new();
        while let Some((node, ok)) = writes.next().await {
            if ok {
                successes.push(node);
            }
        }

        if successes.len() < self.write_quorum {
            warn!(
                "Write quorum not met for key {}: {}/{} acknowledgements",
                key,
                successes.len(),
                self.write_quorum
            );
            self.stats.record_put_failure();
            return Err(KvError::WriteQuorumNotMet);
        }

        self.stats.record_put_success(start);

        // Hint bookkeeping runs after the client reply, never blocking it.
        if !replacements.is_empty() {
            let this = self.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                this.process_sloppy_replacements(
                    &successes,
                    &replacements,
                    &key,
                    value,
                    vector_clock,
                );
            });
        }

        Ok(())
    }

    /// Buffers a hint toward each unavailable owner whose substitute
    /// acknowledged the write.
    pub(crate) fn process_sloppy_replacements(
        &self,
        successes: &[String],
        replacements: &HashMap<String, String>,
        key: &str,
        value: Value,
        vector_clock: VectorClock,
    ) {
        self.stats.record_sloppy_quorum();

        for (original, substitute) in replacements {
            if successes.contains(substitute) {
                info!(
                    "Write for key {} landed on substitute {}, buffering hint for {}",
                    key, substitute, original
                );
                self.store_hint(original, key, value.clone(), vector_clock.clone());
            }
        }
    }

    /// Clones the locally stored clock for `key` (zero if absent) and bumps
    /// our own component, so concurrent coordinators always produce
    /// concurrent clocks.
    pub(crate) fn next_clock(&self, key: &str) -> VectorClock {
        let _guard = self.write_guard();
        let mut clock = self
            .storage
            .get(key)
            .map(|stored| stored.vector_clock)
            .unwrap_or_default();
        clock.increment(&self.node_id);
        clock
    }

    async fn write_to_node(
        &self,
        node_id: &str,
        key: &str,
        value: &Value,
        vector_clock: &VectorClock,
        timestamp: u64,
    ) -> bool {
        if node_id == self.node_id {
            return self
                .apply_local_put(key, value.clone(), vector_clock.clone())
                .is_ok();
        }
        self.remote_put_with_retry(node_id, key, value, vector_clock, timestamp)
            .await
    }

    pub(crate) async fn remote_put_with_retry(
        &self,
        node_id: &str,
        key: &str,
        value: &Value,
        vector_clock: &VectorClock,
        timestamp: u64,
    ) -> bool {
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if self
                .remote_put(node_id, key, value, vector_clock, timestamp)
                .await
            {
                return true;
            }
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
        false
    }

    async fn remote_put(
        &self,
        node_id: &str,
        key: &str,
        value: &Value,
        vector_clock: &VectorClock,
        timestamp: u64,
    ) -> bool {
        let Some((host, port)) = self.gossip.address_of(node_id) else {
            debug!("No address known for node {}", node_id);
            return false;
        };

        let url = format!("http://{}:{}/internal/kv/{}", host, port, key);
        let body = InternalPutRequest {
            value: value.clone(),
            vector_clock: vector_clock.clone(),
            timestamp,
            is_hint: false,
            force_sync: false,
            force_key: false,
            origin_node: None,
        };

        match self
            .client
            .put(&url)
            .json(&body)
            .timeout(REPLICA_PUT_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("PUT to {} failed: {}", node_id, e);
                false
            }
        }
    }

    /// Applies a write to the local store under causal gating:
    /// stored-dominates -> ignore, equal -> refresh timestamp,
    /// incoming-dominates -> replace, concurrent -> keep both as siblings
    /// under the merged clock.
    pub fn apply_local_put(
        &self,
        key: &str,
        value: Value,
        vector_clock: VectorClock,
    ) -> Result<(), KvError> {
        let _guard = self.write_guard();

        let incoming = StoredValue::new(value, vector_clock);
        let next = match self.storage.get(key) {
            None => incoming,
            Some(existing) => match existing.vector_clock.compare(&incoming.vector_clock) {
                ClockOrdering::Dominates => {
                    debug!("Ignoring causally older write for key {}", key);
                    return Ok(());
                }
                ClockOrdering::Equal => {
                    let mut refreshed = existing;
                    refreshed.timestamp = now_ms();
                    refreshed
                }
                ClockOrdering::Dominated => incoming,
                ClockOrdering::Concurrent => {
                    self.stats.record_conflict_detected();
                    let mut merged = incoming;
                    merged.conflicts = existing.conflicts.clone();
                    merged.conflicts.push(existing.without_conflicts());
                    merged.vector_clock.merge(&existing.vector_clock);
                    info!(
                        "Concurrent write detected for key {}, merged clock {}",
                        key, merged.vector_clock
                    );
                    merged
                }
            },
        };

        self.storage.put(key, next).map_err(|e| {
            error!("Failed to store key {}: {}", key, e);
            KvError::Storage(e.to_string())
        })
    }

    /// Stores a hint delivery, bypassing clock gating entirely.
    pub fn apply_hint(&self, key: &str, request: InternalPutRequest) -> Result<(), KvError> {
        let origin = request.origin_node.as_deref().unwrap_or("unknown");
        debug!("Storing hint for key {} from node {}", key, origin);

        let stored = StoredValue {
            value: request.value,
            vector_clock: request.vector_clock,
            conflicts: Vec::new(),
            timestamp: now_ms(),
        };
        self.storage.put(key, stored).map_err(|e| {
            error!("Failed to store hint for key {}: {}", key, e);
            KvError::Storage(e.to_string())
        })
    }

    /// Unconditional repair write: heals a stale replica with the
    /// reconciled version and its sibling list, no clock gating.
    pub fn apply_repair(&self, key: &str, mut repaired: StoredValue) -> Result<(), KvError> {
        repaired.timestamp = now_ms();
        self.storage.put(key, repaired).map_err(|e| {
            error!("Failed to repair key {}: {}", key, e);
            KvError::Storage(e.to_string())
        })?;
        self.stats.record_read_repair();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Coordinates a client read: query N replicas, wait for R answers,
    /// reconcile by vector clock and fire background read repair.
    pub async fn get(self: Arc<Self>, key: &str) -> Result<StoredValue, KvError> {
        let start = Instant::now();
        self.stats.record_get();

        let (nodes, _replacements) = self.responsible_nodes(key);
        if nodes.is_empty() {
            self.stats.record_get_failure();
            return Err(KvError::ReadQuorumNotMet);
        }

        let (responses, responders) = self.gather_responses(&nodes, key).await;

        if responses.is_empty() && responders >= self.read_quorum {
            // Enough replicas answered; none of them holds the key.
            self.stats.record_get_not_found();
            return Err(KvError::NotFound);
        }

        if responses.len() < self.read_quorum {
            warn!(
                "Read quorum not met for key {}: {}/{} responses",
                key,
                responses.len(),
                self.read_quorum
            );

            if let Some(local) = self.local_get(key) {
                info!("Serving key {} from local store without quorum", key);
                self.stats.record_get_success(start);
                return Ok(local);
            }

            self.stats.record_get_failure();
            return Err(KvError::ReadQuorumNotMet);
        }

        let (reconciled, merged) = reconcile(responses.values().cloned());
        if merged > 0 {
            debug!("Merged {} concurrent versions for key {}", merged, key);
        }

        self.stats.record_get_success(start);

        // Read repair runs after the client reply is sent.
        {
            let this = self.clone();
            let key = key.to_string();
            let reconciled = reconciled.clone();
            tokio::spawn(async move {
                this.perform_read_repairs(&nodes, &key, &reconciled, &responses)
                    .await;
            });
        }

        Ok(reconciled)
    }

    async fn gather_responses(
        &self,
        nodes: &[String],
        key: &str,
    ) -> (HashMap<String, StoredValue>, usize) {
        let mut reads: FuturesUnordered<_> = nodes
            .iter()
            .map(|node| {
                let node = node.clone();
                let key = key.to_string();
                async move {
                    let outcome = self.retrieve_value(&node, &key).await;
                    (node, outcome)
                }
            })
            .collect();

        let mut responses = HashMap::new();
        let mut responders = 0;
        while let Some((node, outcome)) = reads.next().await {
            match outcome {
                ReadOutcome::Value(stored) => {
                    responders += 1;
                    responses.insert(node, stored);
                }
                ReadOutcome::Missing => {
                    responders += 1;
                }
                ReadOutcome::Unreachable => {}
            }
        }

        (responses, responders)
    }

    async fn retrieve_value(&self, node_id: &str, key: &str) -> ReadOutcome {
        if node_id == self.node_id {
            return match self.local_get(key) {
                Some(stored) => ReadOutcome::Value(stored),
                None => ReadOutcome::Missing,
            };
        }

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            match self.remote_get(node_id, key).await {
                outcome @ (ReadOutcome::Value(_) | ReadOutcome::Missing) => return outcome,
                ReadOutcome::Unreachable => {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }

        ReadOutcome::Unreachable
    }

    async fn remote_get(&self, node_id: &str, key: &str) -> ReadOutcome {
        let Some((host, port)) = self.gossip.address_of(node_id) else {
            return ReadOutcome::Unreachable;
        };

        let url = format!("http://{}:{}/internal/kv/{}", host, port, key);
        let resp = match self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!("GET from {} failed: {}", node_id, e);
                return ReadOutcome::Unreachable;
            }
        };

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return ReadOutcome::Missing;
        }
        if !resp.status().is_success() {
            return ReadOutcome::Unreachable;
        }

        match resp.json::<StoredValue>().await {
            Ok(stored) => ReadOutcome::Value(stored),
            Err(e) => {
                debug!("Failed to decode response from {}: {}", node_id, e);
                ReadOutcome::Unreachable
            }
        }
    }

    /// Local-only read. Falls back to the hint buffer so a substitute
    /// holder can serve keys it is safekeeping for a down owner.
    pub fn local_get(&self, key: &str) -> Option<StoredValue> {
        if let Some(stored) = self.storage.get(key) {
            return Some(stored);
        }

        self.hints.find_by_key(key).map(|hint| {
            debug!(
                "Serving key {} from hint buffer (held for {})",
                key, hint.target_node
            );
            StoredValue {
                value: hint.value,
                vector_clock: hint.vector_clock,
                conflicts: Vec::new(),
                timestamp: hint.timestamp,
            }
        })
    }

    /// Heals replicas that returned nothing or a strictly older version.
    async fn perform_read_repairs(
        &self,
        nodes: &[String],
        key: &str,
        reconciled: &StoredValue,
        responses: &HashMap<String, StoredValue>,
    ) {
        for node in nodes {
            let stale = match responses.get(node) {
                None => true,
                Some(seen) => {
                    reconciled.vector_clock.compare(&seen.vector_clock) == ClockOrdering::Dominates
                }
            };
            if !stale {
                continue;
            }

            if node == &self.node_id {
                if self.apply_repair(key, reconciled.clone()).is_ok() {
                    debug!("Repaired local copy of key {}", key);
                }
            } else {
                self.repair_node(node, key, reconciled).await;
            }
        }
    }

    async fn repair_node(&self, node_id: &str, key: &str, reconciled: &StoredValue) {
        let Some((host, port)) = self.gossip.address_of(node_id) else {
            return;
        };

        let url = format!("http://{}:{}/internal/repair/{}", host, port, key);
        let result = self
            .client
            .put(&url)
            .json(reconciled)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!("Repaired key {} on node {}", key, node_id);
                if !reconciled.conflicts.is_empty() {
                    self.stats.record_conflict_resolved();
                }
            }
            Ok(resp) => {
                debug!("Repair of {} on {} returned {}", key, node_id, resp.status());
            }
            Err(e) => {
                debug!("Repair of {} on {} failed: {}", key, node_id, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Preference list
    // ------------------------------------------------------------------

    /// The N replicas for `key`, with sloppy substitution: an unavailable
    /// preferred replica is replaced by the next healthy node past the
    /// preferred range, recorded in the replacement map.
    pub(crate) fn responsible_nodes(&self, key: &str) -> (Vec<String>, HashMap<String, String>) {
        let mut all = self.ring.all_nodes();
        all.sort();
        if all.is_empty() {
            return (Vec::new(), HashMap::new());
        }

        let primary = self.ring.get_node(key);
        let primary_idx = primary
            .as_ref()
            .and_then(|p| all.iter().position(|n| n == p))
            .unwrap_or(0);

        let mut nodes: Vec<String> = Vec::with_capacity(self.replication);
        let mut replacements = HashMap::new();

        for i in 0..self.replication.min(all.len()) {
            let mut node_id = all[(primary_idx + i) % all.len()].clone();

            if !self.is_available(&node_id) {
                debug!("Node {} unavailable, looking for replacement", node_id);
                for j in 0..all.len() {
                    let candidate = &all[(primary_idx + self.replication + j) % all.len()];
                    if self.is_available(candidate) && !nodes.contains(candidate) {
                        debug!("Using {} as replacement for {}", candidate, node_id);
                        replacements.insert(node_id.clone(), candidate.clone());
                        node_id = candidate.clone();
                        break;
                    }
                }
            }

            nodes.push(node_id);
        }

        (nodes, replacements)
    }

    pub(crate) fn is_available(&self, node_id: &str) -> bool {
        if node_id == self.node_id {
            return true;
        }
        self.gossip.node_status(node_id) == NodeStatus::Alive
    }

    pub(crate) fn write_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.local_write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum ReadOutcome {
    /// The replica answered with a version.
    Value(StoredValue),
    /// The replica answered and does not hold the key.
    Missing,
    /// No answer within the retry budget.
    Unreachable,
}

/// Reduces replica responses to a single version: dominated versions are
/// discarded, concurrent versions are kept as siblings under the merged
/// clock, and equal versions contribute any siblings the winner lacks.
/// Returns the reconciled value and the number of concurrent merges.
pub(crate) fn reconcile<I>(responses: I) -> (StoredValue, usize)
where
    I: IntoIterator<Item = StoredValue>,
{
    let mut merged_count = 0;
    let mut current: Option<StoredValue> = None;

    for response in responses {
        let Some(cur) = current.as_mut() else {
            current = Some(response);
            continue;
        };

        match cur.vector_clock.compare(&response.vector_clock) {
            ClockOrdering::Dominates => {}
            ClockOrdering::Dominated => *cur = response,
            ClockOrdering::Equal => {
                absorb_siblings(cur, response.conflicts);
            }
            ClockOrdering::Concurrent => {
                merged_count += 1;
                let mut siblings = response.conflicts.clone();
                siblings.push(response.without_conflicts());
                cur.vector_clock.merge(&response.vector_clock);
                absorb_siblings(cur, siblings);
                cur.timestamp = now_ms();
            }
        }
    }

    (current.unwrap_or_default(), merged_count)
}

/// Appends siblings not already represented by the principal or an existing
/// sibling (matched by value and clock).
fn absorb_siblings(principal: &mut StoredValue, incoming: Vec<StoredValue>) {
    for sibling in incoming {
        let duplicate = (sibling.value == principal.value
            && sibling.vector_clock == principal.vector_clock)
            || principal
                .conflicts
                .iter()
                .any(|c| c.value == sibling.value && c.vector_clock == sibling.vector_clock);

        if !duplicate {
            principal.conflicts.push(sibling.without_conflicts());
        }
    }
}
