//! Hinted Handoff
//!
//! When a write lands on a substitute because the rightful owner was down,
//! the coordinator buffers a [`HintedWrite`] tagged with the owner's id. A
//! worker replays hints every second to targets gossip reports alive, and a
//! recovery listener replays immediately when a node comes back online.
//!
//! Receivers store hints unconditionally: the originating clock already
//! carries the causal information, and gating would risk dropping a hint
//! that dominates a stale local entry.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::service::{backoff_delay, Coordinator};
use super::types::HintedWrite;
use crate::gossip::NodeStatus;
use crate::storage::StoredValue;

/// Buffered hints per target, oldest evicted beyond this.
const HINT_STORAGE_LIMIT: usize = 1000;
/// Cadence of the handoff worker.
const HINT_WORKER_INTERVAL: Duration = Duration::from_secs(1);
/// Delivery attempts per hint per pass.
const HINT_DELIVERY_ATTEMPTS: u32 = 5;
/// Per-attempt delivery timeout.
const HINT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Mutex-guarded hint buffer, FIFO per target and bounded to
/// [`HINT_STORAGE_LIMIT`] entries each. Critical sections copy then release;
/// no lock is ever held across network I/O.
#[derive(Debug, Default)]
pub struct HintStore {
    inner: Mutex<HashMap<String, VecDeque<HintedWrite>>>,
}

impl HintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a hint for its target, rotating out the oldest entry when
    /// the target's buffer is full.
    pub fn store(&self, hint: HintedWrite) {
        let mut inner = self.lock();
        let queue = inner.entry(hint.target_node.clone()).or_default();

        if queue.len() >= HINT_STORAGE_LIMIT {
            warn!(
                "Hint buffer full for node {}, rotating out oldest entry",
                hint.target_node
            );
            queue.pop_front();
        }
        queue.push_back(hint);
    }

    /// Targets that currently have buffered hints.
    pub fn targets(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Snapshot of the hints buffered for `target`.
    pub fn pending_for(&self, target: &str) -> Vec<HintedWrite> {
        self.lock()
            .get(target)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops delivered hints (matched by key) and removes the target entry
    /// once its buffer drains.
    pub fn remove_delivered(&self, target: &str, keys: &[String]) {
        let mut inner = self.lock();
        if let Some(queue) = inner.get_mut(target) {
            queue.retain(|hint| !keys.contains(&hint.key));
            if queue.is_empty() {
                inner.remove(target);
            }
        }
    }

    /// Looks a key up across all buffered hints, so a substitute holder can
    /// serve it for sloppy-quorum reads.
    pub fn find_by_key(&self, key: &str) -> Option<HintedWrite> {
        let inner = self.lock();
        for queue in inner.values() {
            if let Some(hint) = queue.iter().find(|hint| hint.key == key) {
                return Some(hint.clone());
            }
        }
        None
    }

    pub fn total(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<HintedWrite>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Coordinator {
    /// Hints currently buffered across all targets.
    pub fn pending_hint_count(&self) -> usize {
        self.hints.total()
    }

    /// Buffers a hint for `target_node` and counts it.
    pub fn store_hint(
        &self,
        target_node: &str,
        key: &str,
        value: serde_json::Value,
        vector_clock: crate::clock::VectorClock,
    ) {
        info!("Storing hint for node {}, key {}", target_node, key);
        self.hints.store(HintedWrite {
            key: key.to_string(),
            value,
            vector_clock,
            target_node: target_node.to_string(),
            timestamp: crate::storage::now_ms(),
            attempts: 0,
        });
        self.stats.record_hint_stored();
    }

    /// Spawns the 1 s handoff worker.
    pub fn spawn_hint_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HINT_WORKER_INTERVAL);
            info!("Started hint handoff worker");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Hint handoff worker shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        self.process_hints().await;
                    }
                }
            }
        });
    }

    /// One worker pass: snapshot hints for every currently-alive target,
    /// then deliver outside the lock.
    pub async fn process_hints(&self) {
        for target in self.hints.targets() {
            if self.gossip.node_status(&target) != NodeStatus::Alive {
                continue;
            }

            let pending = self.hints.pending_for(&target);
            if pending.is_empty() {
                continue;
            }

            let mut delivered = Vec::new();
            for hint in pending {
                if self.deliver_hint(&hint).await {
                    info!(
                        "Delivered hint for key {} to node {}",
                        hint.key, hint.target_node
                    );
                    self.stats.record_hint_delivered();
                    delivered.push(hint.key);
                }
            }

            if !delivered.is_empty() {
                self.hints.remove_delivered(&target, &delivered);
            }
        }
    }

    /// Pushes one hint to its target with aggressive retries. The receiver
    /// stores it unconditionally.
    async fn deliver_hint(&self, hint: &HintedWrite) -> bool {
        let Some((host, port)) = self.gossip.address_of(&hint.target_node) else {
            debug!("No address for hint target {}", hint.target_node);
            return false;
        };

        let url = format!("http://{}:{}/internal/kv/{}", host, port, hint.key);
        let body = super::protocol::InternalPutRequest {
            value: hint.value.clone(),
            vector_clock: hint.vector_clock.clone(),
            timestamp: hint.timestamp,
            is_hint: true,
            force_sync: false,
            force_key: false,
            origin_node: Some(self.node_id.clone()),
        };

        for attempt in 0..HINT_DELIVERY_ATTEMPTS {
            let result = self
                .client
                .put(&url)
                .json(&body)
                .timeout(HINT_DELIVERY_TIMEOUT)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    debug!("Hint delivery attempt returned status {}", resp.status());
                }
                Err(e) => {
                    debug!("Hint delivery attempt failed: {}", e);
                }
            }

            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        false
    }

    /// Listens for gossip recovery events and replays state for each
    /// returning node.
    pub fn spawn_recovery_worker(
        self: Arc<Self>,
        mut recoveries: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Recovery worker shutting down");
                        return;
                    }
                    event = recoveries.recv() => {
                        match event {
                            Some(node_id) => self.force_reconnect_hints(&node_id).await,
                            None => return,
                        }
                    }
                }
            }
        });
    }

    /// Immediate replay for a node that just came back: deliver its buffered
    /// hints, then push every local key whose primary owner it is. The
    /// second half doubles as targeted recovery sync.
    pub async fn force_reconnect_hints(&self, node_id: &str) {
        info!("Replaying buffered state for recovered node {}", node_id);

        let pending = self.hints.pending_for(node_id);
        let mut delivered = Vec::new();
        for hint in pending {
            if self.deliver_hint(&hint).await {
                info!(
                    "Delivered hint for key {} to recovered node {}",
                    hint.key, node_id
                );
                self.stats.record_hint_delivered();
                delivered.push(hint.key);
            }
        }
        if !delivered.is_empty() {
            self.hints.remove_delivered(node_id, &delivered);
        }

        let mut owned: Vec<(String, StoredValue)> = Vec::new();
        self.storage.iterate(&mut |key, value| {
            if self.ring.get_node(key).as_deref() == Some(node_id) {
                owned.push((key.to_string(), value.clone()));
            }
            true
        });

        for (key, value) in owned {
            self.remote_put_with_retry(
                node_id,
                &key,
                &value.value,
                &value.vector_clock,
                value.timestamp,
            )
            .await;
        }
    }
}
