//! Anti-Entropy Reconciliation
//!
//! The periodic worker sweeps the local store and pushes every key to every
//! live peer; receivers merge through the normal causal gating, so replicas
//! converge even after partitions. The merkle-guided variant compares
//! per-bucket tree roots first and only syncs keys in divergent buckets,
//! which the targeted `/admin/sync {"node": id}` path uses to cut traffic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::InternalPutRequest;
use super::service::{Coordinator, REQUEST_TIMEOUT};
use crate::merkle::{canonical_value, MerkleTree};
use crate::ring::hash_key;
use crate::storage::{now_ms, StoredValue};

/// Cadence of the periodic sweep.
const ANTI_ENTROPY_INTERVAL: Duration = Duration::from_secs(5);
/// Attempts per key during a sync.
const SYNC_ATTEMPTS: u32 = 3;
/// Pause between per-key attempts.
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Per-attempt timeout for forced sync writes.
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);
/// Keys are partitioned into this many merkle buckets by `hash(key) % 100`.
pub const MERKLE_BUCKETS: u64 = 100;

impl Coordinator {
    /// Spawns the periodic sweep, running one pass immediately so a
    /// restarted node re-converges before the first tick.
    pub fn spawn_anti_entropy_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            info!("Started anti-entropy worker");
            self.sync_all_peers().await;

            let mut interval = tokio::time::interval(ANTI_ENTROPY_INTERVAL);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Anti-entropy worker shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        self.sync_all_peers().await;
                    }
                }
            }
        });
    }

    /// One full cycle: direct-sync with every live peer on the ring.
    pub async fn sync_all_peers(&self) {
        let mut peers = self.ring.all_nodes();
        peers.sort();

        for peer in peers {
            if peer == self.node_id() {
                continue;
            }
            if !self.is_available(&peer) {
                debug!("Skipping anti-entropy with unavailable peer {}", peer);
                continue;
            }
            self.direct_sync_with_node(&peer).await;
        }
    }

    /// The authoritative strategy: push every local key to `peer` as a
    /// forced sync; the receiver's causal merge resolves concurrent writes.
    pub async fn direct_sync_with_node(&self, peer: &str) {
        let entries = self.snapshot_entries();
        if entries.is_empty() {
            return;
        }

        debug!("Direct syncing {} keys with {}", entries.len(), peer);

        let mut synced = 0;
        for (key, stored) in &entries {
            if self.sync_key_with_retry(peer, key, stored).await {
                synced += 1;
            } else {
                warn!("Failed to sync key {} to {} after retries", key, peer);
            }
        }

        debug!(
            "Direct sync complete: {}/{} keys sent to {}",
            synced,
            entries.len(),
            peer
        );
    }

    /// The traffic-reducing strategy: compare per-bucket merkle roots and
    /// sync only keys in buckets that differ. Falls back to the full sweep
    /// when the peer's tree cannot be fetched.
    pub async fn merkle_sync_with_node(&self, peer: &str) {
        for bucket in 0..MERKLE_BUCKETS {
            let local = self.build_bucket_tree(bucket);

            let Some(remote) = self.fetch_peer_tree(peer, bucket).await else {
                warn!(
                    "Could not fetch merkle bucket {} from {}, falling back to direct sync",
                    bucket, peer
                );
                self.direct_sync_with_node(peer).await;
                return;
            };

            if local.root() == remote.root() {
                continue;
            }

            let diffs = local.differing_keys(&remote);
            debug!("Bucket {} differs from {}: {} keys", bucket, peer, diffs.len());

            for key in diffs {
                // Keys only the peer holds flow back on its own sweep.
                let Some(stored) = self.storage.get(&key) else {
                    continue;
                };
                if !self.sync_key_with_retry(peer, &key, &stored).await {
                    warn!("Failed to sync key {} to {} after retries", key, peer);
                }
            }
        }
    }

    async fn sync_key_with_retry(&self, peer: &str, key: &str, stored: &StoredValue) -> bool {
        for _ in 0..SYNC_ATTEMPTS {
            if self.force_sync_key(peer, key, stored).await {
                return true;
            }
            tokio::time::sleep(SYNC_RETRY_DELAY).await;
        }
        false
    }

    async fn force_sync_key(&self, peer: &str, key: &str, stored: &StoredValue) -> bool {
        let Some((host, port)) = self.gossip.address_of(peer) else {
            return false;
        };

        let url = format!("http://{}:{}/internal/kv/{}", host, port, key);
        let body = InternalPutRequest {
            value: stored.value.clone(),
            vector_clock: stored.vector_clock.clone(),
            timestamp: now_ms(),
            is_hint: false,
            force_sync: true,
            force_key: false,
            origin_node: Some(self.node_id().to_string()),
        };

        match self
            .client
            .put(&url)
            .json(&body)
            .timeout(SYNC_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Sync of key {} to {} failed: {}", key, peer, e);
                false
            }
        }
    }

    /// Builds the merkle tree over the local keys in `bucket`.
    pub fn build_bucket_tree(&self, bucket: u64) -> MerkleTree {
        let mut data = BTreeMap::new();
        self.storage.iterate(&mut |key, stored| {
            if hash_key(key) % MERKLE_BUCKETS == bucket {
                data.insert(key.to_string(), canonical_value(&stored.value));
            }
            true
        });
        MerkleTree::build(&data)
    }

    async fn fetch_peer_tree(&self, peer: &str, bucket: u64) -> Option<MerkleTree> {
        let (host, port) = self.gossip.address_of(peer)?;
        let url = format!("http://{}:{}/internal/merkle/{}", host, port, bucket);

        let resp = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .ok()?;

        if !resp.status().is_success() {
            return None;
        }
        resp.json::<MerkleTree>().await.ok()
    }

    fn snapshot_entries(&self) -> Vec<(String, StoredValue)> {
        let mut entries = Vec::new();
        self.storage.iterate(&mut |key, stored| {
            entries.push((key.to_string(), stored.clone()));
            true
        });
        entries
    }
}
