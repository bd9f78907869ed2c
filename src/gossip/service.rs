use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::types::{GossipPayload, Member, MemberState, NodeStatus};
use crate::config::Config;
use crate::storage::now_ms;

/// Peers contacted per emission tick.
const FANOUT: usize = 2;
/// Silence before a peer is suspected.
const SUSPICION_TIMEOUT: Duration = Duration::from_secs(3);
/// Silence before a suspected peer is declared down.
const FAILURE_TIMEOUT: Duration = Duration::from_secs(6);
/// Unknown nodes are inserted with their last-seen backdated by this much,
/// so they start out suspected rather than alive.
const UNKNOWN_NODE_BACKDATE: Duration = Duration::from_secs(4);

pub struct GossipService {
    node_id: String,
    host: String,
    port: u16,
    heartbeat: AtomicU64,
    self_last_seen: Mutex<Instant>,
    pub(crate) members: DashMap<String, Member>,
    client: reqwest::Client,
    gossip_interval: Duration,
    failure_check_interval: Duration,
    gossip_timeout: Duration,
    /// Node ids whose heartbeat advanced out of suspected/down; drained by
    /// the coordinator to trigger hint replay.
    recovery_tx: mpsc::UnboundedSender<String>,
}

impl GossipService {
    pub fn new(config: &Config, recovery_tx: mpsc::UnboundedSender<String>) -> Arc<Self> {
        let members = DashMap::new();
        for peer in &config.peers {
            if peer.node_id == config.node_id {
                continue;
            }
            members.insert(
                peer.node_id.clone(),
                Member {
                    node_id: peer.node_id.clone(),
                    host: peer.host.clone(),
                    port: peer.port,
                    heartbeat: 0,
                    status: NodeStatus::Alive,
                    last_seen: Instant::now(),
                },
            );
        }

        Arc::new(Self {
            node_id: config.node_id.clone(),
            host: config.host.clone(),
            port: config.port,
            heartbeat: AtomicU64::new(0),
            self_last_seen: Mutex::new(Instant::now()),
            members,
            client: reqwest::Client::new(),
            gossip_interval: config.gossip_interval(),
            failure_check_interval: config.failure_check_interval(),
            gossip_timeout: config.gossip_timeout(),
            recovery_tx,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Spawns the emission and failure-detection loops.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("Starting gossip service on {}", self.node_id);

        let emitter = self.clone();
        let emitter_shutdown = shutdown.clone();
        tokio::spawn(async move {
            emitter.emission_loop(emitter_shutdown).await;
        });

        let detector = self;
        tokio::spawn(async move {
            detector.failure_detection_loop(shutdown).await;
        });
    }

    async fn emission_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.gossip_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Gossip emission loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.clone().emit_round();
                }
            }
        }
    }

    fn emit_round(self: Arc<Self>) {
        self.heartbeat.fetch_add(1, Ordering::Relaxed);
        *lock(&self.self_last_seen) = Instant::now();

        let mut targets: Vec<Member> = self
            .members
            .iter()
            .filter(|entry| entry.value().status != NodeStatus::Down)
            .filter(|entry| !entry.value().host.is_empty())
            .map(|entry| entry.value().clone())
            .collect();

        if targets.is_empty() {
            return;
        }

        targets.shuffle(&mut rand::thread_rng());
        targets.truncate(FANOUT);

        let payload = self.build_payload();
        for target in targets {
            let service = self.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                service.send_gossip_to(&target, payload).await;
            });
        }
    }

    async fn send_gossip_to(&self, target: &Member, payload: GossipPayload) {
        let url = format!("http://{}:{}/internal/gossip", target.host, target.port);
        let result = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(self.gossip_timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!("Gossiped to {}", target.node_id);
            }
            Ok(resp) => {
                debug!("Gossip to {} returned {}", target.node_id, resp.status());
            }
            Err(e) => {
                debug!("Gossip to {} failed: {}", target.node_id, e);
            }
        }
    }

    fn build_payload(&self) -> GossipPayload {
        let members = self
            .members
            .iter()
            .map(|entry| {
                let member = entry.value();
                (
                    member.node_id.clone(),
                    MemberState {
                        host: member.host.clone(),
                        port: member.port,
                        heartbeat: member.heartbeat,
                        status: member.status,
                    },
                )
            })
            .collect();

        GossipPayload {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
            heartbeat: self.heartbeat.load(Ordering::Relaxed),
            members,
        }
    }

    async fn failure_detection_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.failure_check_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Failure detection loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.check_member_statuses();
                }
            }
        }
    }

    fn check_member_statuses(&self) {
        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();
            let elapsed = member.last_seen.elapsed();

            let next = if elapsed > FAILURE_TIMEOUT {
                NodeStatus::Down
            } else if elapsed > SUSPICION_TIMEOUT {
                NodeStatus::Suspected
            } else {
                NodeStatus::Alive
            };

            if next != member.status {
                info!(
                    "Node {} status changed: {} -> {} (last seen {:?} ago)",
                    member.node_id, member.status, next, elapsed
                );
                member.status = next;
            }
        }
    }

    /// Merges an incoming gossip payload into the local member view. The
    /// sender itself is marked alive, since we just heard from it directly.
    pub fn handle_gossip(&self, payload: GossipPayload) {
        self.update_member(Member {
            node_id: payload.node_id.clone(),
            host: payload.host.clone(),
            port: payload.port,
            heartbeat: payload.heartbeat,
            status: NodeStatus::Alive,
            last_seen: Instant::now(),
        });

        for (node_id, state) in payload.members {
            self.update_member(Member {
                node_id,
                host: state.host,
                port: state.port,
                heartbeat: state.heartbeat,
                status: state.status,
                last_seen: Instant::now(),
            });
        }
    }

    /// Merge rules for a single member record:
    /// 1. never accept peer updates about self;
    /// 2. unknown members are inserted as-is;
    /// 3. a strictly higher heartbeat adopts counter, address and (if alive)
    ///    status, firing a recovery event when it lifts a suspected/down peer;
    /// 4. second-hand down reports only downgrade to suspected;
    /// 5. last-seen is always refreshed, since we just heard a reference.
    fn update_member(&self, incoming: Member) {
        if incoming.node_id == self.node_id {
            *lock(&self.self_last_seen) = Instant::now();
            return;
        }

        match self.members.entry(incoming.node_id.clone()) {
            Entry::Vacant(vacant) => {
                info!("Discovered new member {} via gossip", incoming.node_id);
                vacant.insert(incoming);
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();

                if incoming.heartbeat > current.heartbeat {
                    debug!(
                        "Node {} heartbeat advanced: {} -> {}",
                        incoming.node_id, current.heartbeat, incoming.heartbeat
                    );

                    let recovered = current.status != NodeStatus::Alive
                        && incoming.status == NodeStatus::Alive;

                    current.heartbeat = incoming.heartbeat;
                    current.host = incoming.host;
                    current.port = incoming.port;

                    if incoming.status == NodeStatus::Alive {
                        if current.status != NodeStatus::Alive {
                            info!(
                                "Node {} status changed: {} -> alive",
                                incoming.node_id, current.status
                            );
                        }
                        current.status = NodeStatus::Alive;
                    }

                    if recovered {
                        info!("Node {} came back online", incoming.node_id);
                        let _ = self.recovery_tx.send(incoming.node_id.clone());
                    }
                }

                if incoming.status == NodeStatus::Down && current.status != NodeStatus::Down {
                    warn!(
                        "Second-hand report that node {} is down, marking suspected",
                        incoming.node_id
                    );
                    current.status = NodeStatus::Suspected;
                }

                current.last_seen = Instant::now();
            }
        }
    }

    /// Synchronous liveness check used by the coordinator. A node's view of
    /// itself is always alive; unknown peers are inserted as suspected with
    /// a backdated last-seen so they are not treated as healthy.
    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        if node_id == self.node_id {
            return NodeStatus::Alive;
        }

        if let Some(member) = self.members.get(node_id) {
            return member.status;
        }

        warn!("No status information for unknown node {}", node_id);
        let last_seen = Instant::now()
            .checked_sub(UNKNOWN_NODE_BACKDATE)
            .unwrap_or_else(Instant::now);
        self.members.insert(
            node_id.to_string(),
            Member {
                node_id: node_id.to_string(),
                host: String::new(),
                port: 0,
                heartbeat: 0,
                status: NodeStatus::Suspected,
                last_seen,
            },
        );

        NodeStatus::Suspected
    }

    /// Resolves a peer's HTTP address, if known.
    pub fn address_of(&self, node_id: &str) -> Option<(String, u16)> {
        if node_id == self.node_id {
            return Some((self.host.clone(), self.port));
        }

        let member = self.members.get(node_id)?;
        if member.host.is_empty() {
            return None;
        }
        Some((member.host.clone(), member.port))
    }

    pub fn alive_members(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|entry| entry.value().status == NodeStatus::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Full cluster view for `/admin/cluster`, self included.
    pub fn cluster_state(&self) -> HashMap<String, MemberInfo> {
        let mut state = HashMap::new();

        state.insert(
            self.node_id.clone(),
            MemberInfo {
                host: self.host.clone(),
                port: self.port,
                status: NodeStatus::Alive,
                heartbeat: self.heartbeat.load(Ordering::Relaxed),
                last_seen: wall_clock_of(*lock(&self.self_last_seen)),
            },
        );

        for entry in self.members.iter() {
            let member = entry.value();
            state.insert(
                member.node_id.clone(),
                MemberInfo {
                    host: member.host.clone(),
                    port: member.port,
                    status: member.status,
                    heartbeat: member.heartbeat,
                    last_seen: wall_clock_of(member.last_seen),
                },
            );
        }

        state
    }
}

/// One row of the admin cluster view. `last_seen` is milliseconds since the
/// Unix epoch, derived from the local monotonic timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub heartbeat: u64,
    pub last_seen: u64,
}

fn wall_clock_of(last_seen: Instant) -> u64 {
    now_ms().saturating_sub(last_seen.elapsed().as_millis() as u64)
}

fn lock(mutex: &Mutex<Instant>) -> std::sync::MutexGuard<'_, Instant> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
