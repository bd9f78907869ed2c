#[cfg(test)]
mod tests {
    use crate::config::{Config, PeerConfig};
    use crate::gossip::service::GossipService;
    use crate::gossip::types::{GossipPayload, Member, MemberState, NodeStatus};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;

    fn test_config(node_id: &str, peers: &[(&str, u16)]) -> Config {
        Config {
            node_id: node_id.to_string(),
            host: "localhost".to_string(),
            port: 8000,
            peers: peers
                .iter()
                .map(|(id, port)| PeerConfig {
                    node_id: id.to_string(),
                    host: "localhost".to_string(),
                    port: *port,
                })
                .collect(),
            replication_factor: 3,
            read_quorum: 2,
            write_quorum: 2,
            gossip_interval_ms: 500,
            failure_check_interval_ms: 1000,
            gossip_timeout_ms: 1000,
        }
    }

    fn service(node_id: &str, peers: &[(&str, u16)]) -> Arc<GossipService> {
        let (tx, _rx) = mpsc::unbounded_channel();
        GossipService::new(&test_config(node_id, peers), tx)
    }

    fn payload_from(node_id: &str, heartbeat: u64, members: &[(&str, u64, NodeStatus)]) -> GossipPayload {
        let members: HashMap<String, MemberState> = members
            .iter()
            .map(|(id, hb, status)| {
                (
                    id.to_string(),
                    MemberState {
                        host: "localhost".to_string(),
                        port: 9000,
                        heartbeat: *hb,
                        status: *status,
                    },
                )
            })
            .collect();

        GossipPayload {
            node_id: node_id.to_string(),
            host: "localhost".to_string(),
            port: 8001,
            heartbeat,
            members,
        }
    }

    // ============================================================
    // CONSTRUCTION
    // ============================================================

    #[tokio::test]
    async fn test_seed_peers_start_alive() {
        let gossip = service("nodeA", &[("nodeB", 8001), ("nodeC", 8002)]);

        assert_eq!(gossip.node_status("nodeB"), NodeStatus::Alive);
        assert_eq!(gossip.node_status("nodeC"), NodeStatus::Alive);
        assert_eq!(gossip.alive_members().len(), 2);
    }

    #[tokio::test]
    async fn test_self_is_always_alive() {
        let gossip = service("nodeA", &[]);
        assert_eq!(gossip.node_status("nodeA"), NodeStatus::Alive);
    }

    #[tokio::test]
    async fn test_unknown_node_inserted_as_suspected() {
        let gossip = service("nodeA", &[]);

        assert_eq!(gossip.node_status("ghost"), NodeStatus::Suspected);
        // Second lookup reads the inserted record.
        assert_eq!(gossip.node_status("ghost"), NodeStatus::Suspected);
    }

    // ============================================================
    // MERGE RULES
    // ============================================================

    #[tokio::test]
    async fn test_sender_marked_alive() {
        let gossip = service("nodeA", &[]);

        gossip.handle_gossip(payload_from("nodeB", 5, &[]));
        assert_eq!(gossip.node_status("nodeB"), NodeStatus::Alive);
        assert_eq!(gossip.address_of("nodeB"), Some(("localhost".to_string(), 8001)));
    }

    #[tokio::test]
    async fn test_unknown_member_inserted_from_table() {
        let gossip = service("nodeA", &[]);

        gossip.handle_gossip(payload_from("nodeB", 1, &[("nodeC", 3, NodeStatus::Alive)]));
        assert_eq!(gossip.node_status("nodeC"), NodeStatus::Alive);
    }

    #[tokio::test]
    async fn test_higher_heartbeat_adopts_status() {
        let gossip = service("nodeA", &[("nodeB", 8001)]);

        // Locally degrade nodeB, then hear a newer heartbeat saying alive.
        gossip.members.get_mut("nodeB").unwrap().status = NodeStatus::Suspected;
        gossip.handle_gossip(payload_from("nodeC", 1, &[("nodeB", 10, NodeStatus::Alive)]));

        assert_eq!(gossip.node_status("nodeB"), NodeStatus::Alive);
        let member = gossip.members.get("nodeB").unwrap();
        assert_eq!(member.heartbeat, 10);
    }

    #[tokio::test]
    async fn test_stale_heartbeat_does_not_regress() {
        let gossip = service("nodeA", &[("nodeB", 8001)]);
        gossip.members.get_mut("nodeB").unwrap().heartbeat = 20;

        gossip.handle_gossip(payload_from("nodeC", 1, &[("nodeB", 5, NodeStatus::Alive)]));
        assert_eq!(gossip.members.get("nodeB").unwrap().heartbeat, 20);
    }

    #[tokio::test]
    async fn test_second_hand_down_only_suspects() {
        let gossip = service("nodeA", &[("nodeB", 8001)]);

        gossip.handle_gossip(payload_from("nodeC", 1, &[("nodeB", 0, NodeStatus::Down)]));
        assert_eq!(gossip.node_status("nodeB"), NodeStatus::Suspected);
    }

    #[tokio::test]
    async fn test_peer_reports_about_self_are_ignored() {
        let gossip = service("nodeA", &[]);

        gossip.handle_gossip(payload_from("nodeB", 1, &[("nodeA", 99, NodeStatus::Down)]));
        assert_eq!(gossip.node_status("nodeA"), NodeStatus::Alive);
        assert!(!gossip.members.contains_key("nodeA"));
    }

    #[tokio::test]
    async fn test_recovery_event_fired_on_heartbeat_advance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gossip = GossipService::new(&test_config("nodeA", &[("nodeB", 8001)]), tx);

        gossip.members.get_mut("nodeB").unwrap().status = NodeStatus::Down;
        gossip.handle_gossip(payload_from("nodeC", 1, &[("nodeB", 7, NodeStatus::Alive)]));

        assert_eq!(rx.try_recv().unwrap(), "nodeB");
    }

    #[tokio::test]
    async fn test_no_recovery_event_without_heartbeat_advance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gossip = GossipService::new(&test_config("nodeA", &[("nodeB", 8001)]), tx);

        gossip.members.get_mut("nodeB").unwrap().status = NodeStatus::Down;
        gossip.members.get_mut("nodeB").unwrap().heartbeat = 10;
        gossip.handle_gossip(payload_from("nodeC", 1, &[("nodeB", 10, NodeStatus::Alive)]));

        assert!(rx.try_recv().is_err());
        // Last-seen was still refreshed (rule 5).
        let member = gossip.members.get("nodeB").unwrap();
        assert!(member.last_seen.elapsed() < Duration::from_secs(1));
    }

    // ============================================================
    // CLUSTER VIEW
    // ============================================================

    #[tokio::test]
    async fn test_cluster_state_includes_self() {
        let gossip = service("nodeA", &[("nodeB", 8001)]);

        let state = gossip.cluster_state();
        assert_eq!(state.len(), 2);
        assert_eq!(state["nodeA"].status, NodeStatus::Alive);
        assert_eq!(state["nodeA"].port, 8000);
        assert!(state["nodeB"].last_seen > 0);
    }

    #[tokio::test]
    async fn test_address_of_unknown_is_none() {
        let gossip = service("nodeA", &[]);
        assert!(gossip.address_of("ghost").is_none());

        // A status probe inserts the node with no address; it still must not
        // resolve to a dialable target.
        gossip.node_status("ghost");
        assert!(gossip.address_of("ghost").is_none());
    }

    #[tokio::test]
    async fn test_payload_serde_roundtrip() {
        let mut members = HashMap::new();
        members.insert(
            "nodeB".to_string(),
            MemberState {
                host: "localhost".to_string(),
                port: 8001,
                heartbeat: 4,
                status: NodeStatus::Suspected,
            },
        );
        let payload = GossipPayload {
            node_id: "nodeA".to_string(),
            host: "localhost".to_string(),
            port: 8000,
            heartbeat: 12,
            members,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""status":"suspected""#));

        let restored: GossipPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.heartbeat, 12);
        assert_eq!(restored.members["nodeB"].status, NodeStatus::Suspected);
    }

    #[test]
    fn test_member_clone_keeps_instant() {
        let member = Member {
            node_id: "nodeA".to_string(),
            host: "localhost".to_string(),
            port: 8000,
            heartbeat: 1,
            status: NodeStatus::Alive,
            last_seen: Instant::now(),
        };
        let copy = member.clone();
        assert_eq!(copy.node_id, member.node_id);
        assert_eq!(copy.status, NodeStatus::Alive);
    }
}
