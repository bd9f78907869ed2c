use axum::{
    routing::{get, post, put},
    Extension, Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use quorumkv::config::Config;
use quorumkv::coordinator::handlers::{
    handle_admin_stats, handle_admin_sync, handle_get, handle_internal_get, handle_internal_put,
    handle_merkle, handle_put, handle_repair, handle_store_hint,
};
use quorumkv::coordinator::protocol::{
    ENDPOINT_ADMIN_CLUSTER, ENDPOINT_ADMIN_STATS, ENDPOINT_ADMIN_SYNC, ENDPOINT_INTERNAL_GOSSIP,
    ENDPOINT_INTERNAL_KV, ENDPOINT_INTERNAL_MERKLE, ENDPOINT_INTERNAL_REPAIR,
    ENDPOINT_INTERNAL_STORE_HINT, ENDPOINT_KV,
};
use quorumkv::coordinator::Coordinator;
use quorumkv::gossip::handlers::{handle_cluster_info, handle_gossip};
use quorumkv::gossip::GossipService;
use quorumkv::ring::ConsistentHashRing;
use quorumkv::stats::NodeStats;
use quorumkv::storage::{MemoryStorage, SledStorage, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut n_override: Option<usize> = None;
    let mut r_override: Option<usize> = None;
    let mut w_override: Option<usize> = None;
    let mut ephemeral = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--n" => {
                n_override = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--r" => {
                r_override = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--w" => {
                w_override = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--ephemeral" => {
                ephemeral = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    let Some(config_path) = config_path else {
        eprintln!("Usage: {} --config <path> [--n N] [--r R] [--w W] [--ephemeral]", args[0]);
        eprintln!("Example: {} --config config/nodeA.json", args[0]);
        std::process::exit(1);
    };

    let mut config = Config::load(&config_path)?;
    if let Some(n) = n_override {
        config.replication_factor = n;
    }
    if let Some(r) = r_override {
        config.read_quorum = r;
    }
    if let Some(w) = w_override {
        config.write_quorum = w;
    }
    // Overrides can break the quorum invariant just as easily as the file.
    config.validate()?;

    tracing::info!(
        "Starting node {} (N={}, R={}, W={})",
        config.node_id,
        config.replication_factor,
        config.read_quorum,
        config.write_quorum
    );

    // 1. Partitioning ring with self and all configured peers:
    let ring = Arc::new(ConsistentHashRing::new());
    ring.add_node(&config.node_id);
    for peer in &config.peers {
        ring.add_node(&peer.node_id);
    }
    tracing::info!("Ring initialized with {} nodes", ring.node_count());

    // 2. Storage layer:
    let storage: Arc<dyn Storage> = if ephemeral {
        tracing::warn!("Running with in-memory storage; data is lost on exit");
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(SledStorage::open(&config.node_id)?)
    };

    // 3. Gossip membership, wired to the coordinator's recovery listener:
    let stats = Arc::new(NodeStats::new());
    let (recovery_tx, recovery_rx) = mpsc::unbounded_channel();
    let gossip = GossipService::new(&config, recovery_tx);

    let coordinator = Coordinator::new(
        &config,
        ring.clone(),
        storage.clone(),
        gossip.clone(),
        stats.clone(),
    )?;

    // 4. Background workers, each stopping on the shared shutdown signal:
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    gossip.clone().start(shutdown_rx.clone());
    coordinator.clone().spawn_hint_worker(shutdown_rx.clone());
    coordinator.clone().spawn_anti_entropy_worker(shutdown_rx.clone());
    coordinator
        .clone()
        .spawn_recovery_worker(recovery_rx, shutdown_rx.clone());

    // 5. Stats reporter:
    {
        let stats = stats.clone();
        let gossip = gossip.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = interval.tick() => {
                        let summary = stats.summary();
                        tracing::info!(
                            "Operations: GET({}/{}) PUT({}/{})",
                            summary.operations.successful_gets,
                            summary.operations.get_count,
                            summary.operations.successful_puts,
                            summary.operations.put_count
                        );
                        tracing::info!(
                            "Hints: stored={} delivered={}; conflicts: detected={} resolved={}",
                            summary.features.hints_stored,
                            summary.features.hints_delivered,
                            summary.features.conflicts_detected,
                            summary.features.conflicts_resolved
                        );
                        tracing::info!("Cluster: {} alive peers", gossip.alive_members().len());
                    }
                }
            }
        });
    }

    // 6. HTTP surface:
    let app = Router::new()
        // Client API
        .route(ENDPOINT_KV, get(handle_get).put(handle_put))
        // Internal API
        .route(
            ENDPOINT_INTERNAL_KV,
            get(handle_internal_get).put(handle_internal_put),
        )
        .route(ENDPOINT_INTERNAL_REPAIR, put(handle_repair))
        .route(ENDPOINT_INTERNAL_GOSSIP, post(handle_gossip))
        .route(ENDPOINT_INTERNAL_MERKLE, get(handle_merkle))
        .route(ENDPOINT_INTERNAL_STORE_HINT, post(handle_store_hint))
        // Admin API
        .route(ENDPOINT_ADMIN_CLUSTER, get(handle_cluster_info))
        .route(ENDPOINT_ADMIN_SYNC, post(handle_admin_sync))
        .route(ENDPOINT_ADMIN_STATS, get(handle_admin_stats))
        .layer(Extension(coordinator.clone()))
        .layer(Extension(gossip.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Node {} listening on {}", config.node_id, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    storage.close()?;
    Ok(())
}
