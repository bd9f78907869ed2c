//! Coordinator API Handlers
//!
//! Translates the client, internal and admin HTTP surfaces into coordinator
//! calls. Handlers receive the coordinator by dependency injection through
//! an axum `Extension`; there is no process-wide singleton.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use sysinfo::{CpuExt, System, SystemExt};

use super::anti_entropy::MERKLE_BUCKETS;
use super::protocol::{
    AdminSyncRequest, AdminSyncResponse, ClientGetResponse, ClientPutResponse, ErrorResponse,
    InternalPutRequest, PutAck, StoreHintRequest,
};
use super::service::Coordinator;
use super::types::KvError;
use crate::stats::StatsSummary;
use crate::storage::StoredValue;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn format_result(stored: StoredValue) -> ClientGetResponse {
    let conflicts = if stored.conflicts.is_empty() {
        None
    } else {
        Some(
            stored
                .conflicts
                .into_iter()
                .map(|sibling| sibling.value)
                .collect(),
        )
    };

    ClientGetResponse {
        value: stored.value,
        vector_clock: stored.vector_clock,
        conflicts,
    }
}

/// `GET /kv/{key}`: quorum read with reconciliation.
pub async fn handle_get(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
) -> Response {
    match coordinator.clone().get(&key).await {
        Ok(stored) => (StatusCode::OK, Json(format_result(stored))).into_response(),
        Err(KvError::NotFound) => error_response(StatusCode::NOT_FOUND, "Key not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `PUT /kv/{key}`: quorum write. The body must carry a `value` field.
pub async fn handle_put(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(value) = body.get("value").cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "No value provided");
    };

    match coordinator.clone().put(&key, value).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(ClientPutResponse {
                key,
                status: "stored".to_string(),
                node: coordinator.node_id().to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /internal/kv/{key}`: local-only read, hint buffer included.
pub async fn handle_internal_get(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
) -> Response {
    match coordinator.local_get(&key) {
        Some(stored) => (StatusCode::OK, Json(stored)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Key not found"),
    }
}

/// `PUT /internal/kv/{key}`: replicated, hint or forced write. Hints skip
/// clock gating; everything else goes through the causal merge.
pub async fn handle_internal_put(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
    Json(request): Json<InternalPutRequest>,
) -> Response {
    let result = if request.is_hint {
        coordinator.apply_hint(&key, request)
    } else {
        if request.force_sync || request.force_key {
            tracing::debug!(
                "Forced sync for key {} from {}",
                key,
                request.origin_node.as_deref().unwrap_or("unknown")
            );
        }
        coordinator.apply_local_put(&key, request.value, request.vector_clock)
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(PutAck { success: true })).into_response(),
        Err(e) => {
            tracing::error!("Internal put for key {} failed: {}", key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PutAck { success: false }),
            )
                .into_response()
        }
    }
}

/// `PUT /internal/repair/{key}`: unconditional repair write carrying the
/// reconciled version and its sibling list.
pub async fn handle_repair(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(key): Path<String>,
    Json(repaired): Json<StoredValue>,
) -> Response {
    let sibling_count = repaired.conflicts.len();
    match coordinator.apply_repair(&key, repaired) {
        Ok(()) => {
            tracing::debug!("Repaired key {} with {} siblings", key, sibling_count);
            (StatusCode::OK, Json(PutAck { success: true })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /internal/merkle/{bucket}`: serialized tree over the local keys in
/// the bucket.
pub async fn handle_merkle(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(bucket): Path<u64>,
) -> Response {
    if bucket >= MERKLE_BUCKETS {
        return error_response(StatusCode::BAD_REQUEST, "Invalid bucket ID");
    }
    (StatusCode::OK, Json(coordinator.build_bucket_tree(bucket))).into_response()
}

/// `POST /internal/store-hint`: buffer a hint on this node.
pub async fn handle_store_hint(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(request): Json<StoreHintRequest>,
) -> Response {
    coordinator.store_hint(
        &request.target_node,
        &request.key,
        request.value,
        request.vector_clock,
    );
    (StatusCode::OK, Json(PutAck { success: true })).into_response()
}

/// `POST /admin/sync`: trigger anti-entropy. With a `node` in the body the
/// merkle-guided targeted sync runs against that peer; otherwise a full
/// cluster sweep starts.
pub async fn handle_admin_sync(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    body: Option<Json<AdminSyncRequest>>,
) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    match request.node {
        Some(target) => {
            if target == coordinator.node_id() {
                return error_response(StatusCode::BAD_REQUEST, "Cannot sync with self");
            }
            let this = coordinator.clone();
            let status = format!("Sync started with node {}", target);
            tokio::spawn(async move {
                this.merkle_sync_with_node(&target).await;
            });
            (StatusCode::OK, Json(AdminSyncResponse { status })).into_response()
        }
        None => {
            let this = coordinator.clone();
            tokio::spawn(async move {
                this.sync_all_peers().await;
            });
            (
                StatusCode::OK,
                Json(AdminSyncResponse {
                    status: "Cluster sync started".to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct AdminStatsResponse {
    pub node_id: String,
    pub key_count: u64,
    /// Estimated footprint of the local store, keys included.
    pub data_size_bytes: u64,
    pub pending_hints: usize,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
    #[serde(flatten)]
    pub summary: StatsSummary,
}

/// `GET /admin/stats`: operation counters plus host resource usage.
pub async fn handle_admin_stats(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<AdminStatsResponse> {
    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo reports memory in bytes.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    let (key_count, data_size_bytes) = coordinator.storage_footprint();

    Json(AdminStatsResponse {
        node_id: coordinator.node_id().to_string(),
        key_count,
        data_size_bytes,
        pending_hints: coordinator.pending_hint_count(),
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
        summary: coordinator.stats().summary(),
    })
}
