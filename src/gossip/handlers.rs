//! Gossip API Handlers
//!
//! HTTP endpoints for the membership layer: peers push their view to
//! `/internal/gossip`, operators read the merged view from `/admin/cluster`.

use axum::{extract::Extension, http::StatusCode, Json};
use std::collections::HashMap;
use std::sync::Arc;

use super::service::{GossipService, MemberInfo};
use super::types::GossipPayload;

/// `POST /internal/gossip`: merge a peer's member table into ours.
pub async fn handle_gossip(
    Extension(gossip): Extension<Arc<GossipService>>,
    Json(payload): Json<GossipPayload>,
) -> StatusCode {
    gossip.handle_gossip(payload);
    StatusCode::OK
}

/// `GET /admin/cluster`: the full membership view, self included.
pub async fn handle_cluster_info(
    Extension(gossip): Extension<Arc<GossipService>>,
) -> Json<HashMap<String, MemberInfo>> {
    Json(gossip.cluster_state())
}
