//! Wire Protocol
//!
//! Route constants and the DTOs exchanged over the client, internal and
//! admin HTTP APIs. Everything is JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::VectorClock;

// --- Routes ---

/// Public read/write endpoint.
pub const ENDPOINT_KV: &str = "/kv/:key";
/// Replicated / hint / forced internal write, local-only internal read.
pub const ENDPOINT_INTERNAL_KV: &str = "/internal/kv/:key";
/// Unconditional repair write.
pub const ENDPOINT_INTERNAL_REPAIR: &str = "/internal/repair/:key";
/// Gossip exchange.
pub const ENDPOINT_INTERNAL_GOSSIP: &str = "/internal/gossip";
/// Per-bucket merkle tree for anti-entropy.
pub const ENDPOINT_INTERNAL_MERKLE: &str = "/internal/merkle/:bucket";
/// Externally-requested hint enqueue.
pub const ENDPOINT_INTERNAL_STORE_HINT: &str = "/internal/store-hint";
/// Cluster membership view.
pub const ENDPOINT_ADMIN_CLUSTER: &str = "/admin/cluster";
/// Manual anti-entropy trigger.
pub const ENDPOINT_ADMIN_SYNC: &str = "/admin/sync";
/// Operation statistics.
pub const ENDPOINT_ADMIN_STATS: &str = "/admin/stats";

// --- Data Transfer Objects ---

/// Client-facing result of a reconciled read. Sibling values appear in
/// `conflicts` only when concurrent writes are still unresolved.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientGetResponse {
    pub value: Value,
    pub vector_clock: VectorClock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<Value>>,
}

/// Acknowledgement of a client write.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientPutResponse {
    pub key: String,
    pub status: String,
    /// The coordinator that handled the write.
    pub node: String,
}

/// Body of an internal replicated write. The flags change how the receiver
/// applies it: hints bypass clock gating entirely; forced syncs go through
/// the normal causal merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalPutRequest {
    pub value: Value,
    #[serde(default)]
    pub vector_clock: VectorClock,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub is_hint: bool,
    #[serde(default)]
    pub force_sync: bool,
    #[serde(default)]
    pub force_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_node: Option<String>,
}

/// Acknowledgement of an internal write.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutAck {
    pub success: bool,
}

/// External request to buffer a hint on this node.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreHintRequest {
    pub target_node: String,
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub vector_clock: VectorClock,
}

/// Optional body of `/admin/sync`; names a single peer to target.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AdminSyncRequest {
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminSyncResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
