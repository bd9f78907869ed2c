//! Replication Coordinator
//!
//! Every node runs one of these. It accepts client reads and writes, maps
//! keys through the ring to a preference list of N replicas, and drives the
//! quorum protocol against them.
//!
//! ## Core Concepts
//! - **Tunable Quorums**: a write succeeds once W replicas acknowledge, a
//!   read once R replicas answer; R + W > N keeps the sets overlapping.
//! - **Sloppy Quorum**: when a preferred replica is down, the next healthy
//!   node stands in and the write is buffered as a hint for the owner.
//! - **Read Repair**: after reconciling a read, stale or empty replicas are
//!   healed in the background with the merged version.
//! - **Hinted Handoff**: a worker replays buffered hints once their target
//!   is reported alive again.
//! - **Anti-Entropy**: a periodic sweep pushes every local key to every live
//!   peer; a merkle-guided variant syncs only divergent buckets.

pub mod anti_entropy;
pub mod handlers;
pub mod hints;
pub mod protocol;
pub mod service;
pub mod types;


pub use hints::HintStore;
pub use service::Coordinator;
pub use types::{HintedWrite, KvError};
