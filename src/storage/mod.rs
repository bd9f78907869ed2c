//! Storage Layer
//!
//! The narrow persistence seam the coordinator writes through. The core only
//! needs five operations, so anything byte-addressed can sit behind the
//! [`Storage`] trait.
//!
//! ## Core Concepts
//! - **StoredValue**: the unit persisted per key: opaque JSON value, vector
//!   clock, unresolved sibling versions, and an informational timestamp. Its
//!   JSON encoding is the on-disk format.
//! - **Implementations**: `SledStorage` persists to an embedded sled tree;
//!   `MemoryStorage` keeps everything in a concurrent map for tests and
//!   ephemeral nodes.

pub mod disk;
pub mod memory;
pub mod types;

#[cfg(test)]
mod tests;

use anyhow::Result;

pub use disk::SledStorage;
pub use memory::MemoryStorage;
pub use types::{now_ms, StoredValue};

/// Pluggable key-value persistence. Implementations must be safe for
/// concurrent use; the coordinator performs read-modify-write only inside
/// its own local-put critical section.
pub trait Storage: Send + Sync {
    /// Fetches the stored value for `key`, if present.
    fn get(&self, key: &str) -> Option<StoredValue>;

    /// Stores `value` under `key`, replacing any previous entry.
    fn put(&self, key: &str, value: StoredValue) -> Result<()>;

    /// Visits every entry until the callback returns `false`.
    fn iterate(&self, visit: &mut dyn FnMut(&str, &StoredValue) -> bool);

    /// Flushes and releases the underlying store.
    fn close(&self) -> Result<()>;

    /// Filesystem location of the store, for diagnostics.
    fn path(&self) -> &str;
}
