use anyhow::{Context, Result};
use std::path::Path;

use super::types::StoredValue;
use super::Storage;

/// Persistent storage backed by an embedded sled tree.
///
/// Values are stored as the JSON encoding of [`StoredValue`], one tree entry
/// per key. Entries that fail to decode (e.g. after a format change) are
/// logged and treated as absent rather than poisoning reads.
pub struct SledStorage {
    db: sled::Db,
    path: String,
}

impl SledStorage {
    /// Opens (creating if needed) the store for `node_id` under `data/`.
    pub fn open(node_id: &str) -> Result<Self> {
        let dir = Path::new("data").join(node_id);
        Self::open_at(&dir)
    }

    pub fn open_at(dir: &Path) -> Result<Self> {
        tracing::info!("Opening sled store at {}", dir.display());
        let db = sled::open(dir)
            .with_context(|| format!("failed to open sled store at {}", dir.display()))?;

        Ok(Self {
            db,
            path: dir.display().to_string(),
        })
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &str) -> Option<StoredValue> {
        let bytes = match self.db.get(key.as_bytes()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Failed to read key {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Corrupt entry for key {}: {}", key, e);
                None
            }
        }
    }

    fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        let bytes = serde_json::to_vec(&value).context("failed to encode stored value")?;
        self.db
            .insert(key.as_bytes(), bytes)
            .with_context(|| format!("failed to write key {}", key))?;
        Ok(())
    }

    fn iterate(&self, visit: &mut dyn FnMut(&str, &StoredValue) -> bool) {
        for item in self.db.iter() {
            let (key_bytes, value_bytes) = match item {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("Iteration error: {}", e);
                    continue;
                }
            };

            let key = match std::str::from_utf8(&key_bytes) {
                Ok(key) => key,
                Err(_) => continue,
            };

            match serde_json::from_slice::<StoredValue>(&value_bytes) {
                Ok(value) => {
                    if !visit(key, &value) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping corrupt entry for key {}: {}", key, e);
                }
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.db.flush().context("failed to flush sled store")?;
        Ok(())
    }

    fn path(&self) -> &str {
        &self.path
    }
}
