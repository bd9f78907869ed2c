use anyhow::Result;
use dashmap::DashMap;

use super::types::StoredValue;
use super::Storage;

/// In-memory storage backed by a concurrent map.
///
/// Used by the test suite and by nodes run with `--ephemeral`; contents are
/// lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: DashMap<String, StoredValue>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn iterate(&self, visit: &mut dyn FnMut(&str, &StoredValue) -> bool) {
        for entry in self.data.iter() {
            if !visit(entry.key(), entry.value()) {
                break;
            }
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn path(&self) -> &str {
        ":memory:"
    }
}
