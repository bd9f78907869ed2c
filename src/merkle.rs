//! Merkle Trees
//!
//! Bottom-up binary hash trees over key/value snapshots, used by
//! anti-entropy to cheaply decide whether two replicas diverge and, if so,
//! which keys differ.
//!
//! ## Construction
//! Keys are sorted ascending and each leaf is `SHA-256("<key>:<value>")`.
//! Levels pair left-to-right, duplicating the last element when a level is
//! odd, until a single root remains. Identical snapshots therefore produce
//! identical roots on any node.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Canonical string form of a stored value, used for leaf hashing. Relies on
/// serde_json's sorted object keys so the same value always formats the same.
pub fn canonical_value(value: &Value) -> String {
    value.to_string()
}

/// A hash tree over a snapshot of keys. Serialized whole for the
/// `/internal/merkle/{bucket}` exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MerkleTree {
    /// Leaf hashes in sorted-key order.
    leaves: Vec<String>,
    /// All levels bottom-up; the last level holds the root.
    levels: Vec<Vec<String>>,
    /// Leaf hash -> key, for mapping differing leaves back to keys.
    key_map: HashMap<String, String>,
}

impl MerkleTree {
    /// Builds a tree over `data` (key -> canonical value string).
    pub fn build(data: &BTreeMap<String, String>) -> Self {
        let mut tree = Self::default();

        for (key, value) in data {
            let leaf = hash_leaf(key, value);
            tree.key_map.insert(leaf.clone(), key.clone());
            tree.leaves.push(leaf);
        }

        tree.build_levels();
        tree
    }

    fn build_levels(&mut self) {
        self.levels = vec![self.leaves.clone()];
        let mut current = self.leaves.clone();

        while current.len() > 1 {
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(hex::encode(Sha256::digest(format!("{}{}", left, right))));
            }
            self.levels.push(next.clone());
            current = next;
        }
    }

    /// The tree's fingerprint; empty string for an empty tree.
    pub fn root(&self) -> &str {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Keys whose leaves differ between the two trees (symmetric difference
    /// of the leaf sets, mapped back through each side's key index). Returns
    /// an empty list when the roots already match.
    pub fn differing_keys(&self, other: &MerkleTree) -> Vec<String> {
        if self.root() == other.root() {
            return Vec::new();
        }

        let mine: HashSet<&String> = self.leaves.iter().collect();
        let theirs: HashSet<&String> = other.leaves.iter().collect();
        let mut diffs = HashSet::new();

        for leaf in self.leaves.iter().filter(|leaf| !theirs.contains(leaf)) {
            if let Some(key) = self.key_map.get(leaf) {
                diffs.insert(key.clone());
            }
        }
        for leaf in other.leaves.iter().filter(|leaf| !mine.contains(leaf)) {
            if let Some(key) = other.key_map.get(leaf) {
                diffs.insert(key.clone());
            }
        }

        let mut result: Vec<String> = diffs.into_iter().collect();
        result.sort();
        result
    }
}

fn hash_leaf(key: &str, value: &str) -> String {
    hex::encode(Sha256::digest(format!("{}:{}", key, value)))
}
