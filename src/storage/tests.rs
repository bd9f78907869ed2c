#[cfg(test)]
mod tests {
    use crate::clock::VectorClock;
    use crate::storage::{MemoryStorage, SledStorage, Storage, StoredValue};
    use serde_json::json;

    fn sample(value: serde_json::Value, node: &str) -> StoredValue {
        let mut clock = VectorClock::new();
        clock.increment(node);
        StoredValue::new(value, clock)
    }

    // ============================================================
    // MEMORY STORAGE
    // ============================================================

    #[test]
    fn test_memory_put_and_get() {
        let store = MemoryStorage::new();
        let value = sample(json!("hello"), "nodeA");

        store.put("mykey", value.clone()).unwrap();
        let loaded = store.get("mykey").unwrap();

        assert_eq!(loaded.value, json!("hello"));
        assert_eq!(loaded.vector_clock, value.vector_clock);
    }

    #[test]
    fn test_memory_get_missing() {
        let store = MemoryStorage::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_memory_overwrite() {
        let store = MemoryStorage::new();
        store.put("k", sample(json!("v1"), "nodeA")).unwrap();
        store.put("k", sample(json!("v2"), "nodeA")).unwrap();

        assert_eq!(store.get("k").unwrap().value, json!("v2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_iterate_visits_all() {
        let store = MemoryStorage::new();
        for i in 0..10 {
            store
                .put(&format!("key-{}", i), sample(json!(i), "nodeA"))
                .unwrap();
        }

        let mut seen = 0;
        store.iterate(&mut |_, _| {
            seen += 1;
            true
        });
        assert_eq!(seen, 10);
    }

    #[test]
    fn test_memory_iterate_stops_early() {
        let store = MemoryStorage::new();
        for i in 0..10 {
            store
                .put(&format!("key-{}", i), sample(json!(i), "nodeA"))
                .unwrap();
        }

        let mut seen = 0;
        store.iterate(&mut |_, _| {
            seen += 1;
            seen < 3
        });
        assert_eq!(seen, 3);
    }

    // ============================================================
    // SLED STORAGE
    // ============================================================

    #[test]
    fn test_sled_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStorage::open_at(dir.path()).unwrap();

        let value = sample(json!({"name": "alice", "age": 30}), "nodeB");
        store.put("user:1", value.clone()).unwrap();

        let loaded = store.get("user:1").unwrap();
        assert_eq!(loaded.value, value.value);
        assert_eq!(loaded.vector_clock, value.vector_clock);
        assert!(store.get("user:2").is_none());

        store.close().unwrap();
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStorage::open_at(dir.path()).unwrap();
            store.put("durable", sample(json!("ft"), "nodeA")).unwrap();
            store.close().unwrap();
        }

        let store = SledStorage::open_at(dir.path()).unwrap();
        assert_eq!(store.get("durable").unwrap().value, json!("ft"));
    }

    #[test]
    fn test_sled_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStorage::open_at(dir.path()).unwrap();
        store.put("a", sample(json!(1), "nodeA")).unwrap();
        store.put("b", sample(json!(2), "nodeA")).unwrap();

        let mut keys = Vec::new();
        store.iterate(&mut |k, _| {
            keys.push(k.to_string());
            true
        });
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    // ============================================================
    // ON-DISK FORMAT
    // ============================================================

    #[test]
    fn test_stored_value_json_shape() {
        let mut value = sample(json!("primary"), "nodeA");
        value.conflicts.push(sample(json!("sibling"), "nodeB"));

        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded["value"], json!("primary"));
        assert_eq!(encoded["vector_clock"], json!({"nodeA": 1}));
        assert_eq!(encoded["conflicts"][0]["value"], json!("sibling"));
        assert!(encoded["timestamp"].is_u64());

        let decoded: StoredValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_stored_value_conflicts_omitted_when_empty() {
        let value = sample(json!(42), "nodeA");
        let encoded = serde_json::to_value(&value).unwrap();
        assert!(encoded.get("conflicts").is_none());
    }
}
