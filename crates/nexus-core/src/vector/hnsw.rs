//! HNSW backend (USearch).

use std::collections::HashMap;
use std::path::Path;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::{CoreError, Result};

use super::{VectorStoreConfig, VectorStoreStats};

/// HNSW vector index keyed by chunk id
pub struct VectorStore {
    index: Index,
    config: VectorStoreConfig,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorStore {
    pub fn new() -> Result<Self> {
        Self::with_config(VectorStoreConfig::default())
    }

    pub fn with_config(config: VectorStoreConfig) -> Result<Self> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };

        let index = Index::new(&options)
            .map_err(|e| CoreError::Storage(format!("vector index creation failed: {}", e)))?;

        Ok(Self {
            index,
            config,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    fn reserve(&self, capacity: usize) -> Result<()> {
        self.index
            .reserve(capacity)
            .map_err(|e| CoreError::Storage(format!("vector index reserve failed: {}", e)))
    }

    /// Add or replace a vector under a chunk id.
    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(CoreError::Integrity(format!(
                "embedding dimension {} does not match index dimension {}",
                vector.len(),
                self.config.dimensions
            )));
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index
                .remove(existing_id)
                .map_err(|e| CoreError::Storage(format!("vector update failed: {}", e)))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| CoreError::Storage(format!("vector update failed: {}", e)))?;
            return Ok(());
        }

        // usearch requires reserved capacity ahead of add
        let capacity = self.index.capacity();
        let size = self.index.size();
        if size >= capacity {
            self.reserve(std::cmp::max(capacity * 2, 16))?;
        }

        let id = self.next_id;
        self.next_id += 1;

        self.index
            .add(id, vector)
            .map_err(|e| CoreError::Storage(format!("vector add failed: {}", e)))?;

        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());

        Ok(())
    }

    /// Remove a vector by chunk id. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| CoreError::Storage(format!("vector remove failed: {}", e)))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Remove a batch of ids (delete-by-filter support for the indexer).
    pub fn remove_many(&mut self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Approximate nearest neighbors. Returns `(chunk_id, l2_distance)`
    /// pairs; distance is in [0, 2] for unit-norm vectors.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.config.dimensions {
            return Err(CoreError::Integrity(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.config.dimensions
            )));
        }

        if self.is_empty() {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| CoreError::Storage(format!("vector search failed: {}", e)))?;

        let mut results = Vec::with_capacity(matches.keys.len());
        for (key, squared) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(chunk_id) = self.id_to_key.get(key) {
                results.push((chunk_id.clone(), squared.max(0.0).sqrt()));
            }
        }

        Ok(results)
    }

    /// Save the index plus key mappings alongside it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| CoreError::Storage("invalid index path".to_string()))?;

        self.index
            .save(path_str)
            .map_err(|e| CoreError::Storage(format!("vector index save failed: {}", e)))?;

        let mappings_path = path.with_extension("mappings.json");
        let mappings = serde_json::json!({
            "key_to_id": self.key_to_id,
            "next_id": self.next_id,
        });
        std::fs::write(&mappings_path, mappings.to_string())?;

        Ok(())
    }

    /// Load a previously saved index.
    pub fn load(path: &Path, config: VectorStoreConfig) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| CoreError::Storage("invalid index path".to_string()))?;

        let mut store = Self::with_config(config)?;
        store
            .index
            .load(path_str)
            .map_err(|e| CoreError::Storage(format!("vector index load failed: {}", e)))?;

        let mappings_path = path.with_extension("mappings.json");
        let mappings_str = std::fs::read_to_string(&mappings_path)?;
        let mappings: serde_json::Value = serde_json::from_str(&mappings_str)
            .map_err(|e| CoreError::Integrity(format!("corrupt index mappings: {}", e)))?;

        store.key_to_id = serde_json::from_value(mappings["key_to_id"].clone())
            .map_err(|e| CoreError::Integrity(format!("corrupt index mappings: {}", e)))?;
        store.next_id = mappings["next_id"]
            .as_u64()
            .ok_or_else(|| CoreError::Integrity("corrupt index mappings: next_id".to_string()))?;
        store.id_to_key = store
            .key_to_id
            .iter()
            .map(|(k, &v)| (v, k.clone()))
            .collect();

        Ok(store)
    }

    pub fn stats(&self) -> VectorStoreStats {
        VectorStoreStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
            memory_bytes: self.index.serialized_length(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{normalize, EMBEDDING_DIMENSIONS};

    fn unit_vector(seed: f32) -> Vec<f32> {
        normalize(
            (0..EMBEDDING_DIMENSIONS)
                .map(|i| ((i as f32 + seed) / EMBEDDING_DIMENSIONS as f32).sin())
                .collect(),
        )
    }

    #[test]
    fn test_add_and_search_self() {
        let mut store = VectorStore::new().unwrap();
        let v1 = unit_vector(1.0);
        let v2 = unit_vector(50.0);

        store.add("chunk-1", &v1).unwrap();
        store.add("chunk-2", &v2).unwrap();

        let results = store.search(&v1, 2).unwrap();
        assert_eq!(results[0].0, "chunk-1");
        // Identical unit vectors are at distance ~0
        assert!(results[0].1 < 0.01);
    }

    #[test]
    fn test_distances_bounded_for_unit_vectors() {
        let mut store = VectorStore::new().unwrap();
        for i in 0..10 {
            store.add(&format!("c{}", i), &unit_vector(i as f32 * 17.0)).unwrap();
        }
        let results = store.search(&unit_vector(3.0), 10).unwrap();
        for (_, d) in results {
            assert!((0.0..=2.01).contains(&d), "L2 distance {} out of range", d);
        }
    }

    #[test]
    fn test_update_keeps_single_entry() {
        let mut store = VectorStore::new().unwrap();
        store.add("chunk-1", &unit_vector(1.0)).unwrap();
        store.add("chunk-1", &unit_vector(2.0)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_many() {
        let mut store = VectorStore::new().unwrap();
        store.add("a", &unit_vector(1.0)).unwrap();
        store.add("b", &unit_vector(2.0)).unwrap();
        store.add("c", &unit_vector(3.0)).unwrap();

        let removed = store
            .remove_many(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(!store.contains("a"));
        assert!(store.contains("c"));
    }

    #[test]
    fn test_dimension_mismatch_is_integrity_error() {
        let mut store = VectorStore::new().unwrap();
        let err = store.add("bad", &[1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), "integrity_error");
    }

    #[test]
    fn test_empty_search_returns_empty() {
        let store = VectorStore::new().unwrap();
        assert!(store.search(&unit_vector(1.0), 5).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vectors.usearch");

        let mut store = VectorStore::new().unwrap();
        store.add("chunk-1", &unit_vector(1.0)).unwrap();
        store.add("chunk-2", &unit_vector(9.0)).unwrap();
        store.save(&path).unwrap();

        let loaded = VectorStore::load(&path, VectorStoreConfig::default()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains("chunk-1"));
        let results = loaded.search(&unit_vector(1.0), 1).unwrap();
        assert_eq!(results[0].0, "chunk-1");
    }
}
