//! Exact-scan backend.
//!
//! Same interface as the HNSW backend, with brute-force nearest-neighbor
//! search over an ordered map. Recall is exact; cost is linear in the
//! collection size. Selected when the `vector-search` feature is off.

use std::collections::BTreeMap;
use std::path::Path;

use crate::embeddings::euclidean_distance;
use crate::error::{CoreError, Result};

use super::{VectorStoreConfig, VectorStoreStats};

/// Exact-scan vector index keyed by chunk id
pub struct VectorStore {
    config: VectorStoreConfig,
    vectors: BTreeMap<String, Vec<f32>>,
}

impl VectorStore {
    pub fn new() -> Result<Self> {
        Self::with_config(VectorStoreConfig::default())
    }

    pub fn with_config(config: VectorStoreConfig) -> Result<Self> {
        Ok(Self {
            config,
            vectors: BTreeMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vectors.contains_key(key)
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
        self.vectors.insert(key.to_string(), vector.to_vec());
        Ok(())
    }

    /// Remove a vector by chunk id. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.vectors.remove(key).is_some())
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

    /// Exact nearest neighbors. Returns `(chunk_id, l2_distance)` pairs;
    /// distance is in [0, 2] for unit-norm vectors.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.config.dimensions {
            return Err(CoreError::Integrity(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.config.dimensions
            )));
        }

        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(key, vector)| (key.clone(), euclidean_distance(query, vector)))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Save the collection as JSON alongside the configured path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let doc = serde_json::json!({ "vectors": self.vectors });
        std::fs::write(path, doc.to_string())?;
        Ok(())
    }

    /// Load a previously saved collection.
    pub fn load(path: &Path, config: VectorStoreConfig) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let doc: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| CoreError::Integrity(format!("corrupt vector collection: {}", e)))?;
        let vectors: BTreeMap<String, Vec<f32>> = serde_json::from_value(doc["vectors"].clone())
            .map_err(|e| CoreError::Integrity(format!("corrupt vector collection: {}", e)))?;
        for v in vectors.values() {
            if v.len() != config.dimensions {
                return Err(CoreError::Integrity(format!(
                    "stored vector dimension {} does not match configured {}",
                    v.len(),
                    config.dimensions
                )));
            }
        }
        Ok(Self { config, vectors })
    }

    pub fn stats(&self) -> VectorStoreStats {
        VectorStoreStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
            memory_bytes: self.vectors.values().map(|v| v.len() * 4).sum(),
        }
    }
}

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
    fn test_exact_search_orders_by_distance() {
        let mut store = VectorStore::new().unwrap();
        store.add("near", &unit_vector(1.0)).unwrap();
        store.add("far", &unit_vector(80.0)).unwrap();

        let results = store.search(&unit_vector(1.0), 2).unwrap();
        assert_eq!(results[0].0, "near");
        assert!(results[0].1 < results[1].1);
    }

    #[test]
    fn test_dimension_checked() {
        let mut store = VectorStore::new().unwrap();
        assert!(store.add("bad", &[0.5, 0.5]).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vectors.json");
        let mut store = VectorStore::new().unwrap();
        store.add("a", &unit_vector(1.0)).unwrap();
        store.save(&path).unwrap();

        let loaded = VectorStore::load(&path, VectorStoreConfig::default()).unwrap();
        assert!(loaded.contains("a"));
        assert_eq!(loaded.len(), 1);
    }
}
