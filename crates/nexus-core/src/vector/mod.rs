//! Vector store.
//!
//! Id-keyed index over unit-norm chunk embeddings. The default backend is
//! HNSW via USearch (`vector-search` feature); without it an exact-scan
//! backend with the same interface keeps the engine functional (slower
//! recall, identical semantics — useful for hermetic test builds).
//!
//! Distances are Euclidean; for unit vectors they range over [0, 2],
//! which the vector tier normalizes to a [0, 1] confidence. Metadata
//! predicates are applied by the tier against the metadata store, so the
//! index stays a pure id -> vector structure.
//!
//! Concurrent reads are safe behind a shared read lock; writers (ingest,
//! lifecycle archival) take the exclusive side of the same lock.

use crate::embeddings::EMBEDDING_DIMENSIONS;

#[cfg(feature = "vector-search")]
mod hnsw;
#[cfg(not(feature = "vector-search"))]
mod linear;

#[cfg(feature = "vector-search")]
pub use hnsw::VectorStore;
#[cfg(not(feature = "vector-search"))]
pub use linear::VectorStore;

/// Configuration for the vector index
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub dimensions: usize,
    /// HNSW connectivity parameter (ignored by the exact-scan backend)
    pub connectivity: usize,
    /// HNSW expansion factor for adding vectors
    pub expansion_add: usize,
    /// HNSW expansion factor for search
    pub expansion_search: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct VectorStoreStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub memory_bytes: usize,
}
