//! Embedding pipeline.
//!
//! Batch text -> batch of 384-dim unit-norm vectors. The ONNX backend
//! (fastembed, `embeddings` feature) is preferred; when the model cannot
//! be initialized the service falls back to a deterministic hashed
//! projection so the engine keeps working offline. Deterministic given
//! fixed model weights.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use lru::LruCache;

mod hashed;
#[cfg(feature = "embeddings")]
mod local;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Embedding dimensions (all-MiniLM-L6-v2)
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Maximum text length in bytes; longer inputs are truncated with a warning
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for throughput
pub const BATCH_SIZE: usize = 32;

/// Query-embedding LRU cache capacity
const QUERY_CACHE_CAPACITY: usize = 128;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding model
    #[error("Model initialization failed: {0}")]
    ModelInit(String),
    /// Failed to generate embedding
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
    /// Invalid input (empty text)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// EMBEDDING SERVICE
// ============================================================================

/// Which backend the service is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// fastembed ONNX inference
    Onnx,
    /// Deterministic hashed projection
    Hashed,
}

/// Service for generating embeddings with an LRU query cache.
pub struct EmbeddingService {
    backend: EmbeddingBackend,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    fallback_warned: AtomicBool,
}

impl EmbeddingService {
    /// Create a service preferring the ONNX backend where available.
    pub fn new() -> Self {
        #[cfg(feature = "embeddings")]
        let backend = EmbeddingBackend::Onnx;
        #[cfg(not(feature = "embeddings"))]
        let backend = EmbeddingBackend::Hashed;

        Self::with_backend(backend)
    }

    /// Create a service pinned to the deterministic hashed backend.
    /// Used by hermetic tests and replay verification.
    pub fn deterministic() -> Self {
        Self::with_backend(EmbeddingBackend::Hashed)
    }

    fn with_backend(backend: EmbeddingBackend) -> Self {
        Self {
            backend,
            // SAFETY: capacity constant is non-zero
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            fallback_warned: AtomicBool::new(false),
        }
    }

    /// The backend currently in effect.
    pub fn backend(&self) -> EmbeddingBackend {
        self.backend
    }

    /// Embedding dimension of this service.
    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    /// Embed a single text.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".to_string()));
        }
        Ok(self.embed_batch(&[text])?.remove(0))
    }

    /// Embed a query with LRU caching of repeated queries.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(query) {
                return Ok(hit.clone());
            }
        }
        let embedding = self.embed(query)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }

    /// Embed a batch of texts, processed in chunks of [`BATCH_SIZE`].
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        match self.backend {
            EmbeddingBackend::Onnx => self.embed_batch_onnx(texts),
            EmbeddingBackend::Hashed => Ok(texts.iter().map(|t| hashed::embed(t)).collect()),
        }
    }

    #[cfg(feature = "embeddings")]
    fn embed_batch_onnx(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            match local::embed_batch(chunk) {
                Ok(vectors) => all.extend(vectors),
                Err(EmbeddingError::ModelInit(reason)) => {
                    // Model unavailable: degrade to the hashed projection
                    // for the rest of the process.
                    if !self.fallback_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            %reason,
                            "ONNX embedding model unavailable, \
                             falling back to hashed projection"
                        );
                    }
                    all.extend(chunk.iter().map(|t| hashed::embed(t)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }

    #[cfg(not(feature = "embeddings"))]
    fn embed_batch_onnx(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        unreachable!("Onnx backend requires the embeddings feature")
    }
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// L2-normalize a vector in place and return it.
#[inline]
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

/// Compute Euclidean distance between two vectors
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.0001);
    }

    #[test]
    fn test_euclidean_distance_unit_opposites() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((euclidean_distance(&a, &b) - 2.0).abs() < 0.0001);
    }

    #[test]
    fn test_normalize_produces_unit_vector() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 0.0001);
        assert!((v[1] - 0.8).abs() < 0.0001);
    }

    #[test]
    fn test_deterministic_service_embeds() {
        let service = EmbeddingService::deterministic();
        let a = service.embed("memory retrieval engine").unwrap();
        let b = service.embed("memory retrieval engine").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn test_empty_text_rejected() {
        let service = EmbeddingService::deterministic();
        assert!(matches!(
            service.embed("   "),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_batch_matches_single() {
        let service = EmbeddingService::deterministic();
        let single = service.embed("alpha beta").unwrap();
        let batch = service.embed_batch(&["alpha beta", "gamma delta"]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], single);
    }

    #[test]
    fn test_query_cache_consistency() {
        let service = EmbeddingService::deterministic();
        let first = service.embed_query("repeated query").unwrap();
        let second = service.embed_query("repeated query").unwrap();
        assert_eq!(first, second);
    }
}
