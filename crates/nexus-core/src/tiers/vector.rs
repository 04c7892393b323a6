//! Vector tier.
//!
//! Dense similarity search over the HNSW index. L2 distances over
//! unit-norm embeddings live in [0, 2] and normalize to a confidence as
//! `1 - distance/2`, so a distance of 0 maps to 1.0 and a distance of 2
//! maps to 0.0. A distance beyond 2 would produce a negative confidence;
//! that is an implementation bug upstream (a non-normalized vector), so
//! the score clamps to 0 with a warning. Stage multipliers from the
//! lifecycle are applied after normalization.

use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};
use crate::memory::{LifecycleStage, MemoryCategory, RetentionTier};
use crate::storage::MetaStore;
use crate::vector::VectorStore;

use super::{QueryContext, RetrievalTier, TierCandidate, TierHealth, TierOutput};

/// Metadata predicate for filtered searches
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub stage: Option<LifecycleStage>,
    pub category: Option<MemoryCategory>,
    pub retention: Option<RetentionTier>,
    /// Every listed tag must be present
    pub tags: Vec<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.stage.is_none()
            && self.category.is_none()
            && self.retention.is_none()
            && self.tags.is_empty()
    }

    fn matches(&self, chunk: &crate::memory::Chunk) -> bool {
        if let Some(stage) = self.stage {
            if chunk.stage != stage {
                return false;
            }
        }
        if let Some(category) = self.category {
            if chunk.category != category {
                return false;
            }
        }
        if let Some(retention) = self.retention {
            if chunk.retention != retention {
                return false;
            }
        }
        self.tags.iter().all(|t| chunk.tags.contains(t))
    }
}

/// Normalize an L2 distance over unit vectors to a [0, 1] confidence.
/// Distances beyond 2 clamp to 0 with a warning.
pub fn normalize_distance(distance: f32) -> f32 {
    let score = 1.0 - distance / 2.0;
    if score < 0.0 {
        tracing::warn!(
            distance,
            "vector distance beyond 2 on unit-norm embeddings, clamping score to 0"
        );
        0.0
    } else {
        score.min(1.0)
    }
}

/// Dense-vector retrieval tier
pub struct VectorTier {
    store: Arc<RwLock<VectorStore>>,
    meta: Arc<MetaStore>,
}

impl VectorTier {
    pub fn new(store: Arc<RwLock<VectorStore>>, meta: Arc<MetaStore>) -> Self {
        Self { store, meta }
    }

    /// Raw contract: `search(embedding, top_k, filter?)`. Over-fetches to
    /// survive metadata filtering, then trims to `top_k`.
    pub fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f32, crate::memory::Chunk)>> {
        let fetch = if filter.map(|f| f.is_empty()).unwrap_or(true) {
            top_k
        } else {
            top_k * 4
        };

        let raw = {
            let store = self
                .store
                .read()
                .map_err(|_| CoreError::Internal("vector store lock poisoned".to_string()))?;
            store.search(embedding, fetch)?
        };

        let mut results = Vec::with_capacity(raw.len());
        for (chunk_id, distance) in raw {
            let Some(chunk) = self.meta.get_chunk(&chunk_id)? else {
                tracing::warn!(chunk_id = %chunk_id, "vector hit without metadata row, skipping");
                continue;
            };
            if let Some(filter) = filter {
                if !filter.matches(&chunk) {
                    continue;
                }
            }
            results.push((chunk_id, distance, chunk));
            if results.len() >= top_k {
                break;
            }
        }
        Ok(results)
    }
}

impl RetrievalTier for VectorTier {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn query(&self, ctx: &QueryContext, top_k: usize) -> Result<TierOutput> {
        let hits = self.search(&ctx.embedding, top_k, None)?;
        let candidates = hits
            .into_iter()
            .map(|(chunk_id, distance, chunk)| TierCandidate {
                chunk_id,
                score: normalize_distance(distance) * chunk.score_multiplier(),
                entities: Vec::new(),
            })
            .collect();
        Ok(TierOutput {
            candidates,
            degraded: None,
        })
    }

    fn health(&self) -> TierHealth {
        match self.store.read() {
            Ok(store) if store.is_empty() => {
                TierHealth::Degraded("vector index is empty".to_string())
            }
            Ok(_) => TierHealth::Healthy,
            Err(_) => TierHealth::Unavailable("vector store lock poisoned".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingService;
    use crate::memory::{Chunk, IntentCategory, TaggingEnvelope};
    use crate::tiers::query_seed;
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (VectorTier, Arc<EmbeddingService>, TempDir) {
        let dir = TempDir::new().unwrap();
        let meta = Arc::new(MetaStore::open(&dir.path().join("meta.db")).unwrap());
        let store = Arc::new(RwLock::new(VectorStore::new().unwrap()));
        let embedder = Arc::new(EmbeddingService::deterministic());
        (VectorTier::new(store, meta), embedder, dir)
    }

    fn index_chunk(tier: &VectorTier, embedder: &EmbeddingService, id: &str, text: &str) {
        index_chunk_staged(tier, embedder, id, text, LifecycleStage::Active);
    }

    fn index_chunk_staged(
        tier: &VectorTier,
        embedder: &EmbeddingService,
        id: &str,
        text: &str,
        stage: LifecycleStage,
    ) {
        let now = Utc::now();
        let embedding = embedder.embed(text).unwrap();
        let chunk = Chunk {
            id: id.to_string(),
            source_path: "/vault/test.md".to_string(),
            ordinal: 0,
            text: text.to_string(),
            embedding: embedding.clone(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            stage,
            retention: RetentionTier::Mid,
            category: MemoryCategory::Semantic,
            decay_score: None,
            tags: vec![],
            envelope: TaggingEnvelope::new("demo".to_string(), IntentCategory::Testing, now),
        };
        tier.meta.upsert_chunk(&chunk).unwrap();
        tier.store.write().unwrap().add(id, &embedding).unwrap();
    }

    fn ctx(embedder: &EmbeddingService, text: &str) -> QueryContext {
        QueryContext {
            text: text.to_string(),
            embedding: embedder.embed(text).unwrap(),
            entity_ids: vec![],
            seed: query_seed(text),
        }
    }

    #[test]
    fn test_normalize_distance_bounds() {
        assert_eq!(normalize_distance(0.0), 1.0);
        assert_eq!(normalize_distance(2.0), 0.0);
        assert_eq!(normalize_distance(1.0), 0.5);
        // Beyond 2 clamps instead of going negative
        assert_eq!(normalize_distance(2.5), 0.0);
    }

    #[test]
    fn test_self_query_scores_high() {
        let (tier, embedder, _dir) = setup();
        index_chunk(&tier, &embedder, "c1", "Python is widely used for machine learning");
        index_chunk(&tier, &embedder, "c2", "The quarterly budget review meeting");

        let output = tier
            .query(&ctx(&embedder, "Python is widely used for machine learning"), 10)
            .unwrap();
        assert_eq!(output.candidates[0].chunk_id, "c1");
        assert!(output.candidates[0].score > 0.9);
    }

    #[test]
    fn test_demoted_chunk_score_halved() {
        let (tier, embedder, _dir) = setup();
        let text = "identical stored text for both chunks";
        index_chunk(&tier, &embedder, "active", text);
        index_chunk_staged(&tier, &embedder, "demoted", text, LifecycleStage::Demoted);

        let output = tier.query(&ctx(&embedder, text), 10).unwrap();
        let active = output.candidates.iter().find(|c| c.chunk_id == "active").unwrap();
        let demoted = output.candidates.iter().find(|c| c.chunk_id == "demoted").unwrap();
        assert!((demoted.score - active.score * 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_metadata_filter_by_stage() {
        let (tier, embedder, _dir) = setup();
        let text = "filterable chunk text";
        index_chunk(&tier, &embedder, "active", text);
        index_chunk_staged(&tier, &embedder, "demoted", text, LifecycleStage::Demoted);

        let embedding = embedder.embed(text).unwrap();
        let filter = MetadataFilter {
            stage: Some(LifecycleStage::Active),
            ..MetadataFilter::default()
        };
        let hits = tier.search(&embedding, 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "active");
    }

    #[test]
    fn test_empty_index_degraded_health() {
        let (tier, _embedder, _dir) = setup();
        assert!(matches!(tier.health(), TierHealth::Degraded(_)));
    }

    #[test]
    fn test_scores_never_negative() {
        let (tier, embedder, _dir) = setup();
        index_chunk(&tier, &embedder, "c1", "some arbitrary stored content");
        let output = tier
            .query(&ctx(&embedder, "completely unrelated query terms xyz"), 10)
            .unwrap();
        for c in &output.candidates {
            assert!(c.score >= 0.0);
        }
    }
}
