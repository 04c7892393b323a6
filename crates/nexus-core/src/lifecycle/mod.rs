//! Lifecycle manager.
//!
//! Owns the four-stage machine: `active` chunks demote after 7 idle days,
//! demote to `archived` at 30 (summary to KV, chunk out of the vector
//! index), drop to `rehydratable` at 90 (path key only), and eventually
//! purge through a two-phase deletion with a 7-day undo window. The
//! explicit back-arcs rehydrate `archived`/`rehydratable` chunks to
//! `active` when a query scores their summary above a threshold.
//!
//! Chunks tagged `priority:high` or `lifecycle:personal` are exempt from
//! demotion and archival. The hot/cold classifier is advisory only; the
//! stage machine is authoritative.
//!
//! The manager holds the vector store as an injected dependency; the
//! vector store never references the lifecycle layer back.

mod clock;

pub use clock::Clock;

use std::sync::{Arc, RwLock};

use chrono::Duration;

use crate::config::DecayConfig;
use crate::embeddings::{cosine_similarity, EmbeddingService};
use crate::error::{CoreError, Result};
use crate::graph::EntityExtractor;
use crate::ingest::{Indexer, IngestOptions};
use crate::memory::{EventKind, LifecycleStage};
use crate::storage::{ChunkMeta, MetaStore, UndoEntry};
use crate::vector::VectorStore;

/// Trace retention window
const TRACE_RETENTION_DAYS: i64 = 30;

/// Rehydration-scan cap per query
const REHYDRATE_SCAN_LIMIT: usize = 512;

/// Target summary length in whitespace tokens
const SUMMARY_TARGET_TOKENS: usize = 40;

/// Outcome of one `tick()`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub demoted: usize,
    pub archived: usize,
    pub made_rehydratable: usize,
    pub purge_requested: usize,
    pub purged: usize,
    pub traces_pruned: usize,
}

/// One rehydration triggered by a query
#[derive(Debug, Clone)]
pub struct RehydrationHit {
    /// The chunk that was archived
    pub chunk_id: String,
    /// Summary-to-query similarity that triggered it
    pub score: f32,
    /// Chunk ids produced by re-indexing the source
    pub new_chunk_ids: Vec<String>,
}

/// Stage transitions, decay scoring, archival summaries, rehydration.
pub struct LifecycleManager {
    meta: Arc<MetaStore>,
    vector: Arc<RwLock<VectorStore>>,
    indexer: Arc<Indexer>,
    embedder: Arc<EmbeddingService>,
    extractor: EntityExtractor,
    config: DecayConfig,
    clock: Arc<Clock>,
}

impl LifecycleManager {
    pub fn new(
        meta: Arc<MetaStore>,
        vector: Arc<RwLock<VectorStore>>,
        indexer: Arc<Indexer>,
        embedder: Arc<EmbeddingService>,
        config: DecayConfig,
        clock: Arc<Clock>,
    ) -> Self {
        Self {
            meta,
            vector,
            indexer,
            embedder,
            extractor: EntityExtractor::new(),
            config,
            clock,
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Record a retrieval hit against a chunk.
    pub fn on_query_hit(&self, chunk_id: &str) -> Result<()> {
        self.meta.touch_chunk(chunk_id, self.clock.now())
    }

    /// The stage a chunk should be in, given its idle time. Advisory
    /// classification and the authoritative transition logic agree here;
    /// `tick()` additionally refuses illegal skips.
    pub fn classify(&self, meta: &ChunkMeta) -> LifecycleStage {
        if meta.tags.iter().any(|t| t == "priority:high" || t == "lifecycle:personal") {
            return LifecycleStage::Active;
        }
        let idle = self.clock.now() - meta.last_accessed;
        if idle > Duration::days(self.config.long_term_days as i64) {
            LifecycleStage::Rehydratable
        } else if idle > Duration::days(self.config.mid_term_days as i64) {
            LifecycleStage::Archived
        } else if idle > Duration::hours(self.config.short_term_hours as i64) {
            LifecycleStage::Demoted
        } else {
            LifecycleStage::Active
        }
    }

    /// Advisory hot/cold score: recency (exponential decay, 30-day
    /// half-life), frequency (log1p of access count), and category weight.
    pub fn hot_cold_score(&self, meta: &ChunkMeta) -> f64 {
        let idle_days = (self.clock.now() - meta.last_accessed).num_seconds() as f64 / 86_400.0;
        let recency = (-(std::f64::consts::LN_2) * idle_days / self.config.half_life_days).exp();
        let frequency = (meta.access_count as f64).ln_1p();
        recency + frequency + meta.category.weight()
    }

    /// Extractive summary: keep the sentences densest in entities until the
    /// target length, preserving original order.
    pub fn extractive_summary(&self, text: &str) -> String {
        let sentences: Vec<&str> = split_sentences(text);
        if sentences.is_empty() {
            return text.split_whitespace().take(SUMMARY_TARGET_TOKENS).collect::<Vec<_>>().join(" ");
        }

        let mut scored: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let tokens = s.split_whitespace().count().max(1);
                let entities = self.extractor.extract(s).len();
                (i, entities as f64 / tokens as f64)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut keep: Vec<usize> = Vec::new();
        let mut tokens = 0usize;
        for (i, _) in scored {
            let len = sentences[i].split_whitespace().count();
            keep.push(i);
            tokens += len;
            if tokens >= SUMMARY_TARGET_TOKENS {
                break;
            }
        }
        keep.sort_unstable();
        keep.iter().map(|&i| sentences[i]).collect::<Vec<_>>().join(" ")
    }

    fn archived_key(id: &str) -> String {
        format!("archived:{}", id)
    }

    fn archived_path_key(id: &str) -> String {
        format!("archived:{}:path", id)
    }

    fn archived_vec_key(id: &str) -> String {
        format!("archived:{}:vec", id)
    }

    fn rehydratable_path_key(id: &str) -> String {
        format!("rehydratable:{}:path", id)
    }

    fn rehydratable_vec_key(id: &str) -> String {
        format!("rehydratable:{}:vec", id)
    }

    fn demote(&self, meta: &ChunkMeta) -> Result<()> {
        self.meta.set_stage(&meta.id, LifecycleStage::Demoted)?;
        self.meta.append_event(
            EventKind::Demote,
            serde_json::json!({ "chunk_id": meta.id, "source_path": meta.source_path }),
        )?;
        Ok(())
    }

    fn archive(&self, meta: &ChunkMeta) -> Result<()> {
        let Some(chunk) = self.meta.get_chunk(&meta.id)? else {
            return Err(CoreError::Internal(format!("chunk {} vanished mid-archive", meta.id)));
        };

        let summary = self.extractive_summary(&chunk.text);
        let summary_embedding = self
            .embedder
            .embed(&summary)
            .map_err(|e| CoreError::Storage(format!("summary embedding failed: {}", e)))?;

        self.meta.kv_put(&Self::archived_key(&meta.id), &summary)?;
        self.meta.kv_put(&Self::archived_path_key(&meta.id), &chunk.source_path)?;
        self.meta.kv_put(
            &Self::archived_vec_key(&meta.id),
            &serde_json::to_string(&summary_embedding)
                .map_err(|e| CoreError::Internal(format!("serialize summary vec: {}", e)))?,
        )?;
        // The row keeps only the pointer; the summary lives in the KV store
        self.meta.replace_text(&meta.id, &Self::archived_key(&meta.id))?;

        {
            let mut vector = self
                .vector
                .write()
                .map_err(|_| CoreError::Internal("vector store lock poisoned".to_string()))?;
            vector.remove(&meta.id)?;
        }

        self.meta.set_stage(&meta.id, LifecycleStage::Archived)?;
        self.meta.append_event(
            EventKind::Archive,
            serde_json::json!({ "chunk_id": meta.id, "source_path": chunk.source_path }),
        )?;
        Ok(())
    }

    fn make_rehydratable(&self, meta: &ChunkMeta) -> Result<()> {
        let path = self
            .meta
            .kv_get(&Self::archived_path_key(&meta.id))?
            .unwrap_or_else(|| meta.source_path.clone());
        // Summary text is dropped; the compact summary embedding is kept so
        // queries can still trigger rehydration from this stage.
        if let Some(vec) = self.meta.kv_get(&Self::archived_vec_key(&meta.id))? {
            self.meta.kv_put(&Self::rehydratable_vec_key(&meta.id), &vec)?;
        }
        self.meta.kv_put(&Self::rehydratable_path_key(&meta.id), &path)?;
        self.meta.kv_delete(&Self::archived_key(&meta.id))?;
        self.meta.kv_delete(&Self::archived_path_key(&meta.id))?;
        self.meta.kv_delete(&Self::archived_vec_key(&meta.id))?;

        self.meta.set_stage(&meta.id, LifecycleStage::Rehydratable)?;
        Ok(())
    }

    fn request_purge(&self, meta: &ChunkMeta) -> Result<()> {
        let now = self.clock.now();
        let summary = self.meta.kv_get(&Self::archived_key(&meta.id))?;
        self.meta.insert_undo(&UndoEntry {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: meta.id.clone(),
            summary,
            source_path: meta.source_path.clone(),
            requested_at: now,
            purge_after: now + Duration::days(self.config.undo_window_days as i64),
        })?;
        // The last copy is about to go away; surface it for user review
        self.meta.append_event(
            EventKind::UserReviewRequested,
            serde_json::json!({
                "chunk_id": meta.id,
                "source_path": meta.source_path,
                "undo_window_days": self.config.undo_window_days,
            }),
        )?;
        self.meta.append_event(
            EventKind::PurgeRequested,
            serde_json::json!({ "chunk_id": meta.id }),
        )?;
        Ok(())
    }

    /// Cancel a pending purge inside the undo window.
    pub fn cancel_purge(&self, chunk_id: &str) -> Result<bool> {
        let Some(entry) = self.meta.undo_entry_for_chunk(chunk_id)? else {
            return Ok(false);
        };
        self.meta.delete_undo(&entry.id)?;
        self.meta.append_event(
            EventKind::UndoRestore,
            serde_json::json!({ "chunk_id": chunk_id }),
        )?;
        Ok(true)
    }

    fn purge_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.meta.undo_entries_due(now)?;
        let mut purged = 0usize;
        for entry in due {
            self.meta.kv_delete(&Self::rehydratable_path_key(&entry.chunk_id))?;
            self.meta.kv_delete(&Self::rehydratable_vec_key(&entry.chunk_id))?;
            self.meta.delete_chunk(&entry.chunk_id)?;
            self.meta.delete_undo(&entry.id)?;
            self.meta.append_event(
                EventKind::Purge,
                serde_json::json!({
                    "chunk_id": entry.chunk_id,
                    "source_path": entry.source_path,
                }),
            )?;
            purged += 1;
        }
        Ok(purged)
    }

    /// Periodic maintenance: stage transitions (one legal step at a time),
    /// decay scoring, due purges, and trace retention.
    pub fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let snapshot = self.meta.lifecycle_snapshot()?;

        for meta in &snapshot {
            self.meta.set_decay_score(&meta.id, self.hot_cold_score(meta))?;

            let target = self.classify(meta);
            let mut current = meta.stage;
            // Walk the chain one legal step at a time; never skip a stage
            while current != target {
                let next = match current {
                    LifecycleStage::Active => LifecycleStage::Demoted,
                    LifecycleStage::Demoted => LifecycleStage::Archived,
                    LifecycleStage::Archived => LifecycleStage::Rehydratable,
                    LifecycleStage::Rehydratable => break,
                };
                if !current.can_transition_to(next) {
                    break;
                }
                // Rehydration arcs are query-driven, not tick-driven
                if target == LifecycleStage::Active {
                    break;
                }
                match next {
                    LifecycleStage::Demoted => {
                        self.demote(meta)?;
                        report.demoted += 1;
                    }
                    LifecycleStage::Archived => {
                        self.archive(meta)?;
                        report.archived += 1;
                    }
                    LifecycleStage::Rehydratable => {
                        self.make_rehydratable(meta)?;
                        report.made_rehydratable += 1;
                    }
                    LifecycleStage::Active => unreachable!("active is never a forward step"),
                }
                current = next;
            }

            // Rehydratable chunks idle past a second long-term window lose
            // their last copy; that deletion is two-phase with user review
            if current == LifecycleStage::Rehydratable {
                let idle = self.clock.now() - meta.last_accessed;
                let purge_horizon = Duration::days(2 * self.config.long_term_days as i64);
                if idle > purge_horizon && self.meta.undo_entry_for_chunk(&meta.id)?.is_none() {
                    self.request_purge(meta)?;
                    report.purge_requested += 1;
                }
            }
        }

        report.purged = self.purge_due()?;
        report.traces_pruned = self
            .meta
            .prune_traces_before(self.clock.now() - Duration::days(TRACE_RETENTION_DAYS))?;

        Ok(report)
    }

    /// Rehydrate one chunk: re-read its source, re-chunk, re-embed,
    /// re-index, and drop the archival keys. Fails (keys intact) when the
    /// source file no longer exists — content is never fabricated.
    pub fn rehydrate(&self, chunk_id: &str) -> Result<Vec<String>> {
        let path = self
            .meta
            .kv_get(&Self::archived_path_key(chunk_id))?
            .or(self.meta.kv_get(&Self::rehydratable_path_key(chunk_id))?)
            .ok_or_else(|| {
                CoreError::Routing(format!("chunk {} has no archival record", chunk_id))
            })?;

        let text = std::fs::read_to_string(&path).map_err(|e| {
            CoreError::Storage(format!("source {} vanished, cannot rehydrate: {}", path, e))
        })?;

        let report = self
            .indexer
            .reingest_document(&path, &text, &IngestOptions::default())?;

        for key in [
            Self::archived_key(chunk_id),
            Self::archived_path_key(chunk_id),
            Self::archived_vec_key(chunk_id),
            Self::rehydratable_path_key(chunk_id),
            Self::rehydratable_vec_key(chunk_id),
        ] {
            self.meta.kv_delete(&key)?;
        }
        // A pending purge is void once the chunk is live again
        self.cancel_purge(chunk_id)?;

        self.meta.append_event(
            EventKind::Rehydrate,
            serde_json::json!({
                "chunk_id": chunk_id,
                "source_path": path,
                "new_chunks": report.chunk_ids,
            }),
        )?;

        Ok(report.chunk_ids)
    }

    /// Query-driven rehydration: compare the query embedding against the
    /// archived/rehydratable summary embeddings and restore everything at
    /// or above the threshold.
    pub fn rehydrate_matches(&self, query_embedding: &[f32]) -> Result<Vec<RehydrationHit>> {
        let mut hits = Vec::new();
        let mut keys = self.meta.kv_keys_with_prefix("archived:")?;
        keys.extend(self.meta.kv_keys_with_prefix("rehydratable:")?);

        let mut scanned = 0usize;
        for key in keys {
            if !key.ends_with(":vec") {
                continue;
            }
            if scanned >= REHYDRATE_SCAN_LIMIT {
                tracing::warn!(limit = REHYDRATE_SCAN_LIMIT, "rehydration scan cap hit");
                break;
            }
            scanned += 1;

            let Some(chunk_id) = key
                .strip_prefix("archived:")
                .or_else(|| key.strip_prefix("rehydratable:"))
                .and_then(|rest| rest.strip_suffix(":vec"))
                .map(str::to_string)
            else {
                continue;
            };
            let Some(vec_json) = self.meta.kv_get(&key)? else {
                continue;
            };
            let Ok(summary_vec) = serde_json::from_str::<Vec<f32>>(&vec_json) else {
                tracing::warn!(key = %key, "corrupt summary embedding, skipping");
                continue;
            };

            let score = cosine_similarity(query_embedding, &summary_vec);
            if score >= self.config.rehydrate_threshold {
                match self.rehydrate(&chunk_id) {
                    Ok(new_chunk_ids) => hits.push(RehydrationHit {
                        chunk_id,
                        score,
                        new_chunk_ids,
                    }),
                    Err(e) => {
                        tracing::warn!(chunk_id = %chunk_id, error = %e, "rehydration failed");
                    }
                }
            }
        }
        Ok(hits)
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
