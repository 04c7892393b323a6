//! Ingestion path.
//!
//! Chunk -> embed -> index. All writes for one document happen under an
//! indexing transaction: the chunk rows, vector entries, graph nodes and
//! edges, the tagging envelope, and the `ingest` event either all land or
//! are compensated away (delete-by-path on the vector and metadata
//! stores, orphan-entity cleanup on the graph).
//!
//! A bounded worker queue feeds the indexer from the file-watcher
//! interface; the `deleted` callback cascades a delete-by-path through
//! every store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::chunker::SemanticChunker;
use crate::embeddings::EmbeddingService;
use crate::error::{CoreError, Result};
use crate::graph::{EntityExtractor, GraphStore};
use crate::memory::{
    Chunk, EventKind, IntentCategory, LifecycleStage, MemoryCategory, RetentionTier,
    TaggingEnvelope,
};
use crate::storage::MetaStore;
use crate::vector::VectorStore;

/// Related-edge strength contributed by one within-chunk co-occurrence
const COOCCURRENCE_STRENGTH: f32 = 0.3;

/// Vault change notification (the file watcher's interface)
#[derive(Debug, Clone)]
pub enum VaultEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

/// Per-ingest options merged into the tagging envelope
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub intent: IntentCategory,
    pub category: MemoryCategory,
    pub retention: RetentionTier,
    pub tags: Vec<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            intent: IntentCategory::Analysis,
            category: MemoryCategory::Semantic,
            retention: RetentionTier::Mid,
            tags: Vec::new(),
        }
    }
}

/// Result of one document ingest
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub chunk_ids: Vec<String>,
    pub chunks_created: usize,
    pub entities_registered: usize,
}

/// Writes chunks, embeddings, and graph structure under one transaction.
pub struct Indexer {
    chunker: SemanticChunker,
    embedder: Arc<EmbeddingService>,
    extractor: EntityExtractor,
    meta: Arc<MetaStore>,
    vector: Arc<RwLock<VectorStore>>,
    graph: Arc<RwLock<GraphStore>>,
    project: String,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunker: SemanticChunker,
        embedder: Arc<EmbeddingService>,
        meta: Arc<MetaStore>,
        vector: Arc<RwLock<VectorStore>>,
        graph: Arc<RwLock<GraphStore>>,
        project: String,
    ) -> Self {
        Self {
            chunker,
            embedder,
            extractor: EntityExtractor::new(),
            meta,
            vector,
            graph,
            project,
        }
    }

    /// Tags lifted from frontmatter lines (`priority: high` and friends).
    fn frontmatter_tags(frontmatter: Option<&str>) -> Vec<String> {
        let Some(fm) = frontmatter else {
            return Vec::new();
        };
        let mut tags = Vec::new();
        for line in fm.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if matches!(key, "priority" | "lifecycle" | "project" | "intent") && !value.is_empty() {
                tags.push(format!("{}:{}", key, value));
            }
        }
        tags
    }

    /// Ingest one document. Partial failures are compensated: every write
    /// already made for this path is rolled back before the error returns.
    pub fn ingest_document(
        &self,
        source_path: &str,
        text: &str,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        let pieces = self.chunker.chunk_document(text)?;
        let texts: Vec<&str> = pieces.iter().map(|p| p.text.as_str()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .map_err(|e| CoreError::Storage(format!("embedding failed: {}", e)))?;
        if embeddings.len() != pieces.len() {
            return Err(CoreError::Internal(format!(
                "embedding batch returned {} vectors for {} chunks",
                embeddings.len(),
                pieces.len()
            )));
        }

        let now = Utc::now();
        let mut chunks: Vec<Chunk> = Vec::with_capacity(pieces.len());
        for (piece, embedding) in pieces.iter().zip(embeddings) {
            let mut tags = options.tags.clone();
            tags.extend(Self::frontmatter_tags(piece.frontmatter.as_deref()));
            for heading in &piece.headings {
                tags.push(format!("heading:{}", heading));
            }
            chunks.push(Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                source_path: source_path.to_string(),
                ordinal: piece.ordinal,
                text: piece.text.clone(),
                embedding,
                created_at: now,
                last_accessed: now,
                access_count: 0,
                stage: LifecycleStage::Active,
                retention: options.retention,
                category: options.category,
                decay_score: None,
                tags,
                envelope: TaggingEnvelope::new(self.project.clone(), options.intent, now),
            });
        }

        match self.write_all(source_path, &chunks) {
            Ok(entities_registered) => {
                self.meta.append_event(
                    EventKind::Ingest,
                    serde_json::json!({
                        "source_path": source_path,
                        "chunks": chunks.len(),
                        "entities": entities_registered,
                    }),
                )?;
                Ok(IngestReport {
                    chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
                    chunks_created: chunks.len(),
                    entities_registered,
                })
            }
            Err(e) => {
                tracing::error!(source_path, error = %e, "ingest failed, compensating partial writes");
                if let Err(rollback) = self.delete_source_inner(source_path) {
                    tracing::error!(source_path, error = %rollback, "compensation failed");
                }
                Err(e)
            }
        }
    }

    /// The write phase of the indexing transaction.
    fn write_all(&self, _source_path: &str, chunks: &[Chunk]) -> Result<usize> {
        let mut entities_registered = 0usize;

        for chunk in chunks {
            self.meta.upsert_chunk(chunk)?;

            {
                let mut vector = self
                    .vector
                    .write()
                    .map_err(|_| CoreError::Internal("vector store lock poisoned".to_string()))?;
                vector.add(&chunk.id, &chunk.embedding)?;
            }

            let entities = self.extractor.extract(&chunk.text);
            let mut graph = self
                .graph
                .write()
                .map_err(|_| CoreError::Internal("graph store lock poisoned".to_string()))?;
            graph.add_chunk(&chunk.id)?;

            let mut mention_counts: HashMap<String, u32> = HashMap::new();
            for entity in &entities {
                let count = chunk.text.to_lowercase().matches(&entity.name.to_lowercase()).count();
                mention_counts.insert(entity.id.clone(), count.max(1) as u32);
            }

            for entity in &entities {
                graph.add_entity(entity)?;
                entities_registered += 1;
            }
            for entity in &entities {
                graph.add_mention(&chunk.id, &entity.id, mention_counts[&entity.id])?;
            }

            // Within-chunk co-occurrence: related edges plus observation
            // counts that later back the Bayesian CPDs
            for (i, a) in entities.iter().enumerate() {
                for b in entities.iter().skip(i + 1) {
                    graph.add_related(&a.id, &b.id, COOCCURRENCE_STRENGTH)?;
                    self.meta.record_observation(&a.id, &b.id, true)?;
                }
            }
        }

        Ok(entities_registered)
    }

    fn delete_source_inner(&self, source_path: &str) -> Result<Vec<String>> {
        let removed_ids = self.meta.delete_chunks_by_path(source_path)?;

        {
            let mut vector = self
                .vector
                .write()
                .map_err(|_| CoreError::Internal("vector store lock poisoned".to_string()))?;
            vector.remove_many(&removed_ids)?;
        }

        let mut graph = self
            .graph
            .write()
            .map_err(|_| CoreError::Internal("graph store lock poisoned".to_string()))?;
        for id in &removed_ids {
            graph.remove_chunk(id)?;
        }
        // Entities whose only mentions pointed at the removed chunks
        for orphan in graph.orphan_entities() {
            graph.remove_entity(&orphan)?;
        }

        Ok(removed_ids)
    }

    /// Delete every chunk sourced from a path, across all stores.
    pub fn delete_source(&self, source_path: &str) -> Result<usize> {
        let removed = self.delete_source_inner(source_path)?;
        if !removed.is_empty() {
            self.meta.append_event(
                EventKind::Delete,
                serde_json::json!({
                    "source_path": source_path,
                    "chunks_removed": removed.len(),
                }),
            )?;
        }
        Ok(removed.len())
    }

    /// Re-ingest a changed document: remove the old chunks, index the new.
    pub fn reingest_document(
        &self,
        source_path: &str,
        text: &str,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        self.delete_source_inner(source_path)?;
        self.ingest_document(source_path, text, options)
    }
}

/// Background worker draining the bounded vault-event queue.
pub struct IngestWorker;

impl IngestWorker {
    /// Spawn the worker task. The channel is bounded by configuration; a
    /// full queue applies backpressure to the watcher side.
    pub fn spawn(
        indexer: Arc<Indexer>,
        mut events: mpsc::Receiver<VaultEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let indexer = Arc::clone(&indexer);
                let outcome = tokio::task::spawn_blocking(move || match event {
                    VaultEvent::Created(path) | VaultEvent::Modified(path) => {
                        let source = path.to_string_lossy().to_string();
                        match std::fs::read_to_string(&path) {
                            Ok(text) => indexer
                                .reingest_document(&source, &text, &IngestOptions::default())
                                .map(|report| {
                                    tracing::info!(
                                        source = %source,
                                        chunks = report.chunks_created,
                                        "vault document indexed"
                                    );
                                }),
                            Err(e) => Err(CoreError::Storage(format!(
                                "read {}: {}",
                                path.display(),
                                e
                            ))),
                        }
                    }
                    VaultEvent::Deleted(path) => {
                        let source = path.to_string_lossy().to_string();
                        indexer.delete_source(&source).map(|removed| {
                            tracing::info!(source = %source, removed, "vault document removed");
                        })
                    }
                })
                .await;

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "vault event handling failed"),
                    Err(e) => tracing::error!(error = %e, "ingest worker task panicked"),
                }
            }
            tracing::debug!("ingest worker channel closed, stopping");
        })
    }
}
