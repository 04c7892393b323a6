//! Service facade.
//!
//! Wires the stores, tiers, pipeline, lifecycle manager, and ingestion
//! path from one configuration document. The tool surface talks to this
//! type only.
//!
//! Dependency shape: the lifecycle manager holds the vector store and
//! metadata store as injected dependencies; the stores never point back.
//! The pipeline holds the ordered tier list plus an optional lifecycle
//! handle for rehydration and access bookkeeping.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::chunker::SemanticChunker;
use crate::config::NexusConfig;
use crate::diagnostics::{attribution_stats, replay, AttributionStats, ReplayReport, TraceSink};
use crate::embeddings::EmbeddingService;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::ingest::{Indexer, IngestOptions, IngestReport, IngestWorker, VaultEvent};
use crate::lifecycle::{Clock, LifecycleManager, TickReport};
use crate::memory::QueryTrace;
use crate::modes::Mode;
use crate::pipeline::{NexusPipeline, PipelineError, PipelineResult};
use crate::storage::MetaStore;
use crate::tiers::{BayesianTier, GraphTier, RetrievalTier, TierHealth, VectorTier};
use crate::vector::VectorStore;

/// How the service writes traces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceWriteMode {
    /// Background writer task (production; requires a tokio runtime)
    Async,
    /// Synchronous writes (tests, replay verification)
    Inline,
}

/// The assembled memory service
pub struct MemoryService {
    config: NexusConfig,
    meta: Arc<MetaStore>,
    vector: Arc<RwLock<VectorStore>>,
    graph: Arc<RwLock<GraphStore>>,
    embedder: Arc<EmbeddingService>,
    indexer: Arc<Indexer>,
    lifecycle: Arc<LifecycleManager>,
    pipeline: Arc<NexusPipeline>,
    sink: Arc<TraceSink>,
    tiers: Vec<Arc<dyn RetrievalTier>>,
    graph_tier: Arc<GraphTier>,
}

impl MemoryService {
    /// Build the service with the system clock and the default embedder.
    pub fn open(config: NexusConfig, trace_mode: TraceWriteMode) -> Result<Self> {
        Self::open_with(
            config,
            trace_mode,
            Arc::new(EmbeddingService::new()),
            Arc::new(Clock::system()),
        )
    }

    /// Build the service with explicit embedder and clock (tests inject a
    /// deterministic embedder and a manual clock).
    pub fn open_with(
        config: NexusConfig,
        trace_mode: TraceWriteMode,
        embedder: Arc<EmbeddingService>,
        clock: Arc<Clock>,
    ) -> Result<Self> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)?;

        let meta = Arc::new(MetaStore::open(&data_dir.join("nexus.db"))?);
        let vector = Arc::new(RwLock::new(VectorStore::new()?));
        let graph = Arc::new(RwLock::new(GraphStore::open(
            &data_dir.join("graph"),
            config.performance.max_graph_nodes,
        )?));

        // Rebuild the in-memory vector index from the persisted embeddings
        // of everything still searchable (active + demoted)
        {
            let rows = meta.indexed_embeddings()?;
            if !rows.is_empty() {
                let mut index = vector
                    .write()
                    .map_err(|_| crate::error::CoreError::Internal("vector lock poisoned".to_string()))?;
                let mut loaded = 0usize;
                for (chunk_id, embedding) in rows {
                    match index.add(&chunk_id, &embedding) {
                        Ok(()) => loaded += 1,
                        Err(e) => {
                            tracing::warn!(chunk_id = %chunk_id, error = %e, "skipping embedding during index rebuild")
                        }
                    }
                }
                tracing::info!(loaded, "vector index rebuilt from persisted embeddings");
            }
        }

        let indexer = Arc::new(Indexer::new(
            SemanticChunker::new(config.chunking.clone(), Arc::clone(&embedder)),
            Arc::clone(&embedder),
            Arc::clone(&meta),
            Arc::clone(&vector),
            Arc::clone(&graph),
            config.project_id(),
        ));

        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&meta),
            Arc::clone(&vector),
            Arc::clone(&indexer),
            Arc::clone(&embedder),
            config.decay.clone(),
            clock,
        ));

        let sink = Arc::new(match trace_mode {
            TraceWriteMode::Async => TraceSink::spawn(Arc::clone(&meta)),
            TraceWriteMode::Inline => TraceSink::inline(Arc::clone(&meta)),
        });

        let vector_tier = Arc::new(VectorTier::new(Arc::clone(&vector), Arc::clone(&meta)));
        let graph_tier = Arc::new(GraphTier::new(Arc::clone(&graph), Arc::clone(&meta)));
        let bayesian_tier = Arc::new(BayesianTier::new(
            Arc::clone(&graph),
            Arc::clone(&meta),
            config.bayesian.clone(),
            Duration::from_millis(config.performance.inference_timeout_ms),
        ));

        let tiers: Vec<Arc<dyn RetrievalTier>> = vec![
            Arc::clone(&vector_tier) as Arc<dyn RetrievalTier>,
            Arc::clone(&graph_tier) as Arc<dyn RetrievalTier>,
            bayesian_tier as Arc<dyn RetrievalTier>,
        ];

        let pipeline = Arc::new(NexusPipeline::new(
            tiers.clone(),
            Arc::clone(&embedder),
            Arc::clone(&sink),
            Some(Arc::clone(&lifecycle)),
            config.nexus.clone(),
            config.modes.clone(),
        ));

        Ok(Self {
            config,
            meta,
            vector,
            graph,
            embedder,
            indexer,
            lifecycle,
            pipeline,
            sink,
            tiers,
            graph_tier,
        })
    }

    pub fn config(&self) -> &NexusConfig {
        &self.config
    }

    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    pub fn graph(&self) -> &Arc<RwLock<GraphStore>> {
        &self.graph
    }

    pub fn vector(&self) -> &Arc<RwLock<VectorStore>> {
        &self.vector
    }

    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn pipeline(&self) -> &Arc<NexusPipeline> {
        &self.pipeline
    }

    pub fn graph_tier(&self) -> &Arc<GraphTier> {
        &self.graph_tier
    }

    /// Run the full retrieval pipeline.
    pub async fn search(
        &self,
        query: &str,
        mode: Option<Mode>,
        limit: Option<usize>,
    ) -> std::result::Result<PipelineResult, PipelineError> {
        self.pipeline.process(query, mode, limit).await
    }

    /// Retrieval forced through the graph tier's entity path (the
    /// `hipporag_retrieve` tool): entities -> multi-hop seeds -> PPR ->
    /// chunk aggregation, skipping the other tiers entirely. Response
    /// shape matches the full pipeline, including the trace.
    pub async fn hipporag_retrieve(
        &self,
        query: &str,
        mode: Option<Mode>,
        limit: Option<usize>,
    ) -> std::result::Result<PipelineResult, PipelineError> {
        use crate::memory::TraceErrorKind;
        use crate::pipeline::{RankedResult, TierScores};
        use crate::tiers::{query_seed, QueryContext};

        let started = std::time::Instant::now();
        let mut trace = QueryTrace::begin(query, None);
        let trace_id = trace.trace_id.clone();

        if query.trim().is_empty() {
            let error = crate::error::CoreError::Input("query is empty".to_string());
            trace.error = Some(error.to_string());
            trace.error_kind = Some(TraceErrorKind::SystemError);
            self.sink.submit(trace);
            return Err(PipelineError { trace_id, error });
        }

        let mode = mode.unwrap_or_else(|| self.pipeline.detector().detect(query).mode);
        trace.mode = mode;
        trace.mode_confidence = 1.0;
        trace.stores_queried = vec!["graph".to_string()];
        trace.routing_rationale = "forced through graph tier entity path; ".to_string();
        let profile = self.pipeline.mode_profile(mode).clone();

        let ctx = QueryContext {
            text: query.to_string(),
            embedding: self.embedder.embed_query(query).unwrap_or_default(),
            entity_ids: self.pipeline.extractor().extract_ids(query),
            seed: query_seed(query),
        };

        let tier = Arc::clone(&self.graph_tier);
        let recall_started = std::time::Instant::now();
        let top_n = self.config.nexus.recall_top_n;
        let max_hops = crate::tiers::DEFAULT_MAX_HOPS;
        let output = tokio::task::spawn_blocking(move || {
            tier.retrieve_multi_hop(&ctx, max_hops, top_n)
        })
            .await
            .map_err(|e| PipelineError {
                trace_id: trace_id.clone(),
                error: crate::error::CoreError::Internal(format!("graph tier task: {}", e)),
            })?
            .map_err(|error| {
                trace.error = Some(error.to_string());
                self.sink.submit(trace.clone());
                PipelineError {
                    trace_id: trace_id.clone(),
                    error,
                }
            })?;
        trace.retrieval_ms = recall_started.elapsed().as_secs_f64() * 1_000.0;

        let mut results: Vec<RankedResult> = Vec::new();
        for candidate in output.candidates {
            let chunk = self
                .meta
                .get_chunk(&candidate.chunk_id)
                .map_err(|error| PipelineError {
                    trace_id: trace_id.clone(),
                    error,
                })?;
            let Some(chunk) = chunk else {
                continue;
            };
            results.push(RankedResult {
                chunk_id: candidate.chunk_id,
                text: chunk.text.clone(),
                fused_score: candidate.score,
                tier_scores: TierScores {
                    vector: None,
                    graph: Some(candidate.score),
                    bayesian: None,
                },
                source_path: chunk.source_path.clone(),
                tags: chunk.tags.clone(),
                entities: candidate.entities,
            });
        }

        let core_k = limit.map_or(profile.core_k, |l| profile.core_k.min(l));
        let extended_k = limit.map_or(profile.extended_k, |l| {
            profile.extended_k.min(l.saturating_sub(core_k))
        });
        let mut iter = results.into_iter();
        let core: Vec<RankedResult> = iter.by_ref().take(core_k).collect();
        let extended: Vec<RankedResult> = iter.take(extended_k).collect();

        for result in &core {
            if let Err(e) = self.lifecycle.on_query_hit(&result.chunk_id) {
                tracing::warn!(chunk_id = %result.chunk_id, error = %e, "query-hit bookkeeping failed");
            }
        }

        trace.retrieved = core
            .iter()
            .chain(extended.iter())
            .map(|r| crate::memory::RetrievedRef {
                chunk_id: r.chunk_id.clone(),
                score: r.fused_score,
                source: r.source_path.clone(),
            })
            .collect();
        trace.total_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.sink.submit(trace);

        Ok(PipelineResult {
            core,
            extended,
            trace_id,
            mode,
            partial: output.degraded.is_some(),
            degradations: output.degraded.into_iter().collect(),
        })
    }

    /// Ingest ad-hoc text (the `memory_store` tool). The text is stored
    /// under a synthetic source path keyed by its content hash.
    pub fn store_text(&self, text: &str, options: &IngestOptions) -> Result<IngestReport> {
        let synthetic_path = format!("mem://{:016x}", crate::tiers::query_seed(text));
        self.indexer.reingest_document(&synthetic_path, text, options)
    }

    /// Ingest a document under its real source path.
    pub fn ingest_document(
        &self,
        source_path: &str,
        text: &str,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        self.indexer.reingest_document(source_path, text, options)
    }

    /// Cascade-delete everything sourced from a path.
    pub fn delete_source(&self, source_path: &str) -> Result<usize> {
        self.indexer.delete_source(source_path)
    }

    /// One lifecycle maintenance pass.
    pub fn tick(&self) -> Result<TickReport> {
        self.lifecycle.tick()
    }

    /// Health of every tier, in pipeline order.
    pub fn tier_health(&self) -> Vec<(&'static str, TierHealth)> {
        self.tiers.iter().map(|t| (t.name(), t.health())).collect()
    }

    /// Replay a recorded trace and diff the outputs.
    pub async fn replay(&self, trace_id: &str) -> Result<ReplayReport> {
        replay(&self.pipeline, &self.sink, trace_id).await
    }

    /// Error-attribution statistics over a trailing window.
    pub fn attribution_stats(&self, window_days: i64) -> Result<AttributionStats> {
        attribution_stats(&self.meta, window_days)
    }

    /// Fetch a trace by id.
    pub fn get_trace(&self, trace_id: &str) -> Result<Option<QueryTrace>> {
        self.meta.get_trace(trace_id)
    }

    /// Wait for pending trace writes (async sink only).
    pub async fn flush_traces(&self) {
        self.sink.flush().await;
    }

    /// Start the ingestion worker and return the queue feeding it.
    /// The vault watcher (or any other producer) pushes [`VaultEvent`]s.
    pub fn start_ingest_worker(&self) -> (mpsc::Sender<VaultEvent>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.performance.ingest_queue_depth);
        let handle = IngestWorker::spawn(Arc::clone(&self.indexer), rx);
        (tx, handle)
    }

    /// Spawn the periodic lifecycle tick task.
    pub fn start_lifecycle_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let lifecycle = Arc::clone(&lifecycle);
                let outcome = tokio::task::spawn_blocking(move || lifecycle.tick()).await;
                match outcome {
                    Ok(Ok(report)) => {
                        if report != TickReport::default() {
                            tracing::info!(
                                demoted = report.demoted,
                                archived = report.archived,
                                rehydratable = report.made_rehydratable,
                                purged = report.purged,
                                "lifecycle tick complete"
                            );
                        }
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "lifecycle tick failed"),
                    Err(e) => tracing::error!(error = %e, "lifecycle tick panicked"),
                }
            }
        })
    }

    /// Persist in-memory index state (graph snapshot compaction).
    pub fn checkpoint(&self) -> Result<()> {
        let mut graph = self
            .graph
            .write()
            .map_err(|_| crate::error::CoreError::Internal("graph lock poisoned".to_string()))?;
        graph.compact()
    }
}
