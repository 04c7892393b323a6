//! # Nexus Core
//!
//! Hybrid retrieval and memory-lifecycle engine for a personal, portable
//! memory service:
//!
//! - **Nexus pipeline**: recall -> filter -> dedupe -> rank -> compress,
//!   fusing three independent retrieval tiers into one ranked,
//!   token-budgeted result set
//! - **Vector tier**: dense similarity over 384-dim unit-norm embeddings
//!   (HNSW via USearch, exact-scan fallback)
//! - **Graph tier (HippoRAG)**: entity extraction, Personalized PageRank,
//!   multi-hop traversal over the entity/chunk graph
//! - **Bayesian tier**: variable elimination and Gibbs sampling over a
//!   network derived from entity co-occurrence
//! - **Mode detector**: execution / planning / brainstorming profiles
//!   selected from query text
//! - **Lifecycle manager**: active -> demoted -> archived -> rehydratable
//!   stage machine with extractive summaries and query-driven rehydration
//! - **Debug subsystem**: always-on query traces, deterministic replay,
//!   and error attribution
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nexus_core::{IngestOptions, MemoryService, NexusConfig, TraceWriteMode};
//!
//! let service = MemoryService::open(NexusConfig::from_env(), TraceWriteMode::Async)?;
//!
//! // Store a memory
//! service.store_text("The mitochondria is the powerhouse of the cell",
//!                    &IngestOptions::default())?;
//!
//! // Retrieve through the full pipeline
//! let result = service.search("what powers the cell", None, None).await?;
//! println!("{} core results, trace {}", result.core.len(), result.trace_id);
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local ONNX embeddings with fastembed; without
//!   it the deterministic hashed projection is used
//! - `vector-search` (default): HNSW vector index with USearch; without it
//!   an exact-scan index with identical semantics
//! - `full`: everything

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod bayesian;
pub mod chunker;
pub mod config;
pub mod diagnostics;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod lifecycle;
pub mod memory;
pub mod modes;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod tiers;
pub mod vault;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{
    BayesianConfig, ChunkingConfig, DecayConfig, FusionWeights, ModeProfile, ModesConfig,
    NexusConfig, PerformanceConfig, PipelineConfig, StorageConfig,
};

pub use error::{CoreError, Result};

pub use memory::{
    normalize_entity_id, AgentIdentity, Chunk, Entity, EntityType, Event, EventKind,
    IntentCategory, LifecycleStage, MemoryCategory, QueryTrace, RetentionTier, RetrievedRef,
    TaggingEnvelope, TimestampTriplet, TraceErrorKind,
};

pub use embeddings::{
    cosine_similarity, euclidean_distance, EmbeddingBackend, EmbeddingError, EmbeddingService,
    EMBEDDING_DIMENSIONS,
};

pub use chunker::{ChunkPiece, SemanticChunker};

pub use storage::{ChunkMeta, MetaStore, UndoEntry, MIGRATIONS};

pub use vector::{VectorStore, VectorStoreConfig, VectorStoreStats};

pub use graph::{
    personalized_pagerank, ppr_with_fallback, EntityExtractor, GraphEdge, GraphNode, GraphStore,
    PprOutcome, PprParams, Subgraph, SubgraphEdge,
};

pub use bayesian::{BayesianNetwork, InferenceMethod, InferenceResult};

pub use modes::{Mode, ModeDetection, ModeDetector};

pub use tiers::{
    query_seed, BayesianTier, GraphTier, MetadataFilter, QueryContext, RetrievalTier,
    TierCandidate, TierHealth, TierOutput, VectorTier,
};

pub use pipeline::{NexusPipeline, PipelineError, PipelineResult, RankedResult, TierScores};

pub use lifecycle::{Clock, LifecycleManager, RehydrationHit, TickReport};

pub use ingest::{Indexer, IngestOptions, IngestReport, IngestWorker, VaultEvent};

pub use vault::VaultWatcher;

pub use diagnostics::{
    attribute, attribution_stats, replay, AttributionStats, AttributionVerdict, ReplayDiff,
    ReplayReport, TraceSink,
};

pub use service::{MemoryService, TraceWriteMode};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model (384 dimensions, unit-norm output)
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Chunk, CoreError, EmbeddingService, IngestOptions, LifecycleStage, MemoryService, Mode,
        NexusConfig, NexusPipeline, PipelineResult, QueryTrace, RankedResult, Result,
        TraceWriteMode,
    };
}
