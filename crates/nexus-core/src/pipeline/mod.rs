//! Nexus pipeline.
//!
//! The five-step query sequence: recall from all tiers in parallel,
//! filter by per-tier confidence, deduplicate (by id, then by semantic
//! similarity), rank by the weighted fused score, and compress to the
//! mode profile's core/extended sets within a token budget.
//!
//! Tier failures degrade the request instead of failing it; the request
//! fails only when every tier fails. Every request — including failures —
//! produces a trace, and the trace id rides on the error.
//!
//! Fusion weights are 0.4 vector / 0.4 graph / 0.2 Bayesian, renormalized
//! over the tiers that produced any candidates for the query: a missing
//! per-chunk tier score still contributes 0, but a tier with nothing to
//! say does not drag every score toward zero.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{FusionWeights, ModeProfile, ModesConfig, PipelineConfig};
use crate::diagnostics::TraceSink;
use crate::embeddings::{cosine_similarity, EmbeddingService};
use crate::error::CoreError;
use crate::graph::EntityExtractor;
use crate::lifecycle::LifecycleManager;
use crate::memory::{Chunk, EventKind, QueryTrace, RetrievedRef, TraceErrorKind};
use crate::modes::{Mode, ModeDetector};
use crate::tiers::{query_seed, QueryContext, RetrievalTier, TierCandidate};

/// Per-tier scores carried on a result
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TierScores {
    pub vector: Option<f32>,
    pub graph: Option<f32>,
    pub bayesian: Option<f32>,
}

/// One ranked result
#[derive(Debug, Clone, serde::Serialize)]
pub struct RankedResult {
    pub chunk_id: String,
    pub text: String,
    pub fused_score: f32,
    pub tier_scores: TierScores,
    pub source_path: String,
    pub tags: Vec<String>,
    /// Entities that contributed graph mass, when any
    pub entities: Vec<String>,
}

/// Pipeline response
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub core: Vec<RankedResult>,
    pub extended: Vec<RankedResult>,
    pub trace_id: String,
    pub mode: Mode,
    /// Deadline or budget cut this response short
    pub partial: bool,
    pub degradations: Vec<String>,
}

/// A failed request still carries its trace id.
#[derive(Debug)]
pub struct PipelineError {
    pub trace_id: String,
    pub error: CoreError,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (trace {})", self.error, self.trace_id)
    }
}

impl std::error::Error for PipelineError {}

/// Working candidate during steps 2-5
#[derive(Debug, Clone)]
struct Candidate {
    chunk_id: String,
    scores: TierScores,
    entities: Vec<String>,
    fused: f32,
    chunk: Option<Chunk>,
}

/// The five-step pipeline
pub struct NexusPipeline {
    tiers: Vec<Arc<dyn RetrievalTier>>,
    detector: ModeDetector,
    extractor: EntityExtractor,
    embedder: Arc<EmbeddingService>,
    sink: Arc<TraceSink>,
    lifecycle: Option<Arc<LifecycleManager>>,
    config: PipelineConfig,
    modes: ModesConfig,
}

impl NexusPipeline {
    pub fn new(
        tiers: Vec<Arc<dyn RetrievalTier>>,
        embedder: Arc<EmbeddingService>,
        sink: Arc<TraceSink>,
        lifecycle: Option<Arc<LifecycleManager>>,
        config: PipelineConfig,
        modes: ModesConfig,
    ) -> Self {
        Self {
            tiers,
            detector: ModeDetector::new(),
            extractor: EntityExtractor::new(),
            embedder,
            sink,
            lifecycle,
            config,
            modes,
        }
    }

    pub fn mode_profile(&self, mode: Mode) -> &ModeProfile {
        match mode {
            Mode::Execution => &self.modes.execution,
            Mode::Planning => &self.modes.planning,
            Mode::Brainstorming => &self.modes.brainstorming,
        }
    }

    pub fn detector(&self) -> &ModeDetector {
        &self.detector
    }

    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    /// Run the full pipeline for one request.
    pub async fn process(
        &self,
        query: &str,
        mode_override: Option<Mode>,
        limit: Option<usize>,
    ) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        let mut trace = QueryTrace::begin(query, None);
        let trace_id = trace.trace_id.clone();

        // Malformed input never reaches the tiers
        if query.trim().is_empty() {
            let error = CoreError::Input("query is empty".to_string());
            trace.error = Some(error.to_string());
            trace.error_kind = Some(TraceErrorKind::SystemError);
            trace.total_ms = started.elapsed().as_secs_f64() * 1_000.0;
            self.sink.submit(trace);
            return Err(PipelineError { trace_id, error });
        }

        // Mode selection
        match mode_override {
            Some(mode) => {
                trace.mode = mode;
                trace.mode_confidence = 1.0;
                trace.routing_rationale.push_str("mode pinned by caller; ");
            }
            None => {
                let detection = self.detector.detect(query);
                trace.mode = detection.mode;
                trace.mode_confidence = detection.confidence;
                trace.mode_detection_ms = detection.detection_ms;
                trace.routing_rationale.push_str(&format!(
                    "mode {} at {:.2} via [{}]; ",
                    detection.mode.as_str(),
                    detection.confidence,
                    detection.patterns_matched.join(",")
                ));
            }
        }
        let mode = trace.mode;
        let profile = self.mode_profile(mode).clone();

        // Shared query context: embed and extract once
        let mut degradations: Vec<String> = Vec::new();
        let embedding = match self.embedder.embed_query(query) {
            Ok(v) => v,
            Err(e) => {
                degradations.push(format!("embedder unavailable: {}", e));
                Vec::new()
            }
        };
        let ctx = QueryContext {
            text: query.to_string(),
            embedding,
            entity_ids: self.extractor.extract_ids(query),
            seed: query_seed(query),
        };

        // Query-driven rehydration runs before recall so restored chunks
        // are already back in the vector index
        if let Some(lifecycle) = &self.lifecycle {
            if !ctx.embedding.is_empty() {
                match lifecycle.rehydrate_matches(&ctx.embedding) {
                    Ok(hits) if !hits.is_empty() => {
                        trace
                            .routing_rationale
                            .push_str(&format!("rehydrated {} archived chunks; ", hits.len()));
                    }
                    Ok(_) => {}
                    Err(e) => degradations.push(format!("rehydration check failed: {}", e)),
                }
            }
        }

        // Step 1 — recall, all tiers in parallel under the mode deadline
        let recall_started = Instant::now();
        let deadline = Duration::from_millis(profile.deadline_ms);
        let top_n = self.config.recall_top_n;

        let mut handles = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let tier = Arc::clone(tier);
            let ctx = ctx.clone();
            let name = tier.name();
            handles.push((
                name,
                tokio::time::timeout(
                    deadline,
                    tokio::task::spawn_blocking(move || tier.query(&ctx, top_n)),
                ),
            ));
        }

        let mut raw: Vec<(&'static str, TierCandidate)> = Vec::new();
        let mut tiers_answered: HashSet<&'static str> = HashSet::new();
        let mut tiers_with_candidates: HashSet<&'static str> = HashSet::new();
        let mut partial = false;

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(Ok(output))) => {
                    tiers_answered.insert(name);
                    if let Some(note) = output.degraded {
                        degradations.push(format!("{}: {}", name, note));
                        if name == "bayesian" {
                            // A Bayesian timeout is partial posterior, not absence
                            trace.verification = Some(serde_json::json!({
                                "bayesian_partial": true
                            }));
                        }
                    }
                    if !output.candidates.is_empty() {
                        tiers_with_candidates.insert(name);
                    }
                    raw.extend(output.candidates.into_iter().map(|c| (name, c)));
                }
                Ok(Ok(Err(e))) => {
                    degradations.push(format!("{} tier unavailable: {}", name, e));
                }
                Ok(Err(join_error)) => {
                    degradations.push(format!("{} tier panicked: {}", name, join_error));
                }
                Err(_elapsed) => {
                    partial = true;
                    degradations.push(format!(
                        "{} tier cancelled at {}ms deadline",
                        name, profile.deadline_ms
                    ));
                }
            }
        }
        trace.retrieval_ms = recall_started.elapsed().as_secs_f64() * 1_000.0;
        trace.stores_queried = {
            let mut stores: Vec<String> = tiers_answered.iter().map(|s| s.to_string()).collect();
            stores.sort();
            stores
        };

        for d in &degradations {
            tracing::warn!(trace_id = %trace.trace_id, degradation = %d, "pipeline degradation");
            let _ = self.sink.store().append_event(
                EventKind::TierDegraded,
                serde_json::json!({ "trace_id": trace.trace_id, "detail": d }),
            );
        }

        // Recall fails the request only when every tier failed
        if tiers_answered.is_empty() && !self.tiers.is_empty() {
            let error = CoreError::Routing("all retrieval tiers failed".to_string());
            trace.error = Some(error.to_string());
            trace.error_kind = Some(TraceErrorKind::SystemError);
            trace.partial = partial;
            trace.total_ms = started.elapsed().as_secs_f64() * 1_000.0;
            self.sink.submit(trace);
            return Err(PipelineError { trace_id, error });
        }

        // Step 2 — filter by per-tier confidence
        let raw = filter_by_confidence(raw, self.config.confidence_threshold);

        // Step 3a — group by chunk id, keep the max score per tier
        let mut candidates = merge_by_id(raw);

        // Attach chunk metadata (needed for dedupe embeddings, tie-breaks,
        // and result texts); drop candidates whose row vanished
        for candidate in &mut candidates {
            candidate.chunk = self
                .sink
                .store()
                .get_chunk(&candidate.chunk_id)
                .ok()
                .flatten();
        }
        candidates.retain(|c| c.chunk.is_some());

        // Fused score over the tiers that spoke up this query
        let active_weight = active_weight(&self.config.weights, &tiers_with_candidates);
        for candidate in &mut candidates {
            candidate.fused = fuse_scores(&candidate.scores, &self.config.weights, active_weight);
        }

        // Step 3b — collapse semantic near-duplicates
        let mut candidates = dedupe_semantic(candidates, self.config.dedup_threshold);

        // Step 4 — rank
        rank(&mut candidates);

        // Step 5 — compress to the mode profile
        let (core, extended, budget_exhausted) = compress(candidates, &profile, limit);
        if budget_exhausted {
            partial = true;
            degradations.push("token budget exhausted before core set fit".to_string());
        }

        // Access bookkeeping for everything served in the core set
        for result in &core {
            let touched = match &self.lifecycle {
                Some(lifecycle) => lifecycle.on_query_hit(&result.chunk_id),
                None => self
                    .sink
                    .store()
                    .touch_chunk(&result.chunk_id, chrono::Utc::now()),
            };
            if let Err(e) = touched {
                tracing::warn!(chunk_id = %result.chunk_id, error = %e, "query-hit bookkeeping failed");
            }
        }

        trace.retrieved = core
            .iter()
            .chain(extended.iter())
            .map(|r| RetrievedRef {
                chunk_id: r.chunk_id.clone(),
                score: r.fused_score,
                source: r.source_path.clone(),
            })
            .collect();
        trace.partial = partial;
        trace.output = render_output(&core, &extended);
        trace.total_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.sink.submit(trace);

        Ok(PipelineResult {
            core,
            extended,
            trace_id,
            mode,
            partial,
            degradations,
        })
    }
}

/// Deterministic rendering of the result set; replay compares these bytes.
fn render_output(core: &[RankedResult], extended: &[RankedResult]) -> String {
    let brief = |results: &[RankedResult]| -> Vec<serde_json::Value> {
        results
            .iter()
            .map(|r| serde_json::json!({ "id": r.chunk_id, "score": r.fused_score }))
            .collect()
    };
    serde_json::json!({ "core": brief(core), "extended": brief(extended) }).to_string()
}

// ============================================================================
// PURE PIPELINE STEPS
// ============================================================================

/// Step 2: drop tier candidates below the per-tier confidence floor.
fn filter_by_confidence(
    raw: Vec<(&'static str, TierCandidate)>,
    threshold: f32,
) -> Vec<(&'static str, TierCandidate)> {
    raw.into_iter()
        .filter(|(_, c)| c.score >= threshold)
        .collect()
}

/// Step 3a: group by chunk id, retaining the max score per tier.
fn merge_by_id(raw: Vec<(&'static str, TierCandidate)>) -> Vec<Candidate> {
    let mut by_id: HashMap<String, Candidate> = HashMap::new();
    for (tier, tc) in raw {
        let entry = by_id.entry(tc.chunk_id.clone()).or_insert_with(|| Candidate {
            chunk_id: tc.chunk_id.clone(),
            scores: TierScores::default(),
            entities: Vec::new(),
            fused: 0.0,
            chunk: None,
        });
        let slot = match tier {
            "vector" => &mut entry.scores.vector,
            "graph" => &mut entry.scores.graph,
            "bayesian" => &mut entry.scores.bayesian,
            other => {
                tracing::warn!(tier = other, "candidate from unknown tier ignored");
                continue;
            }
        };
        *slot = Some(slot.map_or(tc.score, |existing: f32| existing.max(tc.score)));
        for entity in tc.entities {
            if !entry.entities.contains(&entity) {
                entry.entities.push(entity);
            }
        }
    }
    let mut candidates: Vec<Candidate> = by_id.into_values().collect();
    candidates.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
    candidates
}

/// Sum of weights for tiers that produced any candidates.
fn active_weight(weights: &FusionWeights, active: &HashSet<&'static str>) -> f32 {
    let mut total = 0.0;
    if active.contains("vector") {
        total += weights.vector;
    }
    if active.contains("graph") {
        total += weights.graph;
    }
    if active.contains("bayesian") {
        total += weights.bayesian;
    }
    total
}

/// Fused score: weighted sum with missing tier scores contributing 0,
/// renormalized by the active-tier weight mass.
fn fuse_scores(scores: &TierScores, weights: &FusionWeights, active_weight: f32) -> f32 {
    if active_weight <= 0.0 {
        return 0.0;
    }
    let weighted = weights.vector * scores.vector.unwrap_or(0.0)
        + weights.graph * scores.graph.unwrap_or(0.0)
        + weights.bayesian * scores.bayesian.unwrap_or(0.0);
    (weighted / active_weight).clamp(0.0, 1.0)
}

/// Step 3b: collapse chunks whose embeddings agree at or above the dedup
/// threshold, keeping the higher-fused chunk. Idempotent: survivors are
/// pairwise below the threshold.
fn dedupe_semantic(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let duplicate = kept.iter().any(|survivor| {
            match (&survivor.chunk, &candidate.chunk) {
                (Some(a), Some(b)) if survivor.chunk_id != candidate.chunk_id => {
                    cosine_similarity(&a.embedding, &b.embedding) >= threshold
                }
                _ => false,
            }
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Step 4: fused score descending; ties break on recency of last access,
/// then lexicographic chunk id. Stable for equal keys.
fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_access = a.chunk.as_ref().map(|c| c.last_accessed);
                let b_access = b.chunk.as_ref().map(|c| c.last_accessed);
                b_access.cmp(&a_access)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

fn to_result(candidate: Candidate) -> RankedResult {
    let chunk = candidate.chunk.expect("compress only sees resolved candidates");
    RankedResult {
        chunk_id: candidate.chunk_id,
        text: chunk.text.clone(),
        fused_score: candidate.fused,
        tier_scores: candidate.scores,
        source_path: chunk.source_path.clone(),
        tags: chunk.tags.clone(),
        entities: candidate.entities,
    }
}

/// Step 5: apply the mode's confidence floor, split core/extended, and
/// enforce the token budget by dropping extended entries from the tail.
/// Returns true in the last slot when even the bare core set exceeds the
/// budget (surfaced as a partial result, never a failure).
fn compress(
    candidates: Vec<Candidate>,
    profile: &ModeProfile,
    limit: Option<usize>,
) -> (Vec<RankedResult>, Vec<RankedResult>, bool) {
    let floored: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.fused >= profile.threshold)
        .collect();

    let core_k = limit.map_or(profile.core_k, |l| profile.core_k.min(l));
    let extended_k = limit.map_or(profile.extended_k, |l| {
        profile.extended_k.min(l.saturating_sub(core_k))
    });

    let mut iter = floored.into_iter();
    let core: Vec<RankedResult> = iter.by_ref().take(core_k).map(to_result).collect();
    let mut extended: Vec<RankedResult> = iter.take(extended_k).map(to_result).collect();

    let token_count = |results: &[RankedResult]| -> usize {
        results
            .iter()
            .map(|r| r.text.split_whitespace().count())
            .sum()
    };

    let core_tokens = token_count(&core);
    // Extended drops from the tail until the budget fits; core never drops
    while !extended.is_empty() && core_tokens + token_count(&extended) > profile.token_budget {
        extended.pop();
    }

    let budget_exhausted = core_tokens > profile.token_budget;
    (core, extended, budget_exhausted)
}

// ============================================================================
// TESTS
// ============================================================================
