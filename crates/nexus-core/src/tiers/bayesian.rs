//! Bayesian tier.
//!
//! Builds the entity network from the current graph, treats query
//! entities as evidence, and scores chunks by the posterior presence
//! probability of the entities they mention. Inference is exact for
//! small queries and Gibbs-sampled beyond that, with a soft deadline;
//! a timeout yields partial results flagged on the output, never an
//! error — the pipeline treats missing Bayesian scores as 0.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::bayesian::BayesianNetwork;
use crate::config::BayesianConfig;
use crate::error::{CoreError, Result};
use crate::graph::GraphStore;
use crate::storage::MetaStore;

use super::{QueryContext, RetrievalTier, TierCandidate, TierHealth, TierOutput};

/// Cap on posterior query variables per request
const MAX_QUERY_VARS: usize = 16;

/// Probabilistic retrieval tier
pub struct BayesianTier {
    graph: Arc<RwLock<GraphStore>>,
    meta: Arc<MetaStore>,
    config: BayesianConfig,
    /// Soft inference deadline (1 s default)
    deadline: Duration,
}

impl BayesianTier {
    pub fn new(
        graph: Arc<RwLock<GraphStore>>,
        meta: Arc<MetaStore>,
        config: BayesianConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            graph,
            meta,
            config,
            deadline,
        }
    }

    /// Evidence variables: query entities (extracted or raw tokens) that
    /// exist in the network.
    fn evidence_vars(&self, ctx: &QueryContext, network: &BayesianNetwork) -> Vec<String> {
        let mut evidence: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for id in &ctx.entity_ids {
            if network.variable_index(id).is_some() && seen.insert(id.clone()) {
                evidence.push(id.clone());
            }
        }
        let tokens: Vec<String> = ctx
            .text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        for token in &tokens {
            if network.variable_index(token).is_some() && seen.insert(token.clone()) {
                evidence.push(token.clone());
            }
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{}_{}", pair[0], pair[1]);
            if network.variable_index(&bigram).is_some() && seen.insert(bigram.clone()) {
                evidence.push(bigram);
            }
        }

        evidence.sort();
        evidence
    }
}

impl RetrievalTier for BayesianTier {
    fn name(&self) -> &'static str {
        "bayesian"
    }

    fn query(&self, ctx: &QueryContext, top_k: usize) -> Result<TierOutput> {
        let graph = self
            .graph
            .read()
            .map_err(|_| CoreError::Internal("graph store lock poisoned".to_string()))?;

        let network = BayesianNetwork::from_graph(&graph, &self.meta, &self.config);
        if network.variable_count() == 0 {
            return Ok(TierOutput::empty());
        }

        let evidence_names = self.evidence_vars(ctx, &network);
        if evidence_names.is_empty() {
            return Ok(TierOutput::empty());
        }

        // Candidate chunks: anything mentioning the evidence entities or
        // their 1-hop neighborhood in the network
        let mut related: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = evidence_names.iter().cloned().collect();
        for name in &evidence_names {
            for (neighbor, _) in graph.related_entities(name) {
                if network.variable_index(&neighbor).is_some() && seen.insert(neighbor.clone()) {
                    related.push(neighbor);
                }
            }
        }
        related.sort();
        related.truncate(MAX_QUERY_VARS);

        let mut chunk_entities: HashMap<String, Vec<String>> = HashMap::new();
        for entity in evidence_names.iter().chain(related.iter()) {
            for (chunk_id, _) in graph.chunks_mentioning(entity) {
                chunk_entities.entry(chunk_id).or_default().push(entity.clone());
            }
        }
        if chunk_entities.is_empty() {
            return Ok(TierOutput::empty());
        }

        let evidence: HashMap<String, bool> =
            evidence_names.iter().map(|n| (n.clone(), true)).collect();
        let result = network.query_conditional(&related, &evidence, self.deadline, ctx.seed);

        // Posterior per entity: evidence is certain, the rest inferred
        let posterior = |entity: &str| -> f64 {
            if evidence.contains_key(entity) {
                1.0
            } else {
                result.distribution.get(entity).copied().unwrap_or(0.0)
            }
        };

        let mut candidates: Vec<TierCandidate> = Vec::with_capacity(chunk_entities.len());
        for (chunk_id, mut entities) in chunk_entities {
            entities.sort();
            entities.dedup();
            let mean: f64 =
                entities.iter().map(|e| posterior(e)).sum::<f64>() / entities.len() as f64;
            let multiplier = self
                .meta
                .get_chunk(&chunk_id)?
                .map(|c| c.score_multiplier())
                .unwrap_or(1.0);
            candidates.push(TierCandidate {
                chunk_id,
                score: (mean as f32).clamp(0.0, 1.0) * multiplier,
                entities,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(top_k);

        let degraded = if result.partial {
            Some("bayesian inference hit its soft deadline, partial posterior".to_string())
        } else {
            None
        };
        Ok(TierOutput { candidates, degraded })
    }

    fn health(&self) -> TierHealth {
        match self.graph.read() {
            Ok(graph) if graph.entity_count() == 0 => {
                TierHealth::Degraded("no entities to build a network from".to_string())
            }
            Ok(_) => TierHealth::Healthy,
            Err(_) => TierHealth::Unavailable("graph store lock poisoned".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Entity, EntityType};
    use crate::tiers::query_seed;
    use tempfile::TempDir;

    fn setup() -> (BayesianTier, TempDir) {
        let dir = TempDir::new().unwrap();
        let meta = Arc::new(MetaStore::open(&dir.path().join("meta.db")).unwrap());
        let mut graph = GraphStore::in_memory(10_000);
        for name in ["Python", "Machine Learning", "Neural Networks"] {
            graph.add_entity(&Entity::new(name, EntityType::Concept)).unwrap();
        }
        graph.add_related("python", "machine_learning", 0.8).unwrap();
        graph.add_related("machine_learning", "neural_networks", 0.7).unwrap();
        graph.add_mention("chunk-py", "python", 1).unwrap();
        graph.add_mention("chunk-ml", "machine_learning", 1).unwrap();

        let tier = BayesianTier::new(
            Arc::new(RwLock::new(graph)),
            meta,
            BayesianConfig::default(),
            Duration::from_secs(1),
        );
        (tier, dir)
    }

    fn ctx(text: &str) -> QueryContext {
        QueryContext {
            text: text.to_string(),
            embedding: vec![],
            entity_ids: vec![],
            seed: query_seed(text),
        }
    }

    #[test]
    fn test_evidence_chunk_scores_highest() {
        let (tier, _dir) = setup();
        let output = tier.query(&ctx("python"), 10).unwrap();
        assert!(!output.candidates.is_empty());
        assert_eq!(output.candidates[0].chunk_id, "chunk-py");
        assert!(output.candidates[0].score > 0.9);
    }

    #[test]
    fn test_no_evidence_returns_empty() {
        let (tier, _dir) = setup();
        let output = tier.query(&ctx("unrelated words entirely"), 10).unwrap();
        assert!(output.candidates.is_empty());
    }

    #[test]
    fn test_scores_in_unit_interval() {
        let (tier, _dir) = setup();
        let output = tier.query(&ctx("python machine learning"), 10).unwrap();
        for c in &output.candidates {
            assert!((0.0..=1.0).contains(&c.score));
        }
    }

    #[test]
    fn test_deterministic_given_seed() {
        let (tier, _dir) = setup();
        let a = tier.query(&ctx("python"), 10).unwrap();
        let b = tier.query(&ctx("python"), 10).unwrap();
        let scores_a: Vec<_> = a.candidates.iter().map(|c| (c.chunk_id.clone(), c.score)).collect();
        let scores_b: Vec<_> = b.candidates.iter().map(|c| (c.chunk_id.clone(), c.score)).collect();
        assert_eq!(scores_a, scores_b);
    }

    #[test]
    fn test_health_degraded_without_entities() {
        let dir = TempDir::new().unwrap();
        let meta = Arc::new(MetaStore::open(&dir.path().join("meta.db")).unwrap());
        let tier = BayesianTier::new(
            Arc::new(RwLock::new(GraphStore::in_memory(100))),
            meta,
            BayesianConfig::default(),
            Duration::from_secs(1),
        );
        assert!(matches!(tier.health(), TierHealth::Degraded(_)));
    }
}
