//! Personalized PageRank over the entity/chunk graph.
//!
//! Power iteration with a personalization vector spread equally over the
//! seed nodes. Dangling mass is redistributed through the personalization
//! vector, so total mass conserves to 1 within tolerance. Iteration order
//! is fixed (ascending node index), making runs deterministic for a fixed
//! graph and seed set.

use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::GraphStore;

/// PPR parameters
#[derive(Debug, Clone, Copy)]
pub struct PprParams {
    /// Damping factor alpha
    pub damping: f64,
    /// L1 convergence tolerance
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PprParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

/// How the score vector was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PprOutcome {
    /// Converged at the requested tolerance
    Converged { iterations: usize },
    /// Converged only after relaxing to 1e-4 / 200 iterations
    ConvergedRelaxed { iterations: usize },
    /// Power iteration failed twice; degree centrality biased toward the
    /// seed set was used instead
    DegreeFallback,
}

/// Run PPR from a seed set. Returns node-id -> score, or `None` if the
/// iteration did not converge within the parameter budget.
pub fn personalized_pagerank(
    store: &GraphStore,
    seeds: &[String],
    params: &PprParams,
) -> Option<(HashMap<String, f64>, usize)> {
    if seeds.is_empty() {
        return Some((HashMap::new(), 0));
    }

    let graph = store.inner();
    let mut nodes: Vec<NodeIndex> = graph.node_indices().collect();
    nodes.sort_by_key(|n| n.index());
    if nodes.is_empty() {
        return Some((HashMap::new(), 0));
    }

    let position: HashMap<NodeIndex, usize> =
        nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();

    // Personalization: equal weight on matched seed nodes, zero elsewhere
    let mut personalization = vec![0.0_f64; nodes.len()];
    let mut matched = 0usize;
    for seed in seeds {
        if let Some(idx) = store.entity_index(seed) {
            personalization[position[&idx]] += 1.0;
            matched += 1;
        }
    }
    if matched == 0 {
        return Some((HashMap::new(), 0));
    }
    for p in &mut personalization {
        *p /= matched as f64;
    }

    // Out-degree weights per node
    let out_weight: Vec<f64> = nodes
        .iter()
        .map(|&n| {
            graph
                .edges_directed(n, Direction::Outgoing)
                .map(|e| e.weight().weight())
                .sum()
        })
        .collect();

    let mut score = personalization.clone();
    let d = params.damping;

    for iteration in 0..params.max_iterations {
        let mut next = vec![0.0_f64; nodes.len()];

        let dangling_mass: f64 = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| out_weight[*i] <= 0.0)
            .map(|(i, _)| score[i])
            .sum();

        for (i, &node) in nodes.iter().enumerate() {
            if out_weight[i] <= 0.0 {
                continue;
            }
            let share = d * score[i] / out_weight[i];
            for edge in graph.edges_directed(node, Direction::Outgoing) {
                let j = position[&edge.target()];
                next[j] += share * edge.weight().weight();
            }
        }

        for (i, p) in personalization.iter().enumerate() {
            next[i] += (1.0 - d) * p + d * dangling_mass * p;
        }

        let delta: f64 = score
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        score = next;

        if delta < params.tolerance {
            let result = nodes
                .iter()
                .enumerate()
                .map(|(i, &n)| (graph[n].id().to_string(), score[i]))
                .collect();
            return Some((result, iteration + 1));
        }
    }

    None
}

/// PPR with the retry ladder: default tolerance, then relaxed, then degree
/// centrality biased toward the seeds.
pub fn ppr_with_fallback(
    store: &GraphStore,
    seeds: &[String],
    damping: f64,
) -> (HashMap<String, f64>, PprOutcome) {
    let strict = PprParams {
        damping,
        ..PprParams::default()
    };
    if let Some((scores, iterations)) = personalized_pagerank(store, seeds, &strict) {
        return (scores, PprOutcome::Converged { iterations });
    }

    tracing::warn!("PPR did not converge at 1e-6/100, retrying at 1e-4/200");
    let relaxed = PprParams {
        damping,
        tolerance: 1e-4,
        max_iterations: 200,
    };
    if let Some((scores, iterations)) = personalized_pagerank(store, seeds, &relaxed) {
        return (scores, PprOutcome::ConvergedRelaxed { iterations });
    }

    tracing::warn!("PPR failed twice, falling back to seed-biased degree centrality");
    (degree_centrality_biased(store, seeds), PprOutcome::DegreeFallback)
}

/// Degree centrality normalized to unit mass, with seed nodes doubled.
fn degree_centrality_biased(store: &GraphStore, seeds: &[String]) -> HashMap<String, f64> {
    let graph = store.inner();
    let mut scores: HashMap<String, f64> = HashMap::new();
    for node in graph.node_indices() {
        let degree = graph.neighbors_undirected(node).count() as f64;
        scores.insert(graph[node].id().to_string(), degree + 1.0);
    }
    for seed in seeds {
        if let Some(s) = scores.get_mut(seed) {
            *s *= 2.0;
        }
    }
    let total: f64 = scores.values().sum();
    if total > 0.0 {
        for s in scores.values_mut() {
            *s /= total;
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Entity, EntityType};

    fn chain_store() -> GraphStore {
        let mut store = GraphStore::in_memory(1_000);
        for name in ["Python", "Machine Learning", "Neural Networks"] {
            store.add_entity(&Entity::new(name, EntityType::Concept)).unwrap();
        }
        store.add_related("python", "machine_learning", 0.8).unwrap();
        store.add_related("machine_learning", "neural_networks", 0.7).unwrap();
        store
    }

    #[test]
    fn test_mass_conserves() {
        let store = chain_store();
        let (scores, _) = personalized_pagerank(
            &store,
            &["python".to_string()],
            &PprParams::default(),
        )
        .unwrap();
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-3, "PPR mass {} not conserved", total);
    }

    #[test]
    fn test_scores_nonnegative() {
        let store = chain_store();
        let (scores, _) = personalized_pagerank(
            &store,
            &["python".to_string()],
            &PprParams::default(),
        )
        .unwrap();
        assert!(scores.values().all(|&s| s >= 0.0));
    }

    #[test]
    fn test_seed_scores_highest() {
        let store = chain_store();
        let (scores, _) = personalized_pagerank(
            &store,
            &["python".to_string()],
            &PprParams::default(),
        )
        .unwrap();
        let python = scores["python"];
        let neural = scores["neural_networks"];
        assert!(python > neural, "seed should outrank distant node");
    }

    #[test]
    fn test_multi_hop_mass_reaches_distant_nodes() {
        let store = chain_store();
        let (scores, _) = personalized_pagerank(
            &store,
            &["python".to_string()],
            &PprParams::default(),
        )
        .unwrap();
        // Two hops away, only reachable through machine_learning
        assert!(scores["neural_networks"] > 0.0);
    }

    #[test]
    fn test_deterministic() {
        let store = chain_store();
        let seeds = vec!["python".to_string()];
        let a = personalized_pagerank(&store, &seeds, &PprParams::default()).unwrap();
        let b = personalized_pagerank(&store, &seeds, &PprParams::default()).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn test_empty_seeds_empty_scores() {
        let store = chain_store();
        let (scores, _) =
            personalized_pagerank(&store, &[], &PprParams::default()).unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn test_unmatched_seeds_empty_scores() {
        let store = chain_store();
        let (scores, _) = personalized_pagerank(
            &store,
            &["unknown_entity".to_string()],
            &PprParams::default(),
        )
        .unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn test_fallback_ladder_converges_normally() {
        let store = chain_store();
        let (_, outcome) = ppr_with_fallback(&store, &["python".to_string()], 0.85);
        assert!(matches!(outcome, PprOutcome::Converged { .. }));
    }

    #[test]
    fn test_degree_fallback_normalized() {
        let store = chain_store();
        let scores = degree_centrality_biased(&store, &["python".to_string()]);
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
