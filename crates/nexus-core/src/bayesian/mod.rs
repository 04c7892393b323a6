//! Bayesian network derived from the entity graph.
//!
//! High-confidence entities become binary variables (absent/present);
//! `related_to` co-occurrence edges become conditional dependencies,
//! directed from the lexicographically smaller id to the larger so the
//! structure is a DAG by construction. Conditional distributions follow a
//! noisy-OR model whose per-parent weights are estimated from historical
//! co-occurrence observations; below the minimum sample size a parent
//! contributes the uniform prior. Node count is capped and low-confidence
//! edges are pruned per configuration.

mod infer;

pub use infer::{
    gibbs_sampling, variable_elimination, InferenceMethod, InferenceResult,
    VARIABLE_ELIMINATION_LIMIT,
};

use std::collections::HashMap;

use crate::config::BayesianConfig;
use crate::graph::GraphStore;
use crate::storage::MetaStore;

/// Uniform prior used when observations are too sparse
const UNIFORM_PRIOR: f64 = 0.5;

/// Baseline probability of presence with no active parent
const LEAK: f64 = 0.2;

/// Maximum parents per variable (strongest edges win)
const MAX_PARENTS: usize = 4;

/// The derived network
#[derive(Debug, Clone)]
pub struct BayesianNetwork {
    pub(crate) variables: Vec<String>,
    index: HashMap<String, usize>,
    pub(crate) parents: Vec<Vec<usize>>,
    children: Vec<Vec<usize>>,
    /// Aligned with `parents`: P(present | that parent present alone)
    parent_weights: Vec<Vec<f64>>,
    /// P(present | no parent present); the prior for root variables
    leak: Vec<f64>,
}

impl BayesianNetwork {
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn variable_names(&self) -> &[String] {
        &self.variables
    }

    /// Noisy-OR: P(var = present | parent assignment).
    pub(crate) fn probability_present(&self, var: usize, assignment: &[u8]) -> f64 {
        let mut q = 1.0 - self.leak[var];
        for (i, &parent) in self.parents[var].iter().enumerate() {
            if assignment[parent] == 1 {
                q *= 1.0 - self.parent_weights[var][i];
            }
        }
        1.0 - q
    }

    /// P(var = present | its Markov blanket in `state`).
    pub(crate) fn conditional_given_blanket(&self, var: usize, state: &[u8]) -> f64 {
        let mut scratch = state.to_vec();

        let mut weight = [0.0_f64; 2];
        for value in 0..2usize {
            scratch[var] = value as u8;
            let p_self = self.probability_present(var, &scratch);
            let mut w = if value == 1 { p_self } else { 1.0 - p_self };
            for &child in &self.children[var] {
                let p_child = self.probability_present(child, &scratch);
                w *= if state[child] == 1 {
                    p_child
                } else {
                    1.0 - p_child
                };
            }
            weight[value] = w;
        }

        let total = weight[0] + weight[1];
        if total > 0.0 {
            weight[1] / total
        } else {
            UNIFORM_PRIOR
        }
    }

    /// Every CPD entry must be a probability; with binary states each row
    /// sums to exactly 1 by construction, so this checks the open edge:
    /// entries inside [0, 1].
    pub fn validate(&self) -> bool {
        self.leak.iter().all(|p| (0.0..=1.0).contains(p))
            && self
                .parent_weights
                .iter()
                .flatten()
                .all(|p| (0.0..=1.0).contains(p))
    }

    /// Build the network from the entity graph plus observation history.
    ///
    /// Variables are the highest-frequency entities up to the node cap;
    /// `related_to` edges at or above the confidence floor become
    /// dependencies. Parent weights come from co-occurrence counts when the
    /// pair has enough samples, otherwise the uniform prior (a deliberate
    /// structural CPD, not a stub).
    pub fn from_graph(graph: &GraphStore, meta: &MetaStore, config: &BayesianConfig) -> Self {
        // Highest-frequency entities first; names break ties for determinism
        let mut candidates: Vec<(String, u64)> = graph
            .entity_ids()
            .into_iter()
            .map(|id| {
                let freq = graph.entity(&id).map(|e| e.cooccurrence_frequency).unwrap_or(0);
                (id, freq)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(config.max_nodes);

        let mut variables: Vec<String> = candidates.into_iter().map(|(id, _)| id).collect();
        variables.sort();
        let index: HashMap<String, usize> = variables
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let n = variables.len();
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut parent_strengths: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];

        for (child_pos, child_id) in variables.iter().enumerate() {
            for (neighbor, strength) in graph.related_entities(child_id) {
                if strength < config.min_edge_confidence {
                    continue;
                }
                let Some(&parent_pos) = index.get(&neighbor) else {
                    continue;
                };
                // Direction: smaller id -> larger id keeps the structure acyclic
                if variables[parent_pos] < *child_id {
                    parent_strengths[child_pos].push((parent_pos, strength));
                }
            }
        }

        let mut parent_weights: Vec<Vec<f64>> = vec![Vec::new(); n];
        for (child, strengths) in parent_strengths.iter_mut().enumerate() {
            strengths.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            strengths.truncate(MAX_PARENTS);
            for &(parent, _) in strengths.iter() {
                let (cooccur, total) = meta
                    .observation_counts(&variables[parent], &variables[child])
                    .unwrap_or((0, 0));
                let weight = if total >= config.min_sample_size {
                    (cooccur as f64 / total as f64).clamp(0.0, 1.0)
                } else {
                    UNIFORM_PRIOR
                };
                parents[child].push(parent);
                parent_weights[child].push(weight);
            }
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (child, ps) in parents.iter().enumerate() {
            for &parent in ps {
                children[parent].push(child);
            }
        }

        let leak = (0..n)
            .map(|v| if parents[v].is_empty() { UNIFORM_PRIOR } else { LEAK })
            .collect();

        Self {
            variables,
            index,
            parents,
            children,
            parent_weights,
            leak,
        }
    }

    /// Conditional query entry point: exact elimination for small queries,
    /// Gibbs sampling beyond [`VARIABLE_ELIMINATION_LIMIT`].
    pub fn query_conditional(
        &self,
        query_vars: &[String],
        evidence: &HashMap<String, bool>,
        deadline: std::time::Duration,
        seed: u64,
    ) -> InferenceResult {
        let query_indices: Vec<usize> = query_vars
            .iter()
            .filter_map(|name| self.variable_index(name))
            .collect();
        let evidence_indices: HashMap<usize, u8> = evidence
            .iter()
            .filter_map(|(name, &present)| {
                self.variable_index(name).map(|i| (i, present as u8))
            })
            .collect();

        if query_indices.is_empty() {
            return InferenceResult {
                distribution: HashMap::new(),
                method: InferenceMethod::VariableElimination,
                partial: false,
            };
        }

        if query_indices.len() <= VARIABLE_ELIMINATION_LIMIT {
            InferenceResult {
                distribution: variable_elimination(self, &query_indices, &evidence_indices),
                method: InferenceMethod::VariableElimination,
                partial: false,
            }
        } else {
            let (distribution, partial) =
                gibbs_sampling(self, &query_indices, &evidence_indices, deadline, seed);
            InferenceResult {
                distribution,
                method: InferenceMethod::GibbsSampling,
                partial,
            }
        }
    }
}

// ============================================================================
// TEST BUILDER
// ============================================================================

/// Hand-built networks for inference tests.
pub struct NetworkBuilder {
    variables: Vec<String>,
    edges: Vec<(String, String, f64)>,
}

impl NetworkBuilder {
    pub fn for_tests() -> Self {
        Self {
            variables: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn variable(mut self, name: &str) -> Self {
        self.variables.push(name.to_string());
        self
    }

    pub fn edge(mut self, parent: &str, child: &str, weight: f64) -> Self {
        self.edges.push((parent.to_string(), child.to_string(), weight));
        self
    }

    pub fn build(self) -> BayesianNetwork {
        let mut variables = self.variables;
        variables.sort();
        let index: HashMap<String, usize> = variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i))
            .collect();
        let n = variables.len();
        let mut parents = vec![Vec::new(); n];
        let mut parent_weights = vec![Vec::new(); n];
        let mut children = vec![Vec::new(); n];
        for (parent, child, weight) in self.edges {
            let p = index[&parent];
            let c = index[&child];
            parents[c].push(p);
            parent_weights[c].push(weight);
            children[p].push(c);
        }
        let leak = (0..n)
            .map(|v: usize| if parents[v].is_empty() { UNIFORM_PRIOR } else { LEAK })
            .collect();
        BayesianNetwork {
            variables,
            index,
            parents,
            children,
            parent_weights,
            leak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Entity, EntityType};
    use tempfile::TempDir;

    fn stores() -> (GraphStore, MetaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let meta = MetaStore::open(&dir.path().join("meta.db")).unwrap();
        let mut graph = GraphStore::in_memory(1_000);
        for name in ["Python", "Machine Learning", "Neural Networks", "Rust"] {
            graph.add_entity(&Entity::new(name, EntityType::Concept)).unwrap();
        }
        graph.add_related("python", "machine_learning", 0.8).unwrap();
        graph.add_related("machine_learning", "neural_networks", 0.7).unwrap();
        // Below the default confidence floor; must be pruned
        graph.add_related("python", "rust", 0.1).unwrap();
        (graph, meta, dir)
    }

    #[test]
    fn test_from_graph_structure() {
        let (graph, meta, _dir) = stores();
        let network = BayesianNetwork::from_graph(&graph, &meta, &BayesianConfig::default());
        assert_eq!(network.variable_count(), 4);
        assert!(network.validate());

        // machine_learning < python, so machine_learning parents python
        let python = network.variable_index("python").unwrap();
        let ml = network.variable_index("machine_learning").unwrap();
        assert!(network.parents[python].contains(&ml));
    }

    #[test]
    fn test_low_confidence_edges_pruned() {
        let (graph, meta, _dir) = stores();
        let network = BayesianNetwork::from_graph(&graph, &meta, &BayesianConfig::default());
        let rust = network.variable_index("rust").unwrap();
        let python = network.variable_index("python").unwrap();
        assert!(!network.parents[rust].contains(&python));
        assert!(!network.parents[python].contains(&rust));
    }

    #[test]
    fn test_node_cap_enforced() {
        let (graph, meta, _dir) = stores();
        let config = BayesianConfig {
            max_nodes: 2,
            ..BayesianConfig::default()
        };
        let network = BayesianNetwork::from_graph(&graph, &meta, &config);
        assert!(network.variable_count() <= 2);
    }

    #[test]
    fn test_sparse_observations_use_uniform_prior() {
        let (graph, meta, _dir) = stores();
        let network = BayesianNetwork::from_graph(&graph, &meta, &BayesianConfig::default());
        let python = network.variable_index("python").unwrap();
        // No observations recorded: every learned weight is the prior
        for &w in &network.parent_weights[python] {
            assert_eq!(w, UNIFORM_PRIOR);
        }
    }

    #[test]
    fn test_observations_shape_weights() {
        let (graph, meta, _dir) = stores();
        for _ in 0..20 {
            meta.record_observation("python", "machine_learning", true).unwrap();
        }
        for _ in 0..5 {
            meta.record_observation("python", "machine_learning", false).unwrap();
        }
        let network = BayesianNetwork::from_graph(&graph, &meta, &BayesianConfig::default());
        let python = network.variable_index("python").unwrap();
        let w = network.parent_weights[python][0];
        assert!((w - 0.8).abs() < 0.01, "weight {} should reflect 20/25", w);
    }

    #[test]
    fn test_query_conditional_small_uses_ve() {
        let (graph, meta, _dir) = stores();
        let network = BayesianNetwork::from_graph(&graph, &meta, &BayesianConfig::default());
        let mut evidence = HashMap::new();
        evidence.insert("machine_learning".to_string(), true);
        let result = network.query_conditional(
            &["python".to_string()],
            &evidence,
            std::time::Duration::from_secs(1),
            0,
        );
        assert_eq!(result.method, InferenceMethod::VariableElimination);
        assert!(!result.partial);
        let p = result.distribution["python"];
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_unknown_query_vars_empty_distribution() {
        let (graph, meta, _dir) = stores();
        let network = BayesianNetwork::from_graph(&graph, &meta, &BayesianConfig::default());
        let result = network.query_conditional(
            &["nonexistent".to_string()],
            &HashMap::new(),
            std::time::Duration::from_secs(1),
            0,
        );
        assert!(result.distribution.is_empty());
    }
}
