//! Inference over the derived Bayesian network.
//!
//! Exact variable elimination for small queries (at most 8 query
//! variables); Gibbs sampling for larger ones, with a soft deadline.
//! All variables are binary (absent/present). Gibbs uses a seedable RNG
//! so replay runs are reproducible.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::BayesianNetwork;

/// Query-variable count at or below which exact elimination runs
pub const VARIABLE_ELIMINATION_LIMIT: usize = 8;

/// Gibbs sampling parameters
const GIBBS_BURN_IN: usize = 100;
const GIBBS_MAX_SAMPLES: usize = 5_000;

/// How a distribution was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceMethod {
    VariableElimination,
    GibbsSampling,
}

/// Result of a conditional query
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// P(variable = present | evidence) per query variable
    pub distribution: HashMap<String, f64>,
    pub method: InferenceMethod,
    /// True when the soft deadline cut sampling short
    pub partial: bool,
}

// ============================================================================
// FACTORS
// ============================================================================

/// A factor over a set of binary variables. The table is indexed by the
/// assignment bits of `vars` in order (vars[0] is the lowest bit).
#[derive(Debug, Clone)]
struct Factor {
    vars: Vec<usize>,
    table: Vec<f64>,
}

impl Factor {
    fn value(&self, assignment: &[u8]) -> f64 {
        let mut index = 0usize;
        for (bit, &var) in self.vars.iter().enumerate() {
            if assignment[var] == 1 {
                index |= 1 << bit;
            }
        }
        self.table[index]
    }

    /// Multiply two factors into one over the union of their variables.
    fn product(&self, other: &Factor, n_vars: usize) -> Factor {
        let mut vars = self.vars.clone();
        for &v in &other.vars {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
        vars.sort_unstable();

        let mut table = vec![0.0; 1 << vars.len()];
        let mut assignment = vec![0u8; n_vars];
        for (index, slot) in table.iter_mut().enumerate() {
            for (bit, &var) in vars.iter().enumerate() {
                assignment[var] = ((index >> bit) & 1) as u8;
            }
            *slot = self.value(&assignment) * other.value(&assignment);
        }
        Factor { vars, table }
    }

    /// Sum a variable out of the factor.
    fn marginalize(&self, var: usize, n_vars: usize) -> Factor {
        let vars: Vec<usize> = self.vars.iter().copied().filter(|&v| v != var).collect();
        let mut table = vec![0.0; 1 << vars.len()];
        let mut assignment = vec![0u8; n_vars];
        for (index, slot) in table.iter_mut().enumerate() {
            for (bit, &v) in vars.iter().enumerate() {
                assignment[v] = ((index >> bit) & 1) as u8;
            }
            let mut total = 0.0;
            for value in 0..2u8 {
                assignment[var] = value;
                total += self.value(&assignment);
            }
            *slot = total;
        }
        Factor { vars, table }
    }

    /// Pin a variable to an observed value.
    fn reduce(&self, var: usize, value: u8, n_vars: usize) -> Factor {
        if !self.vars.contains(&var) {
            return self.clone();
        }
        let vars: Vec<usize> = self.vars.iter().copied().filter(|&v| v != var).collect();
        let mut table = vec![0.0; 1 << vars.len()];
        let mut assignment = vec![0u8; n_vars];
        assignment[var] = value;
        for (index, slot) in table.iter_mut().enumerate() {
            for (bit, &v) in vars.iter().enumerate() {
                assignment[v] = ((index >> bit) & 1) as u8;
            }
            *slot = self.value(&assignment);
        }
        Factor { vars, table }
    }
}

fn cpd_factor(network: &BayesianNetwork, var: usize) -> Factor {
    let mut vars = network.parents[var].clone();
    vars.push(var);
    vars.sort_unstable();

    let n = network.variables.len();
    let mut table = vec![0.0; 1 << vars.len()];
    let mut assignment = vec![0u8; n];
    for (index, slot) in table.iter_mut().enumerate() {
        for (bit, &v) in vars.iter().enumerate() {
            assignment[v] = ((index >> bit) & 1) as u8;
        }
        let p_present = network.probability_present(var, &assignment);
        *slot = if assignment[var] == 1 {
            p_present
        } else {
            1.0 - p_present
        };
    }
    Factor { vars, table }
}

// ============================================================================
// VARIABLE ELIMINATION
// ============================================================================

/// Exact P(query var = present | evidence) by variable elimination.
pub fn variable_elimination(
    network: &BayesianNetwork,
    query_vars: &[usize],
    evidence: &HashMap<usize, u8>,
) -> HashMap<String, f64> {
    let n = network.variables.len();
    let mut factors: Vec<Factor> = (0..n).map(|v| cpd_factor(network, v)).collect();

    // Instantiate evidence
    for (&var, &value) in evidence {
        factors = factors
            .into_iter()
            .map(|f| f.reduce(var, value, n))
            .collect();
    }

    // Eliminate hidden variables in deterministic (ascending) order
    let keep: Vec<bool> = (0..n)
        .map(|v| query_vars.contains(&v) || evidence.contains_key(&v))
        .collect();
    for var in 0..n {
        if keep[var] {
            continue;
        }
        let (touching, rest): (Vec<Factor>, Vec<Factor>) =
            factors.into_iter().partition(|f| f.vars.contains(&var));
        factors = rest;
        if touching.is_empty() {
            continue;
        }
        let mut combined = touching[0].clone();
        for f in &touching[1..] {
            combined = combined.product(f, n);
        }
        factors.push(combined.marginalize(var, n));
    }

    // Multiply what is left into the joint over the query variables
    let mut joint = Factor {
        vars: Vec::new(),
        table: vec![1.0],
    };
    for f in &factors {
        joint = joint.product(f, n);
    }

    // Per-variable marginals from the query joint
    let mut distribution = HashMap::new();
    for &q in query_vars {
        let mut marginal = joint.clone();
        let others: Vec<usize> = marginal.vars.iter().copied().filter(|&v| v != q).collect();
        for v in others {
            marginal = marginal.marginalize(v, n);
        }
        let (p_absent, p_present) = if marginal.vars.contains(&q) {
            (marginal.table[0], marginal.table[1])
        } else {
            (0.5, 0.5)
        };
        let total = p_absent + p_present;
        let p = if total > 0.0 { p_present / total } else { 0.5 };
        distribution.insert(network.variables[q].clone(), p);
    }
    distribution
}

// ============================================================================
// GIBBS SAMPLING
// ============================================================================

/// Gibbs sampling with a soft deadline. Returns the estimated marginals and
/// whether the deadline cut the run short of the sample budget.
pub fn gibbs_sampling(
    network: &BayesianNetwork,
    query_vars: &[usize],
    evidence: &HashMap<usize, u8>,
    deadline: Duration,
    seed: u64,
) -> (HashMap<String, f64>, bool) {
    let n = network.variables.len();
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(seed);

    // Initial state: evidence pinned, everything else random
    let mut state: Vec<u8> = (0..n).map(|_| rng.gen_range(0..2u8)).collect();
    for (&var, &value) in evidence {
        state[var] = value;
    }

    let free: Vec<usize> = (0..n).filter(|v| !evidence.contains_key(v)).collect();
    let mut present_counts = vec![0u64; n];
    let mut samples = 0u64;
    let mut cut_short = false;

    for round in 0..(GIBBS_BURN_IN + GIBBS_MAX_SAMPLES) {
        if started.elapsed() >= deadline {
            cut_short = round < GIBBS_BURN_IN + GIBBS_MAX_SAMPLES;
            break;
        }
        for &var in &free {
            let p = network.conditional_given_blanket(var, &state);
            state[var] = if rng.gen_bool(p.clamp(1e-9, 1.0 - 1e-9)) { 1 } else { 0 };
        }
        if round >= GIBBS_BURN_IN {
            samples += 1;
            for (v, count) in present_counts.iter_mut().enumerate() {
                *count += state[v] as u64;
            }
        }
    }

    let mut distribution = HashMap::new();
    for &q in query_vars {
        let p = if samples > 0 {
            present_counts[q] as f64 / samples as f64
        } else {
            // Deadline expired before any sample landed: uniform partial
            0.5
        };
        distribution.insert(network.variables[q].clone(), p);
    }
    (distribution, cut_short || samples == 0)
}
