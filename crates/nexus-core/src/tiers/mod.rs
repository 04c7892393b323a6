//! Retrieval tiers.
//!
//! The three strategies share one capability set: a name, a scored
//! candidate query, and a health probe. The pipeline holds them as a
//! uniform trait-object list, fans queries out concurrently, and treats
//! any tier failure as a logged degradation rather than a request
//! failure. Tier scores are normalized to [0, 1] before they leave the
//! tier; the pipeline's filter step relies on that.

mod bayesian;
mod graph;
mod vector;

pub use bayesian::BayesianTier;
pub use graph::{GraphTier, DEFAULT_DAMPING, DEFAULT_MAX_HOPS};
pub use vector::{MetadataFilter, VectorTier};

use crate::error::Result;

/// Seed derivation for anything stochastic downstream (Gibbs sampling).
/// Hashing the query text keeps replay runs byte-identical.
pub fn query_seed(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in text.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Preprocessed query shared by all tiers: the pipeline embeds and
/// extracts entities once.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub text: String,
    pub embedding: Vec<f32>,
    /// Normalized entity ids extracted from the query
    pub entity_ids: Vec<String>,
    /// Deterministic seed for sampling-based tiers
    pub seed: u64,
}

/// One scored candidate from a tier
#[derive(Debug, Clone)]
pub struct TierCandidate {
    pub chunk_id: String,
    /// Normalized confidence in [0, 1]
    pub score: f32,
    /// Entities that contributed (graph tier); empty elsewhere
    pub entities: Vec<String>,
}

/// A tier's answer to one query
#[derive(Debug, Clone, Default)]
pub struct TierOutput {
    pub candidates: Vec<TierCandidate>,
    /// Set when the tier degraded mid-query (timeout, partial sampling)
    pub degraded: Option<String>,
}

impl TierOutput {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Health probe result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierHealth {
    Healthy,
    /// Functional but worth noting in the routing rationale
    Degraded(String),
    /// Cannot answer queries at all
    Unavailable(String),
}

/// The uniform tier interface
pub trait RetrievalTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Query for up to `top_k` candidates. A legitimate empty answer is
    /// `Ok` with no candidates; `Err` means the tier is unavailable for
    /// this request and the pipeline degrades.
    fn query(&self, ctx: &QueryContext, top_k: usize) -> Result<TierOutput>;

    fn health(&self) -> TierHealth;
}
