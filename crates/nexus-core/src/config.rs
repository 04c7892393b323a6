//! Hierarchical configuration document.
//!
//! A single TOML file configures the whole engine. Every section has
//! serde defaults so a partial (or absent) file is valid. Environment
//! variables override the file: `MEMORY_MCP_HOME` relocates the data
//! directory, `MEMORY_MCP_PROJECT` sets the project identifier stamped
//! into tagging envelopes. All paths expand a leading `~`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub storage: StorageConfig,
    pub embeddings: EmbeddingsConfig,
    pub chunking: ChunkingConfig,
    pub nexus: PipelineConfig,
    pub modes: ModesConfig,
    pub decay: DecayConfig,
    pub bayesian: BayesianConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Source directory the vault adapter watches
    pub vault_path: Option<PathBuf>,
    /// Engine data directory (databases, vector index, graph files).
    /// `MEMORY_MCP_HOME` overrides; defaults to the platform data dir.
    pub home: Option<PathBuf>,
    pub vector: VectorStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vault_path: None,
            home: None,
            vector: VectorStorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStorageConfig {
    pub collection_name: String,
    /// Embedding dimension; must match the configured model
    pub dimension: usize,
}

impl Default for VectorStorageConfig {
    fn default() -> Self {
        Self {
            collection_name: "nexus_memory".to_string(),
            dimension: crate::embeddings::EMBEDDING_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Identifier of the embedding model
    pub model: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper chunk bound in tokens
    pub max_chunk_size: usize,
    /// Lower chunk bound in tokens
    pub min_chunk_size: usize,
    /// Token overlap between consecutive chunks
    pub overlap: usize,
    /// Adjacent-sentence cosine similarity below which a new chunk starts
    pub boundary_threshold: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 512,
            min_chunk_size: 128,
            overlap: 50,
            boundary_threshold: 0.7,
        }
    }
}

/// Fusion weights for the three retrieval tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub vector: f32,
    pub graph: f32,
    pub bayesian: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.4,
            graph: 0.4,
            bayesian: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub weights: FusionWeights,
    /// Per-tier confidence floor applied after normalization
    pub confidence_threshold: f32,
    /// Cosine similarity at or above which two chunks are duplicates
    pub dedup_threshold: f32,
    /// Common top-N recall budget per tier
    pub recall_top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            confidence_threshold: 0.3,
            dedup_threshold: 0.95,
            recall_top_n: 50,
        }
    }
}

/// Per-mode retrieval profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeProfile {
    pub core_k: usize,
    pub extended_k: usize,
    /// Fused-score floor applied before selection
    pub threshold: f32,
    /// Whitespace-token budget for the compressed result set
    pub token_budget: usize,
    /// Request deadline
    pub deadline_ms: u64,
}

impl Default for ModeProfile {
    fn default() -> Self {
        // Execution profile; planning/brainstorming override in ModesConfig
        Self {
            core_k: 5,
            extended_k: 0,
            threshold: 0.85,
            token_budget: 5_000,
            deadline_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModesConfig {
    pub execution: ModeProfile,
    pub planning: ModeProfile,
    pub brainstorming: ModeProfile,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            execution: ModeProfile::default(),
            planning: ModeProfile {
                core_k: 5,
                extended_k: 15,
                threshold: 0.65,
                token_budget: 10_000,
                deadline_ms: 1_000,
            },
            brainstorming: ModeProfile {
                core_k: 5,
                extended_k: 25,
                threshold: 0.50,
                token_budget: 20_000,
                deadline_ms: 2_000,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Half-life for the hot/cold recency component
    pub half_life_days: f64,
    /// Active window; idle beyond this demotes
    pub short_term_hours: u64,
    /// Demoted window; idle beyond this archives
    pub mid_term_days: u64,
    /// Archived window; idle beyond this drops to rehydratable
    pub long_term_days: u64,
    /// Undo window for two-phase purge
    pub undo_window_days: u64,
    /// Cosine threshold above which an archived summary rehydrates
    pub rehydrate_threshold: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            short_term_hours: 7 * 24,
            mid_term_days: 30,
            long_term_days: 90,
            undo_window_days: 7,
            rehydrate_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesianConfig {
    /// Node cap for the derived network
    pub max_nodes: usize,
    /// Edges below this co-occurrence confidence are pruned
    pub min_edge_confidence: f32,
    /// Observations required before CPDs leave uniform priors
    pub min_sample_size: u64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            max_nodes: 1_000,
            min_edge_confidence: 0.3,
            min_sample_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Per-tier query timeout
    pub tier_timeout_ms: u64,
    /// Bayesian inference soft deadline
    pub inference_timeout_ms: u64,
    /// Graph node cap
    pub max_graph_nodes: usize,
    /// Bounded ingestion queue depth
    pub ingest_queue_depth: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            tier_timeout_ms: 2_000,
            inference_timeout_ms: 1_000,
            max_graph_nodes: 100_000,
            ingest_queue_depth: 256,
        }
    }
}

impl NexusConfig {
    /// Load configuration from a TOML file, apply env overrides, validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Storage(format!("read config {}: {}", path.display(), e)))?;
        let mut config: NexusConfig = toml::from_str(&text)
            .map_err(|e| CoreError::Integrity(format!("parse config: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides (no file on disk).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(home) = std::env::var("MEMORY_MCP_HOME") {
            if !home.is_empty() {
                self.storage.home = Some(expand_tilde(Path::new(&home)));
            }
        }
        if let Some(home) = self.storage.home.take() {
            self.storage.home = Some(expand_tilde(&home));
        }
        if let Some(vault) = self.storage.vault_path.take() {
            self.storage.vault_path = Some(expand_tilde(&vault));
        }
    }

    fn validate(&self) -> Result<()> {
        if self.storage.vector.dimension != crate::embeddings::EMBEDDING_DIMENSIONS {
            return Err(CoreError::Integrity(format!(
                "storage.vector.dimension {} does not match model dimension {}",
                self.storage.vector.dimension,
                crate::embeddings::EMBEDDING_DIMENSIONS
            )));
        }
        if self.chunking.min_chunk_size >= self.chunking.max_chunk_size {
            return Err(CoreError::Integrity(
                "chunking.min_chunk_size must be below max_chunk_size".to_string(),
            ));
        }
        if self.chunking.overlap >= self.chunking.min_chunk_size {
            return Err(CoreError::Integrity(
                "chunking.overlap must be below min_chunk_size".to_string(),
            ));
        }
        Ok(())
    }

    /// Project identifier stamped into tagging envelopes.
    /// `MEMORY_MCP_PROJECT` overrides; defaults to "default".
    pub fn project_id(&self) -> String {
        std::env::var("MEMORY_MCP_PROJECT")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Resolved data directory for all persisted state.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(home) = &self.storage.home {
            return Ok(home.clone());
        }
        let proj_dirs = directories::ProjectDirs::from("com", "nexus", "memory")
            .ok_or_else(|| CoreError::Storage("could not determine data directory".to_string()))?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }
}

/// Expand a leading `~` against the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().to_path_buf();
        }
    } else if let Some(rest) = s.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NexusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nexus.weights.vector, 0.4);
        assert_eq!(config.nexus.weights.bayesian, 0.2);
        assert_eq!(config.modes.execution.deadline_ms, 500);
        assert_eq!(config.modes.brainstorming.token_budget, 20_000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_text = r#"
            [nexus]
            confidence_threshold = 0.5

            [modes.planning]
            extended_k = 20
        "#;
        let config: NexusConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.nexus.confidence_threshold, 0.5);
        assert_eq!(config.nexus.dedup_threshold, 0.95);
        assert_eq!(config.modes.planning.extended_k, 20);
        assert_eq!(config.modes.execution.core_k, 5);
    }

    #[test]
    fn test_dimension_mismatch_is_integrity_error() {
        let mut config = NexusConfig::default();
        config.storage.vector.dimension = 768;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "integrity_error");
    }

    #[test]
    fn test_chunk_bounds_validated() {
        let mut config = NexusConfig::default();
        config.chunking.min_chunk_size = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        let p = PathBuf::from("/var/data/nexus");
        assert_eq!(expand_tilde(&p), p);
    }
}
