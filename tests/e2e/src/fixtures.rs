//! Shared fixtures: a hermetic service on a temp directory with a manual
//! clock, plus a small corpus linking python -> machine learning ->
//! neural networks for multi-hop scenarios.

use std::sync::Arc;

use chrono::Utc;
use nexus_core::{
    Clock, EmbeddingService, IngestOptions, MemoryService, NexusConfig, TraceWriteMode,
};
use tempfile::TempDir;

/// Service + manual clock + scratch vault directory.
pub struct TestHarness {
    pub service: Arc<MemoryService>,
    pub clock: Arc<Clock>,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut config = NexusConfig::default();
        config.storage.home = Some(dir.path().join("data"));
        // The hashed test embedder scores lower than the production model;
        // the execution floor comes down with it (floors are config, not
        // constants, for exactly this reason)
        config.modes.execution.threshold = 0.7;

        let clock = Arc::new(Clock::manual(Utc::now()));
        let service = MemoryService::open_with(
            config,
            TraceWriteMode::Inline,
            Arc::new(EmbeddingService::deterministic()),
            Arc::clone(&clock),
        )
        .expect("service init");

        Self {
            service: Arc::new(service),
            clock,
            dir,
        }
    }

    /// Write a markdown file into the scratch vault and return its path.
    pub fn write_vault_file(&self, name: &str, text: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, text).expect("write vault file");
        path.to_string_lossy().to_string()
    }

    /// Ingest a vault file (writes it first).
    pub fn ingest_file(&self, name: &str, text: &str) -> Vec<String> {
        let path = self.write_vault_file(name, text);
        self.service
            .ingest_document(&path, text, &IngestOptions::default())
            .expect("ingest")
            .chunk_ids
    }

    /// The three-document corpus: python -> machine_learning ->
    /// neural_networks, with the last entity never co-occurring with the
    /// first.
    pub fn ingest_linked_corpus(&self) -> Vec<Vec<String>> {
        vec![
            self.ingest_file(
                "python.md",
                "Python is the dominant language for Machine Learning work today.",
            ),
            self.ingest_file(
                "ml.md",
                "Machine Learning models increasingly rely on Neural Networks architectures.",
            ),
            self.ingest_file(
                "nn.md",
                "Neural Networks excel at image recognition and sequence modeling tasks.",
            ),
        ]
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
