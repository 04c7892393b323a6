//! Shared fixtures for server and tool tests.

use std::sync::Arc;

use nexus_core::{Clock, EmbeddingService, MemoryService, NexusConfig, TraceWriteMode};
use tempfile::TempDir;

/// Service on a temp data dir with the deterministic embedder and an
/// inline trace sink, so tests are hermetic and race-free.
pub fn test_service() -> (Arc<MemoryService>, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = NexusConfig::default();
    config.storage.home = Some(dir.path().to_path_buf());
    let service = MemoryService::open_with(
        config,
        TraceWriteMode::Inline,
        Arc::new(EmbeddingService::deterministic()),
        Arc::new(Clock::system()),
    )
    .unwrap();
    (Arc::new(service), dir)
}
