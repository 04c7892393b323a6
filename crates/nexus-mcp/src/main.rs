//! Nexus memory server.
//!
//! Hybrid-retrieval memory service for LLM agents over a JSON-RPC stdio
//! protocol:
//!
//! - Nexus pipeline: recall -> filter -> dedupe -> rank -> compress
//! - Three retrieval tiers: dense vector, graph (HippoRAG PPR), Bayesian
//! - Four-stage memory lifecycle with query-driven rehydration
//! - Always-on query tracing with replay and error attribution
//! - Vault watcher feeding the background ingestion worker

mod protocol;
mod server;
mod tools;

#[cfg(test)]
mod test_support;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nexus_core::{MemoryService, NexusConfig, TraceWriteMode, VaultWatcher};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;

/// Hybrid-retrieval memory server (vector + HippoRAG graph + Bayesian)
#[derive(Debug, Parser)]
#[command(name = "nexus-mcp", version, about)]
struct Args {
    /// Configuration file (TOML). Defaults plus env overrides when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory override (equivalent to MEMORY_MCP_HOME)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Vault directory to watch for markdown changes
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Lifecycle tick interval in seconds
    #[arg(long, default_value_t = 3600)]
    tick_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging to stderr; stdout is the protocol channel
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("nexus-mcp v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => NexusConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => NexusConfig::from_env(),
    };
    if let Some(data_dir) = args.data_dir {
        config.storage.home = Some(data_dir);
    }
    if let Some(vault) = args.vault {
        config.storage.vault_path = Some(vault);
    }

    // Migration or integrity failures abort startup here, loudly
    let service = Arc::new(
        MemoryService::open(config, TraceWriteMode::Async).context("initializing memory service")?,
    );
    info!("memory service initialized");
    for (tier, health) in service.tier_health() {
        info!(tier, ?health, "tier status");
    }

    // Periodic lifecycle maintenance
    service.start_lifecycle_task(Duration::from_secs(args.tick_interval_secs));

    // Vault watcher -> bounded queue -> ingestion worker
    let _watcher = match service.config().storage.vault_path.clone() {
        Some(vault_path) => {
            let (events, _worker) = service.start_ingest_worker();
            match VaultWatcher::start(&vault_path, events) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "vault watcher failed to start, continuing without it");
                    None
                }
            }
        }
        None => None,
    };

    let server = McpServer::new(Arc::clone(&service));
    let transport = StdioTransport::new();

    info!("serving on stdio");
    if let Err(e) = transport.run(server).await {
        anyhow::bail!("transport error: {}", e);
    }

    // Flush pending traces and compact the graph snapshot on the way out
    service.flush_traces().await;
    if let Err(e) = service.checkpoint() {
        warn!(error = %e, "final graph checkpoint failed");
    }

    info!("nexus-mcp shutting down");
    Ok(())
}
