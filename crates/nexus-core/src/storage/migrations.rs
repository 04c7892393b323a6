//! Database Migrations
//!
//! Schema migration definitions for the SQLite-backed stores (chunk
//! metadata, KV store, event log, query traces, Bayesian observations,
//! undo log). Applied automatically at startup; idempotent; failure
//! aborts startup.

use rusqlite::Connection;

use crate::error::{CoreError, Result};

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: chunks, kv_store, event_log, query_traces",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Bayesian observation counts",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Two-phase deletion undo log",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: chunks, KV store, event log, query traces
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,

    -- Lifecycle
    stage TEXT NOT NULL DEFAULT 'active',
    retention TEXT NOT NULL DEFAULT 'mid',
    category TEXT NOT NULL DEFAULT 'semantic',
    decay_score REAL,

    -- Tagging envelope (attached at write time, never mutated)
    tags TEXT NOT NULL DEFAULT '[]',
    envelope TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_path);
CREATE INDEX IF NOT EXISTS idx_chunks_stage ON chunks(stage);
CREATE INDEX IF NOT EXISTS idx_chunks_last_accessed ON chunks(last_accessed);

CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ms INTEGER NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    session_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_ts ON event_log(timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_events_kind ON event_log(kind);

CREATE TABLE IF NOT EXISTS query_traces (
    trace_id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    query TEXT NOT NULL,
    user_context TEXT,
    mode TEXT NOT NULL,
    mode_confidence REAL NOT NULL DEFAULT 0,
    mode_detection_ms REAL NOT NULL DEFAULT 0,
    stores_queried TEXT NOT NULL DEFAULT '[]',
    routing_rationale TEXT NOT NULL DEFAULT '',
    retrieved TEXT NOT NULL DEFAULT '[]',
    retrieval_ms REAL NOT NULL DEFAULT 0,
    verification TEXT,
    output TEXT NOT NULL DEFAULT '',
    total_ms REAL NOT NULL DEFAULT 0,
    error TEXT,
    error_kind TEXT,
    partial INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_traces_ts ON query_traces(timestamp);
CREATE INDEX IF NOT EXISTS idx_traces_error_kind ON query_traces(error_kind);
"#;

/// V2: co-occurrence observations backing CPD estimation
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS bayes_observations (
    entity_a TEXT NOT NULL,
    entity_b TEXT NOT NULL,
    cooccur_count INTEGER NOT NULL DEFAULT 0,
    total_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (entity_a, entity_b)
);
"#;

/// V3: two-phase deletion with a 7-day undo window
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS undo_log (
    id TEXT PRIMARY KEY,
    chunk_id TEXT NOT NULL,
    summary TEXT,
    source_path TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    purge_after TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_undo_purge_after ON undo_log(purge_after);
"#;

/// Apply all pending migrations. Idempotent: already-applied versions are
/// skipped via the schema_migrations bookkeeping table.
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        conn.execute_batch(migration.up).map_err(|e| {
            CoreError::Integrity(format!(
                "migration v{} failed: {}",
                migration.version, e
            ))
        })?;
        conn.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
    }

    Ok(())
}
