//! SQLite store implementation.
//!
//! One database file backs four logical stores: chunk metadata (including
//! embedding blobs), the KV store, the append-only event log, and the
//! query-trace store. Separate reader/writer connections give interior
//! mutability: all methods take `&self`, so the store is `Send + Sync`
//! behind an `Arc` without an outer mutex.
//!
//! The KV store and event log are single-writer; writes serialize on the
//! writer connection. The trace store tolerates concurrent writers via
//! SQLite row locking with the shared busy timeout.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{retry_transient, CoreError, Result};
use crate::memory::{
    Chunk, Event, EventKind, LifecycleStage, MemoryCategory, QueryTrace, RetentionTier,
    TaggingEnvelope, TraceErrorKind,
};
use crate::modes::Mode;

/// Compact lifecycle view of a chunk, used by the lifecycle tick.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub id: String,
    pub source_path: String,
    pub stage: LifecycleStage,
    pub category: MemoryCategory,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub tags: Vec<String>,
}

/// Pending two-phase deletion entry
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub id: String,
    pub chunk_id: String,
    pub summary: Option<String>,
    pub source_path: String,
    pub requested_at: DateTime<Utc>,
    pub purge_after: DateTime<Utc>,
}

/// SQLite-backed metadata store
pub struct MetaStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    /// Last issued event timestamp; enforces a strictly monotonic log
    last_event_ts: AtomicI64,
    /// Process session id stamped onto events
    session_id: String,
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Integrity(format!("invalid timestamp {}: {}", s, e)))
}

impl MetaStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at `path` and apply migrations.
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            last_event_ts: AtomicI64::new(0),
            session_id: Uuid::new_v4().to_string(),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| CoreError::Internal("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| CoreError::Internal("reader lock poisoned".to_string()))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ========================================================================
    // CHUNKS
    // ========================================================================

    /// Insert or replace a chunk row. Writes to a single chunk id serialize
    /// on the writer connection; transient lock contention is retried.
    pub fn upsert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let tags_json = serde_json::to_string(&chunk.tags)
            .map_err(|e| CoreError::Internal(format!("serialize tags: {}", e)))?;
        let envelope_json = serde_json::to_string(&chunk.envelope)
            .map_err(|e| CoreError::Internal(format!("serialize envelope: {}", e)))?;

        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO chunks (
                    id, source_path, ordinal, text, embedding, dimensions,
                    created_at, last_accessed, access_count,
                    stage, retention, category, decay_score, tags, envelope
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    chunk.id,
                    chunk.source_path,
                    chunk.ordinal as i64,
                    chunk.text,
                    embedding_to_bytes(&chunk.embedding),
                    chunk.embedding.len() as i64,
                    chunk.created_at.to_rfc3339(),
                    chunk.last_accessed.to_rfc3339(),
                    chunk.access_count as i64,
                    chunk.stage.as_str(),
                    chunk.retention.as_str(),
                    chunk.category.as_str(),
                    chunk.decay_score,
                    tags_json,
                    envelope_json,
                ],
            )?;
            Ok(())
        })
    }

    fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let stage_str: String = row.get("stage")?;
        let retention_str: String = row.get("retention")?;
        let category_str: String = row.get("category")?;
        let tags_json: String = row.get("tags")?;
        let envelope_json: String = row.get("envelope")?;
        let created_at: String = row.get("created_at")?;
        let last_accessed: String = row.get("last_accessed")?;
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding")?;

        let envelope: TaggingEnvelope = serde_json::from_str(&envelope_json)
            .unwrap_or_else(|_| TaggingEnvelope::new(
                "default".to_string(),
                crate::memory::IntentCategory::Analysis,
                Utc::now(),
            ));

        Ok(Chunk {
            id: row.get("id")?,
            source_path: row.get("source_path")?,
            ordinal: row.get::<_, i64>("ordinal")? as usize,
            text: row.get("text")?,
            embedding: embedding_bytes.map(|b| embedding_from_bytes(&b)).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            last_accessed: DateTime::parse_from_rfc3339(&last_accessed)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            access_count: row.get::<_, i64>("access_count")? as u64,
            stage: LifecycleStage::parse(&stage_str).unwrap_or(LifecycleStage::Active),
            retention: RetentionTier::parse(&retention_str).unwrap_or(RetentionTier::Mid),
            category: MemoryCategory::parse(&category_str).unwrap_or(MemoryCategory::Semantic),
            decay_score: row.get("decay_score")?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            envelope,
        })
    }

    pub fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let reader = self.reader()?;
        let chunk = reader
            .query_row("SELECT * FROM chunks WHERE id = ?1", params![id], Self::chunk_from_row)
            .optional()?;
        Ok(chunk)
    }

    pub fn chunk_ids_by_path(&self, source_path: &str) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT id FROM chunks WHERE source_path = ?1")?;
        let ids = stmt
            .query_map(params![source_path], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn delete_chunk(&self, id: &str) -> Result<bool> {
        retry_transient(3, || {
            let writer = self.writer()?;
            let n = writer.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
    }

    pub fn delete_chunks_by_path(&self, source_path: &str) -> Result<Vec<String>> {
        let ids = self.chunk_ids_by_path(source_path)?;
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute("DELETE FROM chunks WHERE source_path = ?1", params![source_path])?;
            Ok(())
        })?;
        Ok(ids)
    }

    /// Record a retrieval hit: bump access count, refresh last-access.
    pub fn touch_chunk(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE chunks SET last_accessed = ?2, access_count = access_count + 1
                 WHERE id = ?1",
                params![id, now.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Replace a chunk's text (archival swaps the text for its summary key).
    pub fn replace_text(&self, id: &str, new_text: &str) -> Result<()> {
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE chunks SET text = ?2 WHERE id = ?1",
                params![id, new_text],
            )?;
            Ok(())
        })
    }

    pub fn set_stage(&self, id: &str, stage: LifecycleStage) -> Result<()> {
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE chunks SET stage = ?2 WHERE id = ?1",
                params![id, stage.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn set_decay_score(&self, id: &str, score: f64) -> Result<()> {
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE chunks SET decay_score = ?2 WHERE id = ?1",
                params![id, score],
            )?;
            Ok(())
        })
    }

    /// Lifecycle view over every chunk not yet purged.
    pub fn lifecycle_snapshot(&self) -> Result<Vec<ChunkMeta>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, source_path, stage, category, last_accessed, access_count, tags
             FROM chunks",
        )?;
        let metas = stmt
            .query_map([], |row| {
                let stage_str: String = row.get(2)?;
                let category_str: String = row.get(3)?;
                let last_accessed: String = row.get(4)?;
                let tags_json: String = row.get(6)?;
                Ok(ChunkMeta {
                    id: row.get(0)?,
                    source_path: row.get(1)?,
                    stage: LifecycleStage::parse(&stage_str).unwrap_or(LifecycleStage::Active),
                    category: MemoryCategory::parse(&category_str)
                        .unwrap_or(MemoryCategory::Semantic),
                    last_accessed: DateTime::parse_from_rfc3339(&last_accessed)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    access_count: row.get::<_, i64>(5)? as u64,
                    tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(metas)
    }

    /// Embeddings of every chunk still living in the vector index
    /// (active and demoted stages), for index rebuild at startup.
    pub fn indexed_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, embedding FROM chunks
             WHERE stage IN ('active', 'demoted') AND embedding IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok((row.get::<_, String>(0)?, embedding_from_bytes(&bytes)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let reader = self.reader()?;
        let n: i64 = reader.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    // ========================================================================
    // KV STORE (single-writer)
    // ========================================================================

    pub fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let reader = self.reader()?;
        let value = reader
            .query_row("SELECT value FROM kv_store WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn kv_delete(&self, key: &str) -> Result<bool> {
        retry_transient(3, || {
            let writer = self.writer()?;
            let n = writer.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            Ok(n > 0)
        })
    }

    /// Keys sharing a prefix, e.g. `archived:` for the rehydration scan.
    pub fn kv_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = reader
            .prepare("SELECT key FROM kv_store WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
        let keys = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    // ========================================================================
    // EVENT LOG (append-only, single-writer, monotonic timestamps)
    // ========================================================================

    fn next_event_ts(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_event_ts.load(Ordering::Acquire);
        loop {
            let next = now.max(prev + 1);
            match self.last_event_ts.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn append_event(&self, kind: EventKind, payload: serde_json::Value) -> Result<Event> {
        let ts = self.next_event_ts();
        let payload_str = payload.to_string();
        let id = retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "INSERT INTO event_log (timestamp_ms, kind, payload, session_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ts, kind.as_str(), payload_str, self.session_id],
            )?;
            Ok(writer.last_insert_rowid())
        })?;
        Ok(Event {
            id,
            timestamp_ms: ts,
            kind,
            payload,
            session_id: self.session_id.clone(),
        })
    }

    pub fn events_of_kind(&self, kind: EventKind, limit: usize) -> Result<Vec<Event>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, timestamp_ms, kind, payload, session_id FROM event_log
             WHERE kind = ?1 ORDER BY timestamp_ms DESC LIMIT ?2",
        )?;
        let events = stmt
            .query_map(params![kind.as_str(), limit as i64], Self::event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, timestamp_ms, kind, payload, session_id FROM event_log
             ORDER BY timestamp_ms DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit as i64], Self::event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
        let kind_str: String = row.get(2)?;
        let payload_str: String = row.get(3)?;
        Ok(Event {
            id: row.get(0)?,
            timestamp_ms: row.get(1)?,
            kind: EventKind::parse(&kind_str).unwrap_or(EventKind::Ingest),
            payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
            session_id: row.get(4)?,
        })
    }

    // ========================================================================
    // QUERY TRACES
    // ========================================================================

    pub fn insert_trace(&self, trace: &QueryTrace) -> Result<()> {
        let stores_json = serde_json::to_string(&trace.stores_queried)
            .map_err(|e| CoreError::Internal(format!("serialize stores: {}", e)))?;
        let retrieved_json = serde_json::to_string(&trace.retrieved)
            .map_err(|e| CoreError::Internal(format!("serialize retrieved: {}", e)))?;
        let verification_json = trace
            .verification
            .as_ref()
            .map(|v| v.to_string());

        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO query_traces (
                    trace_id, timestamp, query, user_context,
                    mode, mode_confidence, mode_detection_ms,
                    stores_queried, routing_rationale, retrieved, retrieval_ms,
                    verification, output, total_ms, error, error_kind, partial
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    trace.trace_id,
                    trace.timestamp.to_rfc3339(),
                    trace.query,
                    trace.user_context,
                    trace.mode.as_str(),
                    trace.mode_confidence,
                    trace.mode_detection_ms,
                    stores_json,
                    trace.routing_rationale,
                    retrieved_json,
                    trace.retrieval_ms,
                    verification_json,
                    trace.output,
                    trace.total_ms,
                    trace.error,
                    trace.error_kind.map(|k| k.as_str()),
                    trace.partial as i64,
                ],
            )?;
            Ok(())
        })
    }

    fn trace_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryTrace> {
        let timestamp: String = row.get("timestamp")?;
        let mode_str: String = row.get("mode")?;
        let stores_json: String = row.get("stores_queried")?;
        let retrieved_json: String = row.get("retrieved")?;
        let verification_str: Option<String> = row.get("verification")?;
        let error_kind_str: Option<String> = row.get("error_kind")?;
        Ok(QueryTrace {
            trace_id: row.get("trace_id")?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            query: row.get("query")?,
            user_context: row.get("user_context")?,
            mode: Mode::parse(&mode_str).unwrap_or(Mode::Execution),
            mode_confidence: row.get("mode_confidence")?,
            mode_detection_ms: row.get("mode_detection_ms")?,
            stores_queried: serde_json::from_str(&stores_json).unwrap_or_default(),
            routing_rationale: row.get("routing_rationale")?,
            retrieved: serde_json::from_str(&retrieved_json).unwrap_or_default(),
            retrieval_ms: row.get("retrieval_ms")?,
            verification: verification_str.and_then(|s| serde_json::from_str(&s).ok()),
            output: row.get("output")?,
            total_ms: row.get("total_ms")?,
            error: row.get("error")?,
            error_kind: error_kind_str.as_deref().and_then(TraceErrorKind::parse),
            partial: row.get::<_, i64>("partial")? != 0,
        })
    }

    pub fn get_trace(&self, trace_id: &str) -> Result<Option<QueryTrace>> {
        let reader = self.reader()?;
        let trace = reader
            .query_row(
                "SELECT * FROM query_traces WHERE trace_id = ?1",
                params![trace_id],
                Self::trace_from_row,
            )
            .optional()?;
        Ok(trace)
    }

    pub fn traces_since(&self, since: DateTime<Utc>) -> Result<Vec<QueryTrace>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM query_traces WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;
        let traces = stmt
            .query_map(params![since.to_rfc3339()], Self::trace_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(traces)
    }

    /// Trace retention: drop traces older than the cutoff (30 days).
    pub fn prune_traces_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        retry_transient(3, || {
            let writer = self.writer()?;
            let n = writer.execute(
                "DELETE FROM query_traces WHERE timestamp < ?1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(n)
        })
    }

    // ========================================================================
    // BAYESIAN OBSERVATIONS
    // ========================================================================

    /// Record one co-occurrence observation between two entities.
    /// `cooccurred` distinguishes joint presence from solo presence.
    pub fn record_observation(&self, entity_a: &str, entity_b: &str, cooccurred: bool) -> Result<()> {
        // Canonical ordering keeps one row per unordered pair
        let (a, b) = if entity_a <= entity_b {
            (entity_a, entity_b)
        } else {
            (entity_b, entity_a)
        };
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "INSERT INTO bayes_observations (entity_a, entity_b, cooccur_count, total_count)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(entity_a, entity_b) DO UPDATE SET
                    cooccur_count = cooccur_count + ?3,
                    total_count = total_count + 1",
                params![a, b, cooccurred as i64],
            )?;
            Ok(())
        })
    }

    /// (cooccur_count, total_count) for an unordered entity pair.
    pub fn observation_counts(&self, entity_a: &str, entity_b: &str) -> Result<(u64, u64)> {
        let (a, b) = if entity_a <= entity_b {
            (entity_a, entity_b)
        } else {
            (entity_b, entity_a)
        };
        let reader = self.reader()?;
        let counts = reader
            .query_row(
                "SELECT cooccur_count, total_count FROM bayes_observations
                 WHERE entity_a = ?1 AND entity_b = ?2",
                params![a, b],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?;
        Ok(counts.unwrap_or((0, 0)))
    }

    // ========================================================================
    // UNDO LOG (two-phase deletion)
    // ========================================================================

    pub fn insert_undo(&self, entry: &UndoEntry) -> Result<()> {
        retry_transient(3, || {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO undo_log
                 (id, chunk_id, summary, source_path, requested_at, purge_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id,
                    entry.chunk_id,
                    entry.summary,
                    entry.source_path,
                    entry.requested_at.to_rfc3339(),
                    entry.purge_after.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Entries whose undo window has elapsed.
    pub fn undo_entries_due(&self, now: DateTime<Utc>) -> Result<Vec<UndoEntry>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, chunk_id, summary, source_path, requested_at, purge_after
             FROM undo_log WHERE purge_after <= ?1",
        )?;
        let entries = stmt
            .query_map(params![now.to_rfc3339()], |row| {
                let requested_at: String = row.get(4)?;
                let purge_after: String = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    requested_at,
                    purge_after,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        entries
            .into_iter()
            .map(|(id, chunk_id, summary, source_path, req, purge)| {
                Ok(UndoEntry {
                    id,
                    chunk_id,
                    summary,
                    source_path,
                    requested_at: parse_timestamp(&req)?,
                    purge_after: parse_timestamp(&purge)?,
                })
            })
            .collect()
    }

    pub fn delete_undo(&self, id: &str) -> Result<bool> {
        retry_transient(3, || {
            let writer = self.writer()?;
            let n = writer.execute("DELETE FROM undo_log WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
    }

    pub fn undo_entry_for_chunk(&self, chunk_id: &str) -> Result<Option<UndoEntry>> {
        let reader = self.reader()?;
        let row = reader
            .query_row(
                "SELECT id, chunk_id, summary, source_path, requested_at, purge_after
                 FROM undo_log WHERE chunk_id = ?1",
                params![chunk_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, chunk_id, summary, source_path, req, purge)| {
            Ok(UndoEntry {
                id,
                chunk_id,
                summary,
                source_path,
                requested_at: parse_timestamp(&req)?,
                purge_after: parse_timestamp(&purge)?,
            })
        })
        .transpose()
    }
}

// ============================================================================
// TESTS
// ============================================================================
