//! Trace replay.
//!
//! Re-executes the pipeline for a recorded trace and diffs the outputs.
//! With an unchanged index and unchanged seeds the engine is fully
//! deterministic (hashed query seed, fixed PPR iteration order, pinned
//! mode), so replay must produce byte-identical output; any drift is
//! reported in the diff rather than papered over.

use crate::error::{CoreError, Result};
use crate::memory::QueryTrace;
use crate::pipeline::NexusPipeline;

use super::TraceSink;

/// Differences between an original trace and its replay
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplayDiff {
    /// Byte-identical output text
    pub identical_output: bool,
    pub mode_changed: bool,
    /// Chunk ids retrieved now but not originally
    pub added: Vec<String>,
    /// Chunk ids retrieved originally but not now
    pub removed: Vec<String>,
}

/// Result of one replay
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub original: QueryTrace,
    pub new_trace: QueryTrace,
    pub diff: ReplayDiff,
}

/// Replay a trace by id. The new run writes its own trace; the returned
/// diff compares outputs, mode, and retrieved chunk sets.
pub async fn replay(
    pipeline: &NexusPipeline,
    sink: &TraceSink,
    trace_id: &str,
) -> Result<ReplayReport> {
    let original = sink
        .store()
        .get_trace(trace_id)?
        .ok_or_else(|| CoreError::Routing(format!("trace {} not found", trace_id)))?;

    // Pin the original's mode so replay exercises retrieval, not detection
    let result = pipeline
        .process(&original.query, Some(original.mode), None)
        .await
        .map_err(|e| e.error)?;

    sink.flush().await;
    let new_trace = sink
        .store()
        .get_trace(&result.trace_id)?
        .ok_or_else(|| CoreError::Internal("replay trace missing after flush".to_string()))?;

    let original_ids: Vec<&String> = original.retrieved.iter().map(|r| &r.chunk_id).collect();
    let new_ids: Vec<&String> = new_trace.retrieved.iter().map(|r| &r.chunk_id).collect();

    let added = new_ids
        .iter()
        .filter(|id| !original_ids.contains(id))
        .map(|id| (*id).clone())
        .collect();
    let removed = original_ids
        .iter()
        .filter(|id| !new_ids.contains(id))
        .map(|id| (*id).clone())
        .collect();

    let diff = ReplayDiff {
        identical_output: original.output == new_trace.output,
        mode_changed: original.mode != new_trace.mode,
        added,
        removed,
    };

    if !diff.identical_output {
        tracing::warn!(
            trace_id,
            replay_trace_id = %new_trace.trace_id,
            "replay drift detected"
        );
    }

    Ok(ReplayReport {
        original,
        new_trace,
        diff,
    })
}
