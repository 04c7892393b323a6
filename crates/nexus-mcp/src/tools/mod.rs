//! Tool implementations.
//!
//! One module per tool, each exposing `schema()` and `execute()`. Tool
//! failures surface as `{ error: { kind, message, trace_id? } }`
//! envelopes in the tool result, never as protocol-level errors.

pub mod detect_mode;
pub mod entity_extraction;
pub mod graph_query;
pub mod hipporag_retrieve;
pub mod memory_store;
pub mod vector_search;

use nexus_core::{CoreError, PipelineError};
use serde_json::Value;

/// Tool-level error with the taxonomy kind and the trace id when one
/// exists for the failed request.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: String,
    pub message: String,
    pub trace_id: Option<String>,
}

impl ToolError {
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            kind: "input_error".to_string(),
            message: message.into(),
            trace_id: None,
        }
    }

    /// Render the error envelope.
    pub fn envelope(&self) -> Value {
        let mut error = serde_json::json!({
            "kind": self.kind,
            "message": self.message,
        });
        if let Some(trace_id) = &self.trace_id {
            error["trace_id"] = Value::String(trace_id.clone());
        }
        serde_json::json!({ "error": error })
    }
}

impl From<CoreError> for ToolError {
    fn from(e: CoreError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            trace_id: None,
        }
    }
}

impl From<PipelineError> for ToolError {
    fn from(e: PipelineError) -> Self {
        Self {
            kind: e.error.kind().to_string(),
            message: e.error.to_string(),
            trace_id: Some(e.trace_id),
        }
    }
}

/// Pull a required string argument out of the tool call.
pub(crate) fn required_str<'a>(args: &'a Option<Value>, key: &str) -> Result<&'a str, ToolError> {
    args.as_ref()
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::input(format!("missing required argument '{}'", key)))
}

/// Optional positive integer argument.
pub(crate) fn optional_usize(args: &Option<Value>, key: &str) -> Option<usize> {
    args.as_ref()
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
}

/// Optional string argument.
pub(crate) fn optional_str<'a>(args: &'a Option<Value>, key: &str) -> Option<&'a str> {
    args.as_ref().and_then(|a| a.get(key)).and_then(|v| v.as_str())
}

/// Render a pipeline result in the tool response shape shared by
/// `vector_search` and `hipporag_retrieve`.
pub(crate) fn render_results(result: &nexus_core::PipelineResult) -> Value {
    let entry = |r: &nexus_core::RankedResult| {
        serde_json::json!({
            "text": r.text,
            "score": r.fused_score,
            "source": r.source_path,
            "metadata": {
                "chunk_id": r.chunk_id,
                "tags": r.tags,
                "tier_scores": r.tier_scores,
                "entities": r.entities,
            },
        })
    };

    let mut results: Vec<Value> = result.core.iter().map(entry).collect();
    results.extend(result.extended.iter().map(entry));

    let mut payload = serde_json::json!({
        "results": results,
        "core_count": result.core.len(),
        "extended_count": result.extended.len(),
        "trace_id": result.trace_id,
        "mode": result.mode.as_str(),
    });
    if result.partial {
        payload["partial"] = Value::Bool(true);
        payload["degradations"] = serde_json::json!(result.degradations);
    }
    payload
}
