//! memory_store tool — runs the ingestion path for ad-hoc text.

use std::sync::Arc;

use nexus_core::{
    IngestOptions, IntentCategory, MemoryCategory, MemoryService, RetentionTier,
};
use serde_json::Value;

use super::{required_str, ToolError};

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "text": {
                "type": "string",
                "description": "Text to chunk, embed, and index across the vector and graph stores."
            },
            "metadata": {
                "type": "object",
                "description": "Merged into the tagging envelope. Recognized keys: intent (one of the eight intent categories), category (procedural|episodic|semantic), retention (short|mid|long), tags (array of strings), source (source path override).",
                "properties": {
                    "intent": { "type": "string" },
                    "category": { "type": "string" },
                    "retention": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "source": { "type": "string" }
                }
            }
        },
        "required": ["text"]
    })
}

fn options_from_metadata(metadata: Option<&Value>) -> Result<IngestOptions, ToolError> {
    let mut options = IngestOptions::default();
    let Some(metadata) = metadata else {
        return Ok(options);
    };

    if let Some(intent) = metadata.get("intent").and_then(|v| v.as_str()) {
        options.intent = IntentCategory::parse(intent)
            .ok_or_else(|| ToolError::input(format!("unknown intent '{}'", intent)))?;
    }
    if let Some(category) = metadata.get("category").and_then(|v| v.as_str()) {
        options.category = MemoryCategory::parse(category)
            .ok_or_else(|| ToolError::input(format!("unknown category '{}'", category)))?;
    }
    if let Some(retention) = metadata.get("retention").and_then(|v| v.as_str()) {
        options.retention = RetentionTier::parse(retention)
            .ok_or_else(|| ToolError::input(format!("unknown retention '{}'", retention)))?;
    }
    if let Some(tags) = metadata.get("tags").and_then(|v| v.as_array()) {
        options.tags = tags
            .iter()
            .filter_map(|t| t.as_str())
            .map(str::to_string)
            .collect();
    }
    // Free-form metadata keys land as tags too
    if let Some(project) = metadata.get("project").and_then(|v| v.as_str()) {
        options.tags.push(format!("project:{}", project));
    }

    Ok(options)
}

pub async fn execute(
    service: &Arc<MemoryService>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let text = required_str(&args, "text")?.to_string();
    let metadata = args.as_ref().and_then(|a| a.get("metadata")).cloned();
    let options = options_from_metadata(metadata.as_ref())?;
    let source = metadata
        .as_ref()
        .and_then(|m| m.get("source"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let service = Arc::clone(service);
    let report = tokio::task::spawn_blocking(move || match source {
        Some(path) => service.ingest_document(&path, &text, &options),
        None => service.store_text(&text, &options),
    })
    .await
    .map_err(|e| ToolError {
        kind: "internal_error".to_string(),
        message: format!("ingest task failed: {}", e),
        trace_id: None,
    })??;

    Ok(serde_json::json!({
        "chunk_ids": report.chunk_ids,
        "chunks_created": report.chunks_created,
    }))
}
