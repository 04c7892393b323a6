//! vector_search tool — runs the full Nexus pipeline.

use std::sync::Arc;

use nexus_core::{MemoryService, Mode};
use serde_json::Value;

use super::{optional_str, optional_usize, render_results, required_str, ToolError};

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural-language query. Runs the full pipeline: all three retrieval tiers, fusion, dedup, and mode-specific compression."
            },
            "limit": {
                "type": "integer",
                "description": "Maximum number of results (core + extended) to return.",
                "minimum": 1
            },
            "mode": {
                "type": "string",
                "enum": ["execution", "planning", "brainstorming"],
                "description": "Pin the retrieval mode instead of detecting it from the query."
            }
        },
        "required": ["query"]
    })
}

pub async fn execute(
    service: &Arc<MemoryService>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let query = required_str(&args, "query")?;
    let limit = optional_usize(&args, "limit");
    let mode = match optional_str(&args, "mode") {
        Some(s) => Some(
            Mode::parse(s).ok_or_else(|| ToolError::input(format!("unknown mode '{}'", s)))?,
        ),
        None => None,
    };

    let result = service.search(query, mode, limit).await?;
    Ok(render_results(&result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_service;
    use nexus_core::IngestOptions;

    #[test]
    fn test_schema_is_valid() {
        let s = schema();
        assert_eq!(s["type"], "object");
        assert!(s["properties"]["query"].is_object());
        assert_eq!(s["required"][0], "query");
    }

    #[tokio::test]
    async fn test_search_returns_stored_chunk() {
        let (service, _dir) = test_service();
        let text = "Python is widely used for machine learning";
        service.store_text(text, &IngestOptions::default()).unwrap();

        // Verbatim query clears the strict execution floor outright
        let args = serde_json::json!({ "query": text });
        let payload = execute(&service, Some(args)).await.unwrap();

        assert_eq!(payload["mode"], "execution");
        assert!(payload["trace_id"].is_string());
        let results = payload["results"].as_array().unwrap();
        assert!(!results.is_empty());
        assert!(results[0]["text"].as_str().unwrap().contains("machine learning"));
        assert!(results[0]["score"].as_f64().unwrap() >= 0.9);
    }

    #[tokio::test]
    async fn test_missing_query_is_input_error() {
        let (service, _dir) = test_service();
        let err = execute(&service, None).await.unwrap_err();
        assert_eq!(err.kind, "input_error");
    }

    #[tokio::test]
    async fn test_unknown_mode_rejected() {
        let (service, _dir) = test_service();
        let args = serde_json::json!({ "query": "anything", "mode": "speculation" });
        let err = execute(&service, Some(args)).await.unwrap_err();
        assert_eq!(err.kind, "input_error");
    }
}
