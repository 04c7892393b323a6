//! detect_mode tool — classify a query without running retrieval.

use std::sync::Arc;

use nexus_core::{MemoryService, ModeDetector};
use serde_json::Value;

use super::{required_str, ToolError};

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Query to classify into execution, planning, or brainstorming."
            }
        },
        "required": ["query"]
    })
}

pub async fn execute(
    _service: &Arc<MemoryService>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let query = required_str(&args, "query")?;
    let detection = ModeDetector::new().detect(query);

    Ok(serde_json::json!({
        "mode": detection.mode.as_str(),
        "confidence": detection.confidence,
        "patterns_matched": detection.patterns_matched,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_service;

    #[test]
    fn test_schema_is_valid() {
        assert_eq!(schema()["required"][0], "query");
    }

    #[tokio::test]
    async fn test_execution_detection() {
        let (service, _dir) = test_service();
        let args = serde_json::json!({ "query": "what is the lifecycle manager" });
        let payload = execute(&service, Some(args)).await.unwrap();
        assert_eq!(payload["mode"], "execution");
        assert!(payload["confidence"].as_f64().unwrap() >= 0.7);
        assert!(!payload["patterns_matched"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detection_is_deterministic() {
        let (service, _dir) = test_service();
        let args = serde_json::json!({ "query": "brainstorm ideas for the cache" });
        let a = execute(&service, Some(args.clone())).await.unwrap();
        let b = execute(&service, Some(args)).await.unwrap();
        assert_eq!(a, b);
    }
}
