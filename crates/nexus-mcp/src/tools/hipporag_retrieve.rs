//! hipporag_retrieve tool — retrieval forced through the graph tier's
//! entity path (entities -> multi-hop seeds -> PPR -> chunk aggregation).

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
                "description": "Query routed exclusively through the graph tier: entity extraction, multi-hop seed expansion, Personalized PageRank, chunk aggregation."
            },
            "limit": {
                "type": "integer",
                "description": "Maximum number of results to return.",
                "minimum": 1
            },
            "mode": {
                "type": "string",
                "enum": ["execution", "planning", "brainstorming"],
                "description": "Mode profile for the core/extended split."
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

    let result = service.hipporag_retrieve(query, mode, limit).await?;
    Ok(render_results(&result))
}
