//! graph_query tool — bounded BFS around an entity node.

use std::sync::Arc;

use nexus_core::{normalize_entity_id, MemoryService};
use serde_json::Value;

use super::{optional_usize, required_str, ToolError};

/// Default and maximum BFS depth
const DEFAULT_DEPTH: usize = 2;
const MAX_DEPTH: usize = 4;

/// Node cap for the returned subgraph
const MAX_SUBGRAPH_NODES: usize = 200;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entity": {
                "type": "string",
                "description": "Entity name or id to center the subgraph on. Normalized automatically."
            },
            "depth": {
                "type": "integer",
                "description": "BFS hops from the center (default 2, max 4).",
                "default": DEFAULT_DEPTH,
                "minimum": 1,
                "maximum": MAX_DEPTH
            }
        },
        "required": ["entity"]
    })
}

pub async fn execute(
    service: &Arc<MemoryService>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let entity = normalize_entity_id(required_str(&args, "entity")?);
    let depth = optional_usize(&args, "depth")
        .unwrap_or(DEFAULT_DEPTH)
        .clamp(1, MAX_DEPTH);

    let subgraph = {
        let graph = service.graph().read().map_err(|_| ToolError {
            kind: "internal_error".to_string(),
            message: "graph store lock poisoned".to_string(),
            trace_id: None,
        })?;
        graph.neighborhood(&entity, depth, MAX_SUBGRAPH_NODES)
    };

    Ok(serde_json::json!({
        "nodes": subgraph.nodes,
        "edges": subgraph.edges,
        "subgraph_size": subgraph.nodes.len(),
        "center": entity,
        "depth": depth,
    }))
}
