//! entity_extraction tool — rule-based NER plus capitalized-phrase fallback.

use std::sync::Arc;

use nexus_core::{EntityExtractor, MemoryService};
use serde_json::Value;

use super::{required_str, ToolError};

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "text": {
                "type": "string",
                "description": "Text to extract entities from."
            }
        },
        "required": ["text"]
    })
}

pub async fn execute(
    _service: &Arc<MemoryService>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let text = required_str(&args, "text")?;
    let entities = EntityExtractor::new().extract(text);

    Ok(serde_json::json!({
        "entities": entities
            .iter()
            .map(|e| serde_json::json!({
                "text": e.name,
                "type": e.entity_type.as_str(),
                "normalized_id": e.id,
            }))
            .collect::<Vec<_>>(),
    }))
}
