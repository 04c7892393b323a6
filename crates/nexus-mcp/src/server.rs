//! Server core.
//!
//! Routes JSON-RPC requests to the six tools. Initialization gates every
//! other method; protocol version negotiation takes the older of the
//! client's and server's versions.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use nexus_core::MemoryService;

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::tools;

pub struct McpServer {
    service: Arc<MemoryService>,
    initialized: bool,
}

impl McpServer {
    pub fn new(service: Arc<MemoryService>) -> Self {
        Self {
            service,
            initialized: false,
        }
    }

    /// Handle one request; `None` means a notification with no response.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!(method = %request.method, "rejecting request before initialization");
            return Some(JsonRpcResponse::failure(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::failure(request.id, error),
        })
    }

    fn handle_initialize(
        &mut self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Some clients reject servers advertising a newer protocol version
        let negotiated = if request.protocol_version.as_str() < PROTOCOL_VERSION {
            info!(version = %request.protocol_version, "using client's older protocol version");
            request.protocol_version.clone()
        } else {
            PROTOCOL_VERSION.to_string()
        };

        self.initialized = true;
        info!(version = %negotiated, "session initialized");

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "nexus-memory".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some({
                    let mut map = HashMap::new();
                    map.insert("listChanged".to_string(), serde_json::json!(false));
                    map
                }),
                resources: None,
            },
            instructions: Some(
                "Nexus is a hybrid-retrieval memory service. vector_search runs the full \
                 pipeline (vector + graph + Bayesian fusion); hipporag_retrieve forces the \
                 graph tier's multi-hop entity path; memory_store ingests new text. \
                 Rarely-accessed memories decay through demoted/archived stages and \
                 rehydrate automatically when a query matches their summary."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<serde_json::Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "vector_search".to_string(),
                description: Some(
                    "Retrieve memories through the full Nexus pipeline: parallel vector/graph/Bayesian recall, confidence filtering, semantic dedup, weighted fusion, mode-specific compression.".to_string(),
                ),
                input_schema: tools::vector_search::schema(),
            },
            ToolDescription {
                name: "memory_store".to_string(),
                description: Some(
                    "Store text: semantic chunking, embedding, vector + graph indexing, tagging envelope. Returns the created chunk ids.".to_string(),
                ),
                input_schema: tools::memory_store::schema(),
            },
            ToolDescription {
                name: "graph_query".to_string(),
                description: Some(
                    "Bounded BFS subgraph around an entity node: neighbors, edges, and subgraph size.".to_string(),
                ),
                input_schema: tools::graph_query::schema(),
            },
            ToolDescription {
                name: "entity_extraction".to_string(),
                description: Some(
                    "Extract entities (PERSON/ORG/LOCATION tags plus capitalized-phrase CONCEPT fallback) with normalized ids.".to_string(),
                ),
                input_schema: tools::entity_extraction::schema(),
            },
            ToolDescription {
                name: "hipporag_retrieve".to_string(),
                description: Some(
                    "Retrieve through the graph tier only: query entities seed a multi-hop expansion and Personalized PageRank, mass aggregates onto mentioning chunks.".to_string(),
                ),
                input_schema: tools::hipporag_retrieve::schema(),
            },
            ToolDescription {
                name: "detect_mode".to_string(),
                description: Some(
                    "Classify a query into execution/planning/brainstorming with confidence and the matched patterns.".to_string(),
                ),
                input_schema: tools::detect_mode::schema(),
            },
        ];

        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing tool call params")),
        };

        let outcome = match request.name.as_str() {
            "vector_search" => tools::vector_search::execute(&self.service, request.arguments).await,
            "memory_store" => tools::memory_store::execute(&self.service, request.arguments).await,
            "graph_query" => tools::graph_query::execute(&self.service, request.arguments).await,
            "entity_extraction" => {
                tools::entity_extraction::execute(&self.service, request.arguments).await
            }
            "hipporag_retrieve" => {
                tools::hipporag_retrieve::execute(&self.service, request.arguments).await
            }
            "detect_mode" => tools::detect_mode::execute(&self.service, request.arguments).await,
            unknown => {
                return Err(JsonRpcError::method_not_found(&format!(
                    "unknown tool '{}'",
                    unknown
                )));
            }
        };

        let result = match outcome {
            Ok(payload) => CallToolResult::ok(&payload),
            Err(tool_error) => {
                warn!(tool = %request.name, error = %tool_error, "tool call failed");
                CallToolResult::error(&tool_error.envelope())
            }
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_service;

    fn request(method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_requires_initialization() {
        let (service, _dir) = test_service();
        let mut server = McpServer::new(service);
        let response = server
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_initialize_then_list() {
        let (service, _dir) = test_service();
        let mut server = McpServer::new(service);

        let init = server
            .handle_request(request("initialize", Some(serde_json::json!({}))))
            .await
            .unwrap();
        assert!(init.error.is_none());

        let list = server.handle_request(request("tools/list", None)).await.unwrap();
        let tools = &list.result.unwrap()["tools"];
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "vector_search",
                "memory_store",
                "graph_query",
                "entity_extraction",
                "hipporag_retrieve",
                "detect_mode"
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_error_is_envelope_not_protocol_error() {
        let (service, _dir) = test_service();
        let mut server = McpServer::new(service);
        server
            .handle_request(request("initialize", None))
            .await
            .unwrap();

        let response = server
            .handle_request(request(
                "tools/call",
                Some(serde_json::json!({ "name": "vector_search", "arguments": {} })),
            ))
            .await
            .unwrap();
        // Protocol-level success carrying a tool-level error envelope
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("input_error"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (service, _dir) = test_service();
        let mut server = McpServer::new(service);
        server.handle_request(request("initialize", None)).await.unwrap();
        let response = server.handle_request(request("nope/nope", None)).await.unwrap();
        assert!(response.error.is_some());
    }
}
