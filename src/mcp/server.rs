use super::protocol::Protocol;
use super::types::*;
use crate::config::Config;
use crate::handlers::tool_handlers::{ToolHandlers, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use crate::indexer::{Indexer, IndexerOptions};
use crate::snapshot::SnapshotManager;
use crate::vector_db::milvus::MilvusVectorDatabase;
use crate::{embedding, explain};
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "sas-code-context-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main MCP Server
pub struct McpServer {
    protocol: Protocol,
    snapshot_manager: Arc<SnapshotManager>,
    tool_handlers: ToolHandlers,
}

impl McpServer {
    pub fn new(config: &Config) -> Result<Self> {
        let explainer = explain::from_config(config)?;
        let embedding = embedding::from_config(config)?;
        let vector_db = Arc::new(MilvusVectorDatabase::new(&config.milvus_address));
        let snapshot_manager = Arc::new(SnapshotManager::new(config.snapshot_path.clone()));

        let indexer = Arc::new(Indexer::new(
            explainer,
            embedding,
            vector_db,
            snapshot_manager.clone(),
            IndexerOptions {
                concurrency: config.index_concurrency,
                explain_max_attempts: config.explain_max_attempts,
                file_context_chars: config.file_context_chars,
            },
        ));

        Ok(Self {
            protocol: Protocol::new(),
            tool_handlers: ToolHandlers::new(indexer, snapshot_manager.clone()),
            snapshot_manager,
        })
    }

    pub async fn start(mut self) -> Result<()> {
        // Load existing snapshot
        self.snapshot_manager.load().await?;

        tracing::info!("MCP server started, waiting for requests...");

        // Main request loop
        loop {
            match self.protocol.read_request().await {
                Ok(Some(request)) => {
                    let Some(response) = self.handle_request(request).await else {
                        continue;
                    };
                    if let Err(e) = self.protocol.send_response(response).await {
                        tracing::error!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {
                    tracing::info!("Client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read request: {}", e);
                    let error_response = self.protocol.error_response(
                        json!(null),
                        JsonRpcError::parse_error(),
                    );
                    let _ = self.protocol.send_response(error_response).await;
                }
            }
        }

        Ok(())
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!("Received request: method={}, id={:?}", request.method, request.id);

        // Notifications carry no id and get no response
        if request.id.is_null() && request.method.starts_with("notifications/") {
            return None;
        }

        Some(match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id, request.params),
            "ping" => self.protocol.success_response(request.id, json!({})),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            _ => self.protocol.error_response(request.id, JsonRpcError::method_not_found()),
        })
    }

    fn handle_initialize(&self, id: serde_json::Value, params: serde_json::Value) -> JsonRpcResponse {
        match serde_json::from_value::<InitializeRequest>(params) {
            Ok(req) => {
                tracing::info!(
                    "Client connected: {} v{} (protocol {})",
                    req.clientInfo.name,
                    req.clientInfo.version,
                    req.protocolVersion
                );
            }
            Err(e) => {
                tracing::warn!("Failed to parse initialize request: {}", e);
                return self.protocol.error_response(
                    id,
                    JsonRpcError::internal_error(format!("Invalid initialize params: {}", e)),
                );
            }
        }

        let response = InitializeResponse {
            protocolVersion: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    listChanged: Some(false),
                },
            },
            serverInfo: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
        };

        self.protocol.success_response(id, json!(response))
    }

    fn handle_tools_list(&self, id: serde_json::Value) -> JsonRpcResponse {
        let response = ListToolsResponse { tools: tools() };
        self.protocol.success_response(id, json!(response))
    }

    async fn handle_tools_call(&self, id: serde_json::Value, params: serde_json::Value) -> JsonRpcResponse {
        let call_request: CallToolRequest = match serde_json::from_value(params) {
            Ok(req) => req,
            Err(e) => {
                return self.protocol.error_response(
                    id,
                    JsonRpcError::internal_error(format!("Invalid params: {}", e)),
                );
            }
        };

        let handlers = &self.tool_handlers;
        let args = &call_request.arguments;
        let result = match call_request.name.as_str() {
            "index_sas_codebase" => handlers.handle_index_codebase(args).await,
            "search_sas_code" => handlers.handle_search_code(args).await,
            "parse_sas_file" => handlers.handle_parse_file(args).await,
            "clear_index" => handlers.handle_clear_index(args).await,
            "get_indexing_status" => handlers.handle_get_indexing_status(args).await,
            _ => {
                return self.protocol.error_response(
                    id,
                    JsonRpcError::internal_error(format!("Unknown tool: {}", call_request.name)),
                );
            }
        };

        let response = match result {
            Ok(content) => CallToolResponse {
                content,
                isError: None,
            },
            Err(e) => {
                tracing::warn!("Tool {} failed: {:#}", call_request.name, e);
                CallToolResponse {
                    content: vec![Content::Text {
                        text: format!("Error: {:#}", e),
                    }],
                    isError: Some(true),
                }
            }
        };
        self.protocol.success_response(id, json!(response))
    }
}

fn tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "index_sas_codebase".to_string(),
            description: r#"Index a directory of SAS programs for semantic search.

Every .sas file is split into macro definitions, DATA steps and PROC blocks. Each block is explained by a language model, embedded and stored. Unchanged files are skipped on re-runs.

- Provide an absolute path to the program directory.
- Use force=true to rebuild the index from scratch."#
                .to_string(),
            inputSchema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "ABSOLUTE path to the directory of SAS programs."
                    },
                    "force": {
                        "type": "boolean",
                        "description": "Drop and rebuild the index",
                        "default": false
                    }
                },
                "required": ["path"]
            }),
        },
        Tool {
            name: "search_sas_code".to_string(),
            description: r#"Find SAS macros, DATA steps and PROC blocks relevant to a natural language question.

Returns the matching blocks with file, line range, explanation and code. The codebase must be indexed first."#
                .to_string(),
            inputSchema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language question, e.g. 'How is the SDTM DY variable derived?'"
                    },
                    "limit": {
                        "type": "number",
                        "description": "Maximum number of blocks to return",
                        "default": DEFAULT_SEARCH_LIMIT,
                        "maximum": MAX_SEARCH_LIMIT
                    },
                    "include_file_context": {
                        "type": "boolean",
                        "description": "Include the full source file of each match",
                        "default": false
                    }
                },
                "required": ["query"]
            }),
        },
        Tool {
            name: "parse_sas_file".to_string(),
            description: "Split one SAS file into blocks without indexing it. Returns the blocks as JSON."
                .to_string(),
            inputSchema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "ABSOLUTE path to a .sas file."
                    }
                },
                "required": ["path"]
            }),
        },
        Tool {
            name: "clear_index".to_string(),
            description: "Delete the search index.".to_string(),
            inputSchema: json!({ "type": "object", "properties": {} }),
        },
        Tool {
            name: "get_indexing_status".to_string(),
            description: "Get the current indexing status.".to_string(),
            inputSchema: json!({ "type": "object", "properties": {} }),
        },
    ]
}
