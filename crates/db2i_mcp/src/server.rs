//! MCP server: JSON-RPC request dispatch.
//!
//! One instance serves the persistent stdio transport; the HTTP
//! transport constructs a fresh instance per request (stateless), so no
//! handler may rely on state carried between requests.

use crate::protocol::{
    codes, methods, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ResourcesCapability, ResourcesReadParams, ServerCapabilities, ServerInfo,
    SetLevelParams, ToolCallParams, ToolsCapability, ToolsListResult, JSONRPC_VERSION,
    MCP_PROTOCOL_VERSION,
};
use crate::resources;
use crate::state::AppState;
use crate::tools::{error_call_result, ToolContext};
use db2i_db::auth_pool::anonymize_token;
use db2i_protocol::RequestContext;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SERVER_NAME: &str = "db2i-mcp";

/// Accepted values for logging/setLevel.
const LOG_LEVELS: &[&str] = &[
    "debug", "info", "notice", "warning", "error", "crit", "alert", "emerg",
];

pub struct McpServer {
    state: Arc<AppState>,
    /// Bearer token of the request, when authenticated.
    auth_token: Option<String>,
}

impl McpServer {
    pub fn new(state: Arc<AppState>, auth_token: Option<String>) -> Self {
        Self { state, auth_token }
    }

    /// Handle one request. `None` means a notification: no response is
    /// written.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    codes::INVALID_REQUEST,
                    format!("Invalid JSON-RPC version: {}", request.jsonrpc),
                ),
            ));
        }

        match request.method.as_str() {
            methods::INITIALIZE => Some(self.handle_initialize(request)),
            methods::INITIALIZED => {
                if request.is_notification() {
                    None
                } else {
                    Some(JsonRpcResponse::success(request.id, Value::Null))
                }
            }
            methods::PING => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            methods::TOOLS_LIST => Some(self.handle_tools_list(request)),
            methods::TOOLS_CALL => Some(self.handle_tools_call(request).await),
            methods::RESOURCES_LIST => Some(JsonRpcResponse::success(
                request.id,
                serde_json::to_value(resources::list_resources(&self.state.toolsets))
                    .unwrap_or(Value::Null),
            )),
            methods::RESOURCES_READ => Some(self.handle_resources_read(request)),
            methods::LOGGING_SET_LEVEL => Some(self.handle_set_level(request)),
            other => Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(codes::METHOD_NOT_FOUND, format!("Unknown method: {other}")),
            )),
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: Option<InitializeParams> = request
            .params
            .and_then(|p| serde_json::from_value(p).ok());
        if let Some(params) = &params {
            info!(
                client = %params.client_info.name,
                version = %params.client_info.version,
                protocol = %params.protocol_version,
                "initialize"
            );
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                resources: Some(ResourcesCapability { list_changed: false }),
                logging: Some(Value::Object(Default::default())),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        JsonRpcResponse::success(
            request.id,
            serde_json::to_value(result).unwrap_or(Value::Null),
        )
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.state.registry.list(),
        };
        JsonRpcResponse::success(
            request.id,
            serde_json::to_value(result).unwrap_or(Value::Null),
        )
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: ToolCallParams = match request.params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(codes::INVALID_PARAMS, format!("Invalid tool call params: {e}")),
                )
            }
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(codes::INVALID_PARAMS, "Missing tool call params"),
                )
            }
        };

        let Some(tool) = self.state.registry.get(&params.name) else {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    codes::METHOD_NOT_FOUND,
                    format!("Unknown tool: {}", params.name),
                ),
            );
        };

        let mut ctx = RequestContext::new();
        if let Some(token) = &self.auth_token {
            ctx = ctx.with_session(anonymize_token(token));
        }
        info!(
            tool = %params.name,
            request_id = %ctx.request_id,
            session = ctx.session_id.as_deref().unwrap_or("-"),
            "tool call"
        );
        debug!(
            request_id = %ctx.request_id,
            arguments = %db2i_logging::redact::redact_value(&params.arguments),
            "tool call arguments"
        );

        let tctx = ToolContext {
            router: Arc::clone(&self.state.router),
            auth_token: self.auth_token.clone(),
            request: ctx.clone(),
        };

        let call_result = match tool.execute(params.arguments, &tctx).await {
            Ok(run) => {
                debug!(
                    tool = %params.name,
                    request_id = %ctx.request_id,
                    rows = run.row_count,
                    "tool completed"
                );
                run.into_call_result(&params.name)
            }
            Err(e) => {
                warn!(
                    tool = %params.name,
                    request_id = %ctx.request_id,
                    code = e.code(),
                    "tool failed: {e}"
                );
                error_call_result(&e)
            }
        };

        match serde_json::to_value(call_result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                error!("failed to serialize tool response: {e}");
                JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(codes::INTERNAL_ERROR, "Failed to serialize tool response"),
                )
            }
        }
    }

    fn handle_resources_read(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: ResourcesReadParams = match request.params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            _ => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(codes::INVALID_PARAMS, "Missing resource uri"),
                )
            }
        };
        match resources::read_resource(&params.uri, &self.state.toolsets) {
            Ok(result) => JsonRpcResponse::success(
                request.id,
                serde_json::to_value(result).unwrap_or(Value::Null),
            ),
            Err(e) => JsonRpcResponse::error(request.id, JsonRpcError::from_mcp(&e)),
        }
    }

    fn handle_set_level(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: SetLevelParams = match request.params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            _ => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(codes::INVALID_PARAMS, "Missing level"),
                )
            }
        };
        if !LOG_LEVELS.contains(&params.level.to_ascii_lowercase().as_str()) {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    codes::INVALID_PARAMS,
                    format!("Unknown log level: {}", params.level),
                ),
            );
        }
        info!(level = %params.level, "log level change requested");
        JsonRpcResponse::success(request.id, json!({}))
    }
}
