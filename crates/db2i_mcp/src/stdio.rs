//! Stdio transport: one persistent server over stdin/stdout.
//!
//! Newline-delimited JSON-RPC. stdout is the protocol channel; logs go
//! to files and stderr only. The loop ends on EOF or when the shutdown
//! future resolves, after which all pools are closed.

use crate::protocol::{codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;
use crate::state::AppState;
use db2i_protocol::{McpError, McpResult};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Run the stdio transport until EOF or shutdown.
pub async fn run(
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()>,
) -> McpResult<()> {
    let server = McpServer::new(Arc::clone(&state), None);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!("stdio transport started");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line.map_err(|e| McpError::internal(format!("stdin read failed: {e}")))? {
                    None => {
                        info!("stdin closed");
                        break;
                    }
                    Some(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        debug!(bytes = line.len(), "request received");
                        if let Some(response) = dispatch(&server, &line).await {
                            write_response(&mut stdout, &response).await?;
                        }
                    }
                }
            }
        }
    }

    state.shutdown().await;
    info!("stdio transport stopped");
    Ok(())
}

async fn dispatch(server: &McpServer, line: &str) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => server.handle(request).await,
        Err(e) => Some(JsonRpcResponse::error(
            None,
            JsonRpcError::new(codes::PARSE_ERROR, format!("Invalid JSON: {e}")),
        )),
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> McpResult<()> {
    let mut payload = serde_json::to_vec(response)
        .map_err(|e| McpError::internal(format!("response serialization failed: {e}")))?;
    payload.push(b'\n');
    stdout
        .write_all(&payload)
        .await
        .map_err(|e| McpError::internal(format!("stdout write failed: {e}")))?;
    stdout
        .flush()
        .await
        .map_err(|e| McpError::internal(format!("stdout flush failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use db2i_db::testing::MemoryDriver;
    use db2i_protocol::ServerConfig;
    use db2i_tools::parse_config;
    use std::collections::HashMap;

    fn state() -> Arc<AppState> {
        let parsing = parse_config(
            "sources:\n  s: { host: h, user: u, password: p }\n",
            &HashMap::new(),
            &[],
        );
        AppState::build(
            ServerConfig::default(),
            Arc::new(MemoryDriver::new()),
            parsing,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_parse_error() {
        let server = McpServer::new(state(), None);
        let response = dispatch(&server, "not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_dispatch_notification_is_silent() {
        let server = McpServer::new(state(), None);
        let response = dispatch(
            &server,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert!(response.is_none());
    }
}
