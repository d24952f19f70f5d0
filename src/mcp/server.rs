//! MCP Server implementation
//!
//! Line-delimited JSON-RPC over stdio. A session counts as active from
//! `initialize` until the input stream ends.

use std::io::{BufRead, Write};
use std::sync::Arc;

use opentelemetry::Context;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mcp::tools::ToolRegistry;
use crate::mcp::types::*;
use crate::telemetry::MetricsSink;

/// MCP Server info
const SERVER_NAME: &str = "gmail";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server for Gmail
pub struct McpServer {
    registry: ToolRegistry,
    metrics: Arc<dyn MetricsSink>,
    session_open: bool,
}

impl McpServer {
    pub fn new(registry: ToolRegistry, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            registry,
            metrics,
            session_open: false,
        }
    }

    /// Run the server on stdio
    pub async fn run_stdio(&mut self) -> Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.run(stdin.lock(), stdout.lock()).await
    }

    /// Serve requests from `reader` until end of input
    pub async fn run<R: BufRead, W: Write>(&mut self, reader: R, mut writer: W) -> Result<()> {
        let outcome = self.serve(reader, &mut writer).await;
        self.end_session();
        outcome
    }

    async fn serve<R: BufRead, W: Write>(&mut self, reader: R, writer: &mut W) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                writeln!(writer, "{}", serde_json::to_string(&response)?)?;
                writer.flush()?;
            }
        }
        info!("Input closed, shutting down");
        Ok(())
    }

    fn end_session(&mut self) {
        if self.session_open {
            self.session_open = false;
            self.metrics.session_ended();
        }
    }

    /// Handle one JSON-RPC message; notifications yield no response
    async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                warn!("Unparseable message: {}", e);
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(e.to_string()),
                ));
            }
        };
        debug!(method = %request.method, "Request");

        let outcome = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(),
            methods::INITIALIZED => return None,
            methods::PING => Ok(serde_json::json!({})),
            methods::LIST_TOOLS => self.handle_list_tools(),
            methods::CALL_TOOL => self.handle_call_tool(request.params.clone()).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        if request.is_notification() {
            return None;
        }
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self) -> std::result::Result<Value, JsonRpcError> {
        if !self.session_open {
            self.session_open = true;
            self.metrics.session_started();
        }

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
        };
        to_value(result)
    }

    fn handle_list_tools(&self) -> std::result::Result<Value, JsonRpcError> {
        to_value(ListToolsResult {
            tools: self.registry.list_tools(),
        })
    }

    async fn handle_call_tool(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing tool parameters"))?;
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e)))?;

        let result = self
            .registry
            .call_tool(Context::new(), &params.name, params.arguments)
            .await;
        to_value(result)
    }
}

fn to_value<T: serde::Serialize>(value: T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
