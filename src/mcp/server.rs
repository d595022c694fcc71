use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::transport::StdioTransport;
use super::types::*;
use crate::extract::capabilities;
use crate::tools::analyze_bid_detail_tool::{
    AnalyzeBidDetailTool, ANALYZE_BID_DETAIL_TOOL_DEFINITION,
};
use crate::utils::fetch::Downloader;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    transport: StdioTransport,
    downloader: Downloader,
    initialized: bool,
}

impl McpServer {
    pub fn new(downloader: Downloader) -> Self {
        Self {
            transport: StdioTransport::new(),
            downloader,
            initialized: false,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("MCP server started and listening on stdio");

        loop {
            match self.transport.read_message().await? {
                Some(message) => match message {
                    McpMessage::Request(request) => {
                        let response = self.handle_request(request).await;
                        self.transport.write_response(response).await?;
                    }
                    McpMessage::Notification(notification) => {
                        self.handle_notification(notification).await;
                    }
                },
                None => {
                    info!("Client disconnected");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_request(&mut self, request: McpRequest) -> McpResponse {
        let id = ensure_valid_id(request.id.clone());

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request).await,
            "tools/list" => McpResponse::result(id, list_tools()),
            "tools/call" => self.handle_call_tool(request).await,
            "ping" => McpResponse::result(id, serde_json::json!({})),
            _ => McpResponse::error(id, -32601, "Method not found"),
        }
    }

    async fn handle_notification(&mut self, notification: McpNotification) {
        debug!("Received notification: {}", notification.method);

        match notification.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialization completed");
                self.initialized = true;
            }
            "notifications/cancelled" => {
                debug!("Request cancelled notification received");
            }
            _ => {
                warn!("Unknown notification method: {}", notification.method);
            }
        }
    }

    async fn handle_initialize(&mut self, request: McpRequest) -> McpResponse {
        let id = ensure_valid_id(request.id.clone());

        match parse_params::<InitializeParams>(request.params) {
            Ok(init_params) => {
                info!(
                    client = %init_params.client_info.name,
                    version = %init_params.client_info.version,
                    "Client connected"
                );
                McpResponse::result(id, initialize_result())
            }
            Err(message) => McpResponse::error(id, -32602, message),
        }
    }

    async fn handle_call_tool(&self, request: McpRequest) -> McpResponse {
        let id = ensure_valid_id(request.id.clone());

        match parse_params::<CallToolParams>(request.params) {
            Ok(call_params) => {
                let result = self.execute_tool(call_params).await;
                match serde_json::to_value(result) {
                    Ok(value) => McpResponse::result(id, value),
                    Err(e) => McpResponse::error(id, -32603, format!("Internal error: {}", e)),
                }
            }
            Err(message) => McpResponse::error(id, -32602, message),
        }
    }

    async fn execute_tool(&self, params: CallToolParams) -> CallToolResult {
        if !self.initialized {
            debug!(tool = %params.name, "Tool called before initialized notification");
        }
        match params.name.as_str() {
            "analyze-bid-detail" => {
                let tool = AnalyzeBidDetailTool::new(self.downloader.clone());
                tool.execute(params.arguments).await
            }
            _ => CallToolResult::error(format!("Tool not found: {}", params.name)),
        }
    }
}

fn ensure_valid_id(id: Option<Value>) -> Value {
    match id {
        Some(Value::Null) | None => Value::String("0".to_string()),
        Some(value) => value,
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, String> {
    match params {
        Some(params) => {
            serde_json::from_value::<T>(params).map_err(|e| format!("Invalid params: {}", e))
        }
        None => Err("Missing params".to_string()),
    }
}

fn initialize_result() -> Value {
    let backends: Vec<&str> = capabilities::current()
        .available()
        .into_iter()
        .map(|b| b.name())
        .collect();
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        server_info: ServerInfo {
            name: "Nara Document Extraction MCP".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: Some(format!(
                "Extracts text from Korean procurement attachments (HWP, HWPX, PDF, DOCX, XLSX, ZIP). Backends: {}",
                backends.join(", ")
            )),
        },
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
            logging: Some(serde_json::json!({})),
        },
    };
    serde_json::to_value(result).unwrap_or_else(|_| serde_json::json!({}))
}

fn list_tools() -> Value {
    let result = ListToolsResult {
        tools: vec![ANALYZE_BID_DETAIL_TOOL_DEFINITION.clone()],
    };
    serde_json::to_value(result).unwrap_or_else(|_| serde_json::json!({ "tools": [] }))
}
