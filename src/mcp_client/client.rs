//! MCP Client: protocol operations over one transport.
//!
//! Wraps a `StdioTransport` with the three MCP exchanges the host uses:
//! the initialize handshake, paginated tool listing and tool calls. Process
//! ownership lives in `lifecycle`.

use std::time::Duration;

use super::errors::McpError;
use super::transport::{extract_result, StdioTransport};
use super::types::{
    initialize_params, CallToolResult, InitializeResult, ListToolsResult, ToolDescriptor,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Upper bound on `tools/list` pages, against providers that loop cursors.
const MAX_TOOL_PAGES: usize = 64;

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Protocol client for a single provider.
pub struct McpClient {
    server_name: String,
    transport: StdioTransport,
    call_timeout: Option<Duration>,
}

impl McpClient {
    pub fn new(server_name: &str, transport: StdioTransport, call_timeout: Option<Duration>) -> Self {
        Self {
            server_name: server_name.to_string(),
            transport,
            call_timeout,
        }
    }

    /// Perform the MCP initialization handshake.
    ///
    /// Sends `initialize`, checks the reply parses, then sends the
    /// `notifications/initialized` notification.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let response = self
            .transport
            .request("initialize", Some(initialize_params()), None)
            .await?;
        let result = extract_result(response)?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
                server: self.server_name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        let server_info = init.server_info.as_ref();
        tracing::info!(
            provider = %self.server_name,
            protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
            server = server_info.and_then(|s| s.name.as_deref()).unwrap_or("unknown"),
            version = server_info.and_then(|s| s.version.as_deref()).unwrap_or("unknown"),
            "provider initialized"
        );

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        Ok(init)
    }

    /// Fetch every tool, following `nextCursor` until the last page.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let response = self.transport.request("tools/list", params, None).await?;
            let result = extract_result(response)?;

            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
                    server: self.server_name.clone(),
                    reason: format!("failed to parse tools/list response: {e}"),
                })?;

            for raw in page.tools {
                let tool = ToolDescriptor::from_raw(raw).map_err(|reason| {
                    McpError::MalformedResponse {
                        server: self.server_name.clone(),
                        reason,
                    }
                })?;
                tools.push(tool);
            }

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => {
                    tracing::info!(
                        provider = %self.server_name,
                        tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                        "available tools"
                    );
                    return Ok(tools);
                }
            }
        }

        Err(McpError::MalformedResponse {
            server: self.server_name.clone(),
            reason: format!("tools/list did not finish within {MAX_TOOL_PAGES} pages"),
        })
    }

    /// Call one tool.
    ///
    /// A result with `isError: true` is returned as `Ok`; only transport,
    /// protocol and timeout failures are `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let response = self
            .transport
            .request("tools/call", Some(params), self.call_timeout)
            .await?;
        let result = extract_result(response)?;

        serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
            server: self.server_name.clone(),
            reason: format!("failed to parse tools/call response: {e}"),
        })
    }

    /// Close the provider's stdin.
    pub async fn close_input(&self) {
        self.transport.close_input().await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
