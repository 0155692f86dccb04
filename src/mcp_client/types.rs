//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and the subset of MCP protocol structures the
//! host needs: the initialize handshake, tool listing and tool calls.

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Classification of one line read from a provider's stdout.
#[derive(Debug)]
pub enum IncomingMessage {
    /// A response to one of our requests.
    Response(JsonRpcResponse),
    /// A notification (no id) or request (with id) initiated by the provider.
    ServerMessage {
        method: String,
        id: Option<serde_json::Value>,
    },
    /// Anything else (log output, garbage, unsupported id types).
    Unrecognized,
}

impl IncomingMessage {
    /// Classify a single line of provider output.
    pub fn parse(line: &str) -> Self {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            return IncomingMessage::Unrecognized;
        };

        if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
            return IncomingMessage::ServerMessage {
                method: method.to_string(),
                id: value.get("id").cloned(),
            };
        }

        match serde_json::from_value::<JsonRpcResponse>(value) {
            Ok(resp) => IncomingMessage::Response(resp),
            Err(_) => IncomingMessage::Unrecognized,
        }
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Protocol revision announced in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Build the `initialize` request parameters.
pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// One page of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<RawTool>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// A tool entry exactly as the provider sent it, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<serde_json::Value>,
}

/// A validated tool capability advertised by a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Validate a raw tool entry.
    ///
    /// The name must be non-empty and the schema, when present, must be a
    /// JSON object. A missing schema becomes an empty object schema.
    pub fn from_raw(raw: RawTool) -> Result<Self, String> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err("tool with empty name".into());
        }

        let input_schema = match raw.input_schema {
            None | Some(serde_json::Value::Null) => {
                serde_json::json!({"type": "object", "properties": {}})
            }
            Some(schema @ serde_json::Value::Object(_)) => schema,
            Some(other) => {
                return Err(format!(
                    "tool '{name}' has a non-object input schema: {other}"
                ));
            }
        };

        Ok(Self {
            name,
            description: raw.description.unwrap_or_default(),
            input_schema,
        })
    }

    /// Property names listed under the schema's `required` array.
    pub fn required_properties(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A single content item in a tool call result.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    Audio {
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    Resource {
        resource: serde_json::Value,
    },
    ResourceLink {
        uri: String,
    },
    #[serde(other)]
    Unknown,
}

impl ContentItem {
    /// Render this item as text for the model.
    fn render(&self) -> String {
        match self {
            ContentItem::Text { text } => text.clone(),
            ContentItem::Image { mime_type } => {
                format!("[image: {}]", mime_type.as_deref().unwrap_or("unknown"))
            }
            ContentItem::Audio { mime_type } => {
                format!("[audio: {}]", mime_type.as_deref().unwrap_or("unknown"))
            }
            ContentItem::Resource { resource } => resource
                .get("text")
                .and_then(|t| t.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| resource.to_string()),
            ContentItem::ResourceLink { uri } => format!("[resource: {uri}]"),
            ContentItem::Unknown => "[unsupported content]".to_string(),
        }
    }
}

/// Result payload of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(default, rename = "structuredContent")]
    pub structured_content: Option<serde_json::Value>,
}

impl CallToolResult {
    /// Flatten the content list into one string.
    ///
    /// Falls back to the structured content when no content items were sent.
    pub fn text(&self) -> String {
        if self.content.is_empty() {
            return self
                .structured_content
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
        }
        self.content
            .iter()
            .map(ContentItem::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_initialize_params_shape() {
        let params = initialize_params();
        assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(params["clientInfo"]["name"], "mcp-host");
        assert!(params["capabilities"].is_object());
    }

    #[test]
    fn test_incoming_response() {
        let msg = IncomingMessage::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#);
        match msg {
            IncomingMessage::Response(resp) => {
                assert_eq!(resp.id, 7);
                assert!(resp.result.is_some());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_incoming_server_notification() {
        let msg = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
        );
        assert!(matches!(
            msg,
            IncomingMessage::ServerMessage { ref method, id: None } if method == "notifications/message"
        ));
    }

    #[test]
    fn test_incoming_log_line_is_unrecognized() {
        assert!(matches!(
            IncomingMessage::parse("INFO starting server"),
            IncomingMessage::Unrecognized
        ));
        assert!(matches!(
            IncomingMessage::parse(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#),
            IncomingMessage::Unrecognized
        ));
    }

    #[test]
    fn test_tool_descriptor_defaults_schema() {
        let raw: RawTool = serde_json::from_str(r#"{"name": "get"}"#).unwrap();
        let tool = ToolDescriptor::from_raw(raw).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.required_properties().is_empty());
    }

    #[test]
    fn test_tool_descriptor_rejects_bad_schema() {
        let raw: RawTool =
            serde_json::from_str(r#"{"name": "get", "inputSchema": "string"}"#).unwrap();
        assert!(ToolDescriptor::from_raw(raw).is_err());

        let raw: RawTool = serde_json::from_str(r#"{"name": "  "}"#).unwrap();
        assert!(ToolDescriptor::from_raw(raw).is_err());
    }

    #[test]
    fn test_tool_descriptor_required_properties() {
        let raw: RawTool = serde_json::from_str(
            r#"{"name": "query", "description": "Search",
                "inputSchema": {"type": "object",
                                "properties": {"q": {"type": "string"}},
                                "required": ["q"]}}"#,
        )
        .unwrap();
        let tool = ToolDescriptor::from_raw(raw).unwrap();
        assert_eq!(tool.required_properties(), vec!["q"]);
    }

    #[test]
    fn test_call_tool_result_text_joins_items() {
        let result: CallToolResult = serde_json::from_str(
            r#"{"content": [
                  {"type": "text", "text": "line one"},
                  {"type": "image", "data": "...", "mimeType": "image/png"},
                  {"type": "text", "text": "line two"}
               ]}"#,
        )
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "line one\n[image: image/png]\nline two");
    }

    #[test]
    fn test_call_tool_result_error_flag() {
        let result: CallToolResult = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "location must be English"}], "isError": true}"#,
        )
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "location must be English");
    }

    #[test]
    fn test_call_tool_result_structured_fallback() {
        let result: CallToolResult =
            serde_json::from_str(r#"{"content": [], "structuredContent": {"bmi": 22.5}}"#).unwrap();
        assert_eq!(result.text(), r#"{"bmi":22.5}"#);
    }
}
