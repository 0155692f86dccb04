//! Dispatcher: routes model tool calls to provider sessions.
//!
//! The Dispatcher is the bridge between the model's function calls and the
//! provider sessions. It handles:
//! - Resolving `provider__tool` names to a live session
//! - Argument parsing and required-property validation
//! - Execution via the session's channel
//! - Marking a session degraded when its channel breaks
//!
//! `invoke` never fails: every failure becomes a `ToolInvocationResult` the
//! model can read, so one bad tool never ends the conversation.

use std::time::Instant;

use serde_json::{Map, Value};

use crate::inference::types::FunctionCall;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::lifecycle::ProcessSupervisor;
use crate::mcp_client::registry::split_qualified;
use crate::mcp_client::session::ProviderSession;
use crate::mcp_client::types::ToolDescriptor;

use super::errors::DispatchError;

/// Prefix the model sees on failed tool outputs.
const TOOL_ERROR_PREFIX: &str = "Tool Error: ";

// ─── Request / Result ────────────────────────────────────────────────────────

/// One function call as issued by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRequest {
    pub qualified_name: String,
    /// Raw JSON argument text, unparsed.
    pub arguments: String,
    pub call_id: String,
}

impl From<&FunctionCall> for ToolInvocationRequest {
    fn from(call: &FunctionCall) -> Self {
        Self {
            qualified_name: call.name.clone(),
            arguments: call.arguments.clone(),
            call_id: call.call_id.clone(),
        }
    }
}

/// Outcome of one invocation, always paired with the request's call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationResult {
    pub call_id: String,
    pub success: bool,
    /// Provider text on success, error detail on failure.
    pub text: String,
    pub error: Option<DispatchError>,
}

impl ToolInvocationResult {
    fn ok(call_id: &str, text: String) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: true,
            text,
            error: None,
        }
    }

    fn failed(call_id: &str, error: DispatchError) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: false,
            text: error.to_string(),
            error: Some(error),
        }
    }

    /// The text sent back to the model as this call's output.
    pub fn model_output(&self) -> String {
        if self.success {
            self.text.clone()
        } else {
            format!("{TOOL_ERROR_PREFIX}{}", self.text)
        }
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Executes tool calls against the supervisor's session table.
///
/// Holds the table by shared reference; the only mutation during dispatch is
/// the per-session degraded flag.
#[derive(Clone, Copy)]
pub struct Dispatcher<'a> {
    sessions: &'a ProcessSupervisor,
}

impl<'a> Dispatcher<'a> {
    pub fn new(sessions: &'a ProcessSupervisor) -> Self {
        Self { sessions }
    }

    /// Dispatch a batch concurrently. Results come back in request order.
    pub async fn invoke_all(&self, requests: &[ToolInvocationRequest]) -> Vec<ToolInvocationResult> {
        futures::future::join_all(requests.iter().map(|r| self.invoke(r))).await
    }

    /// Dispatch a single tool call: resolve → validate → execute.
    pub async fn invoke(&self, request: &ToolInvocationRequest) -> ToolInvocationResult {
        let start = Instant::now();
        let result = match self.execute(request).await {
            Ok(text) => ToolInvocationResult::ok(&request.call_id, text),
            Err(e) => ToolInvocationResult::failed(&request.call_id, e),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result.error {
            None => tracing::info!(
                tool = %request.qualified_name,
                call_id = %request.call_id,
                elapsed_ms,
                result_len = result.text.len(),
                "tool call succeeded"
            ),
            Some(e) => tracing::warn!(
                tool = %request.qualified_name,
                call_id = %request.call_id,
                elapsed_ms,
                error = %e,
                "tool call failed"
            ),
        }
        result
    }

    async fn execute(&self, request: &ToolInvocationRequest) -> Result<String, DispatchError> {
        let (provider, tool) =
            split_qualified(&request.qualified_name).ok_or_else(|| DispatchError::MalformedRequest {
                name: request.qualified_name.clone(),
            })?;

        let session = self
            .sessions
            .session(provider)
            .ok_or_else(|| DispatchError::ProviderUnavailable {
                provider: provider.to_string(),
                reason: "no such provider".into(),
            })?;
        let channel = session
            .channel()
            .ok_or_else(|| unavailable(session))?;

        let arguments = parse_arguments(tool, &request.arguments)?;
        if let Some(descriptor) = session.tool(tool) {
            check_required(descriptor, &arguments)?;
        }

        tracing::debug!(provider, tool, call_id = %request.call_id, "dispatching tool call");

        match channel.call_tool(tool, arguments).await {
            Ok(result) if result.is_error => {
                let message = result.text();
                Err(DispatchError::ToolExecution {
                    message: if message.is_empty() {
                        format!("'{tool}' reported an error")
                    } else {
                        message
                    },
                })
            }
            Ok(result) => Ok(result.text()),
            Err(e) if e.is_transport() => {
                session.mark_degraded();
                Err(DispatchError::Transport {
                    provider: provider.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(McpError::Timeout { timeout_ms, .. }) => Err(DispatchError::Timeout {
                tool: request.qualified_name.clone(),
                timeout_ms,
            }),
            Err(McpError::ServerError { message, .. }) => {
                Err(DispatchError::ToolExecution { message })
            }
            Err(e) => Err(DispatchError::ToolExecution {
                message: e.to_string(),
            }),
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn unavailable(session: &ProviderSession) -> DispatchError {
    let reason = if session.is_degraded() {
        "session degraded after a transport failure".to_string()
    } else {
        match session.failure() {
            Some(cause) => format!("session {}: {cause}", session.state()),
            None => format!("session {}", session.state()),
        }
    };
    DispatchError::ProviderUnavailable {
        provider: session.name().to_string(),
        reason,
    }
}

/// Parse the model's argument text. Empty text means no arguments.
fn parse_arguments(tool: &str, raw: &str) -> Result<Map<String, Value>, DispatchError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(DispatchError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(DispatchError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("not valid JSON: {e}"),
        }),
    }
}

fn check_required(descriptor: &ToolDescriptor, arguments: &Map<String, Value>) -> Result<(), DispatchError> {
    let missing: Vec<&str> = descriptor
        .required_properties()
        .into_iter()
        .filter(|p| !arguments.contains_key(*p))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::InvalidArguments {
            tool: descriptor.name.clone(),
            reason: format!("missing required properties: {}", missing.join(", ")),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
