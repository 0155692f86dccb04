//! Scripted doubles for providers and the model, shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::ProviderConfig;
use crate::inference::types::{FunctionCall, ModelRequest, ModelResponse, OutputContent, OutputItem};
use crate::inference::{InferenceError, ModelBackend};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::lifecycle::ProviderConnector;
use crate::mcp_client::session::{ProviderChannel, ProviderSession};
use crate::mcp_client::types::{CallToolResult, ContentItem, ToolDescriptor};

pub(crate) type CloseLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn provider_config(name: &str) -> ProviderConfig {
    ProviderConfig::new(name, "scripted", &[])
}

/// A Ready session backed by `provider`.
pub(crate) fn ready_session(provider: ScriptedProvider) -> ProviderSession {
    let mut session = ProviderSession::new(Arc::new(provider_config(&provider.name)));
    session.begin_initializing();
    let tools = provider.descriptors();
    session.mark_ready(Box::new(provider), tools);
    session
}

pub(crate) fn failed_session(name: &str) -> ProviderSession {
    let mut session = ProviderSession::new(Arc::new(provider_config(name)));
    session.begin_initializing();
    session.mark_failed("scripted launch failure".into());
    session
}

// ─── ScriptedProvider ────────────────────────────────────────────────────────

/// How a scripted tool answers.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    ToolError(String),
    ServerError(String),
    TransportFailure,
    Malformed,
    Timeout,
    Delayed(Duration, String),
}

#[derive(Debug, Clone)]
enum InitBehavior {
    Ok,
    Fail(String),
    Hang,
}

/// In-memory provider implementing `ProviderChannel`.
///
/// Tools without a scripted reply echo their arguments back.
pub(crate) struct ScriptedProvider {
    name: String,
    tools: Vec<ToolDescriptor>,
    replies: HashMap<String, Reply>,
    init: InitBehavior,
    close_log: CloseLog,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ScriptedProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            replies: HashMap::new(),
            init: InitBehavior::Ok,
            close_log: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_tool(self, name: &str, required: &[&str]) -> Self {
        let description = format!("{name} tool");
        self.with_described_tool(name, &description, required)
    }

    pub(crate) fn with_described_tool(mut self, name: &str, description: &str, required: &[&str]) -> Self {
        let properties: Map<String, Value> = required
            .iter()
            .map(|p| (p.to_string(), json!({"type": "string"})))
            .collect();
        self.tools.push(ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        });
        self
    }

    pub(crate) fn replying(mut self, tool: &str, reply: Reply) -> Self {
        self.replies.insert(tool.to_string(), reply);
        self
    }

    pub(crate) fn failing_initialize(mut self, reason: &str) -> Self {
        self.init = InitBehavior::Fail(reason.to_string());
        self
    }

    pub(crate) fn hanging_initialize(mut self) -> Self {
        self.init = InitBehavior::Hang;
        self
    }

    /// Record closes into a log shared with other providers.
    pub(crate) fn sharing_close_log(mut self, log: &CloseLog) -> Self {
        self.close_log = Arc::clone(log);
        self
    }

    pub(crate) fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    pub(crate) fn close_log(&self) -> CloseLog {
        Arc::clone(&self.close_log)
    }

    /// `(tool, arguments)` for every call received.
    pub(crate) fn call_log(&self) -> Arc<Mutex<Vec<(String, Value)>>> {
        Arc::clone(&self.calls)
    }

    fn text_result(text: &str, is_error: bool) -> CallToolResult {
        CallToolResult {
            content: vec![ContentItem::Text {
                text: text.to_string(),
            }],
            is_error,
            structured_content: None,
        }
    }
}

#[async_trait]
impl ProviderChannel for ScriptedProvider {
    async fn initialize(&self) -> Result<(), McpError> {
        match &self.init {
            InitBehavior::Ok => Ok(()),
            InitBehavior::Fail(reason) => Err(McpError::ServerError {
                code: -32600,
                message: reason.clone(),
                data: None,
            }),
            InitBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult, McpError> {
        let args = Value::Object(arguments);
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));

        match self.replies.get(name) {
            None => Ok(Self::text_result(&format!("{name} ok: {args}"), false)),
            Some(Reply::Text(text)) => Ok(Self::text_result(text, false)),
            Some(Reply::ToolError(text)) => Ok(Self::text_result(text, true)),
            Some(Reply::ServerError(message)) => Err(McpError::ServerError {
                code: -32603,
                message: message.clone(),
                data: None,
            }),
            Some(Reply::TransportFailure) => Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "provider stdout closed".into(),
            }),
            Some(Reply::Malformed) => Err(McpError::MalformedResponse {
                server: self.name.clone(),
                reason: "failed to parse tools/call response: invalid type: string, expected a sequence".into(),
            }),
            Some(Reply::Timeout) => Err(McpError::Timeout {
                server: self.name.clone(),
                method: "tools/call".into(),
                timeout_ms: 1000,
            }),
            Some(Reply::Delayed(delay, text)) => {
                tokio::time::sleep(*delay).await;
                Ok(Self::text_result(text, false))
            }
        }
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.close_log.lock().unwrap().push(self.name.clone());
        Ok(())
    }
}

// ─── ScriptedConnector ───────────────────────────────────────────────────────

/// Hands out scripted providers by config name.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    providers: Mutex<HashMap<String, ScriptedProvider>>,
    connect_failures: HashSet<String>,
    connected: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_provider(self, provider: ScriptedProvider) -> Self {
        self.providers
            .lock()
            .unwrap()
            .insert(provider.name.clone(), provider);
        self
    }

    pub(crate) fn with_connect_failure(mut self, name: &str) -> Self {
        self.connect_failures.insert(name.to_string());
        self
    }

    /// Address of every `ProviderConfig` passed to `connect`.
    pub(crate) fn connected_configs(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.connected)
    }
}

#[async_trait]
impl ProviderConnector for ScriptedConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Box<dyn ProviderChannel>, McpError> {
        self.connected
            .lock()
            .unwrap()
            .push(config as *const ProviderConfig as usize);
        if self.connect_failures.contains(&config.name) {
            return Err(McpError::SpawnFailed {
                name: config.name.clone(),
                reason: "No such file or directory".into(),
            });
        }
        let provider = self.providers.lock().unwrap().remove(&config.name);
        match provider {
            Some(p) => Ok(Box::new(p)),
            None => Err(McpError::SpawnFailed {
                name: config.name.clone(),
                reason: "no scripted provider".into(),
            }),
        }
    }
}

// ─── ScriptedModel ───────────────────────────────────────────────────────────

/// Model double that replays queued responses and records every request.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, InferenceError>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn then_text(self, id: &str, text: &str) -> Self {
        self.push(Ok(text_response(id, text)))
    }

    /// Queue a response carrying `(name, arguments, call_id)` function calls.
    pub(crate) fn then_calls(self, id: &str, calls: &[(&str, &str, &str)]) -> Self {
        self.push(Ok(calls_response(id, calls)))
    }

    pub(crate) fn then_error(self, err: InferenceError) -> Self {
        self.push(Err(err))
    }

    fn push(self, item: Result<ModelResponse, InferenceError>) -> Self {
        self.responses.lock().unwrap().push_back(item);
        self
    }

    pub(crate) fn request_log(&self) -> Arc<Mutex<Vec<ModelRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse, InferenceError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(InferenceError::ConnectionFailed {
                    endpoint: "scripted".into(),
                    reason: "no scripted response left".into(),
                })
            })
    }
}

pub(crate) fn text_response(id: &str, text: &str) -> ModelResponse {
    ModelResponse {
        id: id.to_string(),
        output: vec![OutputItem::Message {
            content: vec![OutputContent::OutputText {
                text: text.to_string(),
            }],
        }],
    }
}

pub(crate) fn calls_response(id: &str, calls: &[(&str, &str, &str)]) -> ModelResponse {
    ModelResponse {
        id: id.to_string(),
        output: calls
            .iter()
            .map(|(name, arguments, call_id)| {
                OutputItem::FunctionCall(FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                    call_id: call_id.to_string(),
                })
            })
            .collect(),
    }
}
