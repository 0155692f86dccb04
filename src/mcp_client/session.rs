//! Provider sessions: one live provider handle plus its negotiated tools.
//!
//! A session's channel is exclusively owned by the session (and through it,
//! by the `ProcessSupervisor`). Everything else refers to a session by name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderConfig;

use super::errors::McpError;
use super::types::{CallToolResult, ToolDescriptor};

// ─── Channel Seam ────────────────────────────────────────────────────────────

/// The operations a connected provider supports.
///
/// The stdio implementation lives in `lifecycle`; tests substitute scripted
/// channels.
#[async_trait]
pub trait ProviderChannel: Send + Sync {
    /// Perform the protocol handshake.
    async fn initialize(&self) -> Result<(), McpError>;

    /// Fetch the provider's full tool list, in provider order.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    /// Invoke one tool. `isError` results come back as `Ok`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, McpError>;

    /// Release the underlying process. Called at most once.
    async fn close(&mut self) -> Result<(), McpError>;

    /// Recent provider diagnostics (stderr), for launch failure reports.
    fn diagnostics(&self) -> Option<String> {
        None
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

/// Lifecycle of a provider session.
///
/// `Uninitialized → Initializing → {Ready | Failed} → Closed`. `Failed` and
/// `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Ready)
                | (Initializing, Failed)
                | (Ready, Closed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ─── ProviderSession ─────────────────────────────────────────────────────────

/// A provider process handle with its negotiated capability list.
pub struct ProviderSession {
    config: Arc<ProviderConfig>,
    channel: Option<Box<dyn ProviderChannel>>,
    state: SessionState,
    /// Set by the dispatcher after a transport failure.
    degraded: AtomicBool,
    tools: Vec<ToolDescriptor>,
    failure: Option<String>,
}

impl ProviderSession {
    /// A fresh session for `config`, not yet launched.
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        Self {
            config,
            channel: None,
            state: SessionState::Uninitialized,
            degraded: AtomicBool::new(false),
            tools: Vec::new(),
            failure: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub(crate) fn config_arc(&self) -> Arc<ProviderConfig> {
        Arc::clone(&self.config)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Tools advertised at launch. Empty unless the session became Ready.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Look up one of this provider's tools by its unqualified name.
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Why the launch failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Ready, not degraded, and still holding a channel.
    pub fn is_usable(&self) -> bool {
        self.state == SessionState::Ready && !self.is_degraded() && self.channel.is_some()
    }

    /// Mark the channel broken so later dispatches fail fast.
    pub fn mark_degraded(&self) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(provider = %self.name(), "provider session degraded");
        }
    }

    /// The channel, if the session is usable.
    pub fn channel(&self) -> Option<&dyn ProviderChannel> {
        if self.is_usable() {
            self.channel.as_deref()
        } else {
            None
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(provider = %self.name(), from = %self.state, to = %next, "session state");
        self.state = next;
    }

    pub(crate) fn begin_initializing(&mut self) {
        self.transition(SessionState::Initializing);
    }

    pub(crate) fn mark_ready(&mut self, channel: Box<dyn ProviderChannel>, tools: Vec<ToolDescriptor>) {
        self.channel = Some(channel);
        self.tools = tools;
        self.transition(SessionState::Ready);
    }

    pub(crate) fn mark_failed(&mut self, cause: String) {
        self.failure = Some(cause);
        self.transition(SessionState::Failed);
    }

    /// Close the channel and move to `Closed`. No-op unless Ready.
    pub(crate) async fn close(&mut self) -> Result<(), McpError> {
        if self.state != SessionState::Ready {
            return Ok(());
        }
        let result = match self.channel.take() {
            Some(mut channel) => channel.close().await,
            None => Ok(()),
        };
        self.transition(SessionState::Closed);
        result
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("name", &self.config.name)
            .field("state", &self.state)
            .field("degraded", &self.is_degraded())
            .field("tools", &self.tools.len())
            .field("failure", &self.failure)
            .finish()
    }
}
