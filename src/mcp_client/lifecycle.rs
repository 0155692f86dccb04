//! Provider process lifecycle management.
//!
//! Handles spawning provider child processes, the concurrent launch of every
//! configured provider, and ordered teardown. Each provider runs as a
//! separate OS process communicating via JSON-RPC over stdio.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::config::ProviderConfig;

use super::client::McpClient;
use super::errors::McpError;
use super::session::{ProviderChannel, ProviderSession, SessionState};
use super::transport::StdioTransport;
use super::types::{CallToolResult, ToolDescriptor};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the stderr drain to finish after the process exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Lines of stderr kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

// ─── Connector Seam ──────────────────────────────────────────────────────────

/// Opens a channel to a provider described by a `ProviderConfig`.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, config: &ProviderConfig) -> Result<Box<dyn ProviderChannel>, McpError>;
}

/// Launches providers as child processes speaking MCP over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConnector;

#[async_trait]
impl ProviderConnector for StdioConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Box<dyn ProviderChannel>, McpError> {
        Ok(Box::new(StdioChannel::spawn(config)?))
    }
}

// ─── StdioChannel ────────────────────────────────────────────────────────────

/// A running provider process with its protocol client.
pub struct StdioChannel {
    name: String,
    process: Child,
    client: McpClient,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioChannel {
    /// Spawn the provider process and wire its stdio.
    ///
    /// Does not perform the handshake; see `ProviderChannel::initialize`.
    pub fn spawn(config: &ProviderConfig) -> Result<Self, McpError> {
        let name = config.name.as_str();

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{} ({e})", config.command),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(name.to_string(), stderr, Arc::clone(&stderr_tail))));

        tracing::info!(
            provider = name,
            command = %config.command,
            args = ?config.args,
            pid = child.id(),
            "provider process spawned"
        );

        let transport = StdioTransport::new(name, Box::new(stdin), Box::new(stdout));

        Ok(Self {
            name: name.to_string(),
            process: child,
            client: McpClient::new(name, transport, config.call_timeout()),
            stderr_tail,
            stderr_task,
        })
    }
}

#[async_trait]
impl ProviderChannel for StdioChannel {
    async fn initialize(&self) -> Result<(), McpError> {
        self.client.initialize().await.map(|_| ())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.client.list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, McpError> {
        self.client.call_tool(name, arguments).await
    }

    /// Close stdin, wait for a graceful exit, then force-kill.
    async fn close(&mut self) -> Result<(), McpError> {
        self.client.close_input().await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.process.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(provider = %self.name, status = %status, "provider exited");
            }
            _ => {
                tracing::warn!(provider = %self.name, "provider did not exit, killing");
                let _ = self.process.kill().await;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
        }
        Ok(())
    }

    fn diagnostics(&self) -> Option<String> {
        let tail = self.stderr_tail.lock().unwrap_or_else(|e| e.into_inner());
        if tail.is_empty() {
            None
        } else {
            Some(tail.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
    }
}

/// Forward a provider's stderr to the log, keeping the last few lines.
async fn drain_stderr(name: String, stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(provider = %name, line = %line, "provider stderr");
        let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: Option<&str>) -> String {
    match stderr.map(str::trim) {
        Some(s) if !s.is_empty() => format!(" | stderr: {s}"),
        _ => String::new(),
    }
}

// ─── Launch ──────────────────────────────────────────────────────────────────

type LaunchOutcome = Result<(Box<dyn ProviderChannel>, Vec<ToolDescriptor>), McpError>;

/// Connect, handshake and list tools for one provider.
///
/// On any failure after the channel opened, the channel is closed here so
/// nothing half-initialized outlives the launch.
async fn launch_one(connector: Arc<dyn ProviderConnector>, config: Arc<ProviderConfig>) -> LaunchOutcome {
    let name = config.name.clone();
    let mut channel = connector.connect(&config).await?;

    let handshake = async {
        channel.initialize().await?;
        channel.list_tools().await
    };

    let outcome = tokio::time::timeout(config.init_timeout(), handshake).await;
    let err = match outcome {
        Ok(Ok(tools)) => return Ok((channel, tools)),
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!(
            "initialization timed out after {}s",
            config.init_timeout().as_secs()
        ),
    };

    let _ = channel.close().await;
    let stderr = channel.diagnostics();
    if let Some(stderr) = stderr.as_deref() {
        tracing::warn!(provider = %name, stderr = %stderr, "provider stderr captured on failure");
    }

    Err(McpError::InitFailed {
        name,
        reason: format!("{err}{}", format_stderr_suffix(stderr.as_deref())),
    })
}

// ─── ProcessSupervisor ───────────────────────────────────────────────────────

/// Owns every provider session and tears them down in reverse launch order.
pub struct ProcessSupervisor {
    /// Sessions in configuration order.
    sessions: Vec<ProviderSession>,
    index: HashMap<String, usize>,
    /// Indices of sessions holding an open channel, in acquisition order.
    cleanup: Vec<usize>,
}

impl ProcessSupervisor {
    /// Launch every configured provider concurrently.
    ///
    /// Returns once all launches have settled. Failures are recorded on the
    /// session and never abort the other launches.
    pub async fn launch_all(
        configs: &[ProviderConfig],
        connector: Arc<dyn ProviderConnector>,
    ) -> Self {
        let mut sessions: Vec<ProviderSession> = configs
            .iter()
            .map(|c| ProviderSession::new(Arc::new(c.clone())))
            .collect();

        let mut handles = Vec::with_capacity(sessions.len());
        for session in &mut sessions {
            session.begin_initializing();
            handles.push(tokio::spawn(launch_one(Arc::clone(&connector), session.config_arc())));
        }

        let outcomes = futures::future::join_all(handles).await;

        let mut supervisor = Self {
            index: sessions
                .iter()
                .enumerate()
                .map(|(i, s)| (s.name().to_string(), i))
                .collect(),
            sessions,
            cleanup: Vec::new(),
        };

        for (i, outcome) in outcomes.into_iter().enumerate() {
            let session = &mut supervisor.sessions[i];
            match outcome {
                Ok(Ok((channel, tools))) => {
                    tracing::info!(
                        provider = %session.name(),
                        tools = tools.len(),
                        "provider ready"
                    );
                    session.mark_ready(channel, tools);
                    supervisor.cleanup.push(i);
                }
                Ok(Err(e)) => {
                    tracing::warn!(provider = %session.name(), error = %e, "provider launch failed");
                    session.mark_failed(e.to_string());
                }
                Err(join_err) => {
                    tracing::error!(provider = %session.name(), error = %join_err, "provider launch task aborted");
                    session.mark_failed(format!("launch task aborted: {join_err}"));
                }
            }
        }

        supervisor
    }

    /// Look up a session by provider name.
    pub fn session(&self, name: &str) -> Option<&ProviderSession> {
        self.index.get(name).map(|&i| &self.sessions[i])
    }

    /// All sessions in configuration order.
    pub fn sessions(&self) -> &[ProviderSession] {
        &self.sessions
    }

    /// Sessions that completed their handshake, in configuration order.
    pub fn ready_sessions(&self) -> impl Iterator<Item = &ProviderSession> {
        self.sessions
            .iter()
            .filter(|s| s.state() == SessionState::Ready)
    }

    /// `(provider, cause)` for every provider whose launch failed.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.sessions
            .iter()
            .filter_map(|s| s.failure().map(|cause| (s.name(), cause)))
            .collect()
    }

    /// Close every open session in reverse acquisition order.
    ///
    /// Idempotent: the cleanup stack is drained, so a second call does
    /// nothing.
    pub async fn close_all(&mut self) {
        if self.cleanup.is_empty() {
            return;
        }
        tracing::info!(sessions = self.cleanup.len(), "closing provider sessions");

        while let Some(i) = self.cleanup.pop() {
            let session = &mut self.sessions[i];
            if let Err(e) = session.close().await {
                tracing::warn!(provider = %session.name(), error = %e, "error while closing provider");
            } else {
                tracing::debug!(provider = %session.name(), "provider closed");
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if !self.cleanup.is_empty() {
            tracing::warn!(
                open = self.cleanup.len(),
                "supervisor dropped with open sessions; processes will be killed"
            );
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
