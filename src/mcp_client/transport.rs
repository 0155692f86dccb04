//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with provider child processes:
//! - Writing line-delimited JSON-RPC requests to stdin
//! - A background reader task that routes each response on stdout to the
//!   request waiting for its `id`
//! - Answering provider-initiated `ping` requests
//!
//! Several requests may be in flight on one transport at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::{
    error_codes, IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Write half of the channel (a child's stdin in production).
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of the channel (a child's stdout in production).
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

type Waiter = oneshot::Sender<Result<JsonRpcResponse, McpError>>;

/// Requests awaiting a response, keyed by JSON-RPC id.
#[derive(Default)]
struct PendingRequests {
    waiters: std::sync::Mutex<HashMap<u64, Waiter>>,
    /// Set once the reader has stopped; no new waiter may be registered after.
    closed: AtomicBool,
}

impl PendingRequests {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a waiter, failing if the reader is already gone.
    fn register(&self, id: u64, waiter: Waiter) -> bool {
        let mut waiters = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        waiters.insert(id, waiter);
        true
    }

    fn remove(&self, id: u64) -> Option<Waiter> {
        self.lock().remove(&id)
    }

    /// Mark closed and fail every outstanding waiter.
    fn fail_all(&self, server: &str, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Waiter> = self.lock().drain().map(|(_, w)| w).collect();
        for waiter in drained {
            let _ = waiter.send(Err(McpError::TransportError {
                server: server.to_string(),
                reason: reason.to_string(),
            }));
        }
    }
}

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    pending: Arc<PendingRequests>,
    reader_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Create a transport and start its reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(server_name: &str, writer: BoxedWriter, reader: BoxedReader) -> Self {
        let writer = Arc::new(Mutex::new(Some(writer)));
        let pending = Arc::new(PendingRequests::default());

        let reader_task = tokio::spawn(read_loop(
            server_name.to_string(),
            BufReader::new(reader),
            Arc::clone(&writer),
            Arc::clone(&pending),
        ));

        Self {
            server_name: server_name.to_string(),
            writer,
            pending,
            reader_task,
        }
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// With a `timeout`, the request is abandoned after that long and a late
    /// response is discarded by the reader.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut json = serde_json::to_string(&req).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        json.push('\n');

        let (tx, rx) = oneshot::channel();
        if !self.pending.register(id, tx) {
            return Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: "server stdout closed (process may have exited)".into(),
            });
        }

        if let Err(e) = write_line(&self.writer, &self.server_name, &json).await {
            self.pending.remove(id);
            return Err(e);
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.remove(id);
                    return Err(McpError::Timeout {
                        server: self.server_name.clone(),
                        method: method.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        outcome.map_err(|_| McpError::TransportError {
            server: self.server_name.clone(),
            reason: "response channel dropped".into(),
        })?
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);

        let mut json = serde_json::to_string(&notification).map_err(|e| {
            McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to serialize notification: {e}"),
            }
        })?;
        json.push('\n');

        write_line(&self.writer, &self.server_name, &json).await
    }

    /// Close the write half, which signals EOF on the provider's stdin.
    pub async fn close_input(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Write one serialized line and flush.
async fn write_line(
    writer: &Mutex<Option<BoxedWriter>>,
    server: &str,
    line: &str,
) -> Result<(), McpError> {
    let mut guard = writer.lock().await;
    let writer = guard.as_mut().ok_or_else(|| McpError::TransportError {
        server: server.to_string(),
        reason: "stdin already closed".into(),
    })?;

    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| McpError::TransportError {
            server: server.to_string(),
            reason: format!("failed to write to stdin: {e}"),
        })?;
    writer.flush().await.map_err(|e| McpError::TransportError {
        server: server.to_string(),
        reason: format!("failed to flush stdin: {e}"),
    })
}

/// Read provider output until EOF, dispatching responses to their waiters.
async fn read_loop(
    server: String,
    reader: BufReader<BoxedReader>,
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    pending: Arc<PendingRequests>,
) {
    let mut lines = reader.lines();

    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "server stdout closed (process may have exited)".to_string(),
            Err(e) => break format!("failed to read from stdout: {e}"),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match IncomingMessage::parse(trimmed) {
            IncomingMessage::Response(resp) => match pending.remove(resp.id) {
                Some(waiter) => {
                    let _ = waiter.send(Ok(resp));
                }
                None => {
                    tracing::debug!(server = %server, id = resp.id, "discarding unmatched response");
                }
            },
            IncomingMessage::ServerMessage { method, id: Some(id) } => {
                let reply = if method == "ping" {
                    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}})
                } else {
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {
                            "code": error_codes::METHOD_NOT_FOUND,
                            "message": format!("method '{method}' is not supported by this client"),
                        },
                    })
                };
                let line = format!("{reply}\n");
                if let Err(e) = write_line(&writer, &server, &line).await {
                    tracing::debug!(server = %server, error = %e, "failed to answer server request");
                }
            }
            IncomingMessage::ServerMessage { method, id: None } => {
                tracing::debug!(server = %server, method = %method, "server notification");
            }
            IncomingMessage::Unrecognized => {
                tracing::debug!(server = %server, line = %trimmed, "non JSON-RPC output on stdout");
            }
        }
    };

    tracing::debug!(server = %server, reason = %reason, "reader stopped");
    pending.fail_all(&server, &reason);
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
