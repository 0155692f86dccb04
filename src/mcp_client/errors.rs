//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur while talking to a provider process.
#[derive(Debug, Error)]
pub enum McpError {
    /// The provider process failed to start.
    #[error("failed to spawn provider '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed or was rejected.
    #[error("provider '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (stream closed, I/O error, bad frame).
    #[error("transport error for provider '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Provider returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A response arrived but its payload did not have the expected shape.
    #[error("malformed response from provider '{server}': {reason}")]
    MalformedResponse {
        server: String,
        reason: String,
    },

    /// A request did not complete within the provider's configured timeout.
    #[error("'{method}' on provider '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },
}

impl McpError {
    /// Whether this error means the channel itself is broken.
    ///
    /// Transport errors and malformed payloads poison the session; server
    /// errors and timeouts leave the channel usable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McpError::TransportError { .. } | McpError::MalformedResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transport() {
        assert!(McpError::TransportError {
            server: "fetch".into(),
            reason: "stdout closed".into(),
        }
        .is_transport());
        assert!(McpError::MalformedResponse {
            server: "fetch".into(),
            reason: "content is not a list".into(),
        }
        .is_transport());
        assert!(!McpError::Timeout {
            server: "fetch".into(),
            method: "tools/call".into(),
            timeout_ms: 10,
        }
        .is_transport());
        assert!(!McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        }
        .is_transport());
    }

    #[test]
    fn test_display_includes_provider_name() {
        let err = McpError::SpawnFailed {
            name: "search".into(),
            reason: "No such file or directory".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to spawn provider 'search': No such file or directory"
        );
    }
}
