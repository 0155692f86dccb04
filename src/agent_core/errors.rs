//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Why a single tool invocation did not produce a successful result.
///
/// Never escapes the dispatcher as an `Err`; it travels inside a
/// `ToolInvocationResult` and is rendered for the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The qualified name could not be split into provider and tool.
    #[error("malformed tool name '{name}'")]
    MalformedRequest { name: String },

    /// The owning provider is unknown, failed, closed or degraded.
    #[error("provider '{provider}' is unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// The argument text is not a JSON object or misses required properties.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The provider ran the tool and reported an error.
    #[error("{message}")]
    ToolExecution { message: String },

    /// The channel to the provider broke mid-call.
    #[error("transport failure talking to '{provider}': {reason}")]
    Transport { provider: String, reason: String },

    /// The provider did not answer within its call timeout.
    #[error("'{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
}

/// Errors that end the conversation loop.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// The model call failed after retries.
    #[error("model request failed: {0}")]
    Model(#[from] InferenceError),

    /// Reading user input or writing output failed.
    #[error("console I/O error: {0}")]
    Io(#[from] std::io::Error),
}
