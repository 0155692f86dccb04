//! Inference Client: the model boundary.
//!
//! This module handles all communication with the language model:
//! - Responses API request/response types
//! - A non-streaming HTTP client with retry on transient failures
//! - The `ModelBackend` trait the conversation loop is written against
//!
//! Conversation history is kept by the model service; the host only carries
//! the latest response id forward as a continuation token.

pub mod client;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{api_key_from_env, ModelBackend, ResponsesClient, API_KEY_ENV_VAR};
pub use errors::InferenceError;
pub use types::{FunctionCall, FunctionTool, InputItem, ModelRequest, ModelResponse};
