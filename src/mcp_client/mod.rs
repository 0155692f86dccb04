//! MCP Client: JSON-RPC over stdio transport for tool provider management.
//!
//! This module handles:
//! - Spawning provider child processes and supervising their teardown
//! - JSON-RPC 2.0 communication over process stdio
//! - The initialize handshake and paginated tool discovery
//! - The unified tool catalog presented to the model
//!
//! The dispatcher in `agent_core` routes model tool calls through the
//! sessions owned here.

pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::McpClient;
pub use errors::McpError;
pub use lifecycle::{ProcessSupervisor, ProviderConnector, StdioConnector};
pub use registry::{ToolCatalog, UnifiedToolEntry};
pub use session::{ProviderChannel, ProviderSession, SessionState};
pub use types::{CallToolResult, ToolDescriptor};
