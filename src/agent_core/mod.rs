//! Agent Core: the conversation layer of the host.
//!
//! Submodules:
//! - `conversation`: The interactive model/tool loop
//! - `dispatcher`: Routes model tool calls to provider sessions
//! - `errors`: Dispatch and conversation error types

pub mod conversation;
pub mod dispatcher;
pub mod errors;

// Re-exports for convenience
pub use conversation::{
    ConversationController, ConversationOutcome, ConversationSettings, ConversationState,
    ExitReason,
};
pub use dispatcher::{Dispatcher, ToolInvocationRequest, ToolInvocationResult};
pub use errors::{ConversationError, DispatchError};
