//! LLM protocol types, conversation history and backend trait.

pub mod conversation;
pub mod errors;
pub mod types;

pub use conversation::Conversation;
pub use errors::{ConversationError, ModelError};
pub use types::{
    Backend, Message, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolChoice, ToolResult,
    ToolSpec, Usage,
};
