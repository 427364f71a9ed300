//! sqlchat runtime: conversation session, model backends and tool hosts.
//!
//! # Overview
//!
//! The runtime is organized around these concepts:
//!
//! - **Session**: the turn loop. It keeps the conversation history, lists the
//!   available tools, asks the model what to do, runs the tool calls it
//!   requests and asks for follow-ups.
//! - **Backend**: a trait abstracting LLM providers (OpenAI, Anthropic).
//! - **ToolHost**: a trait abstracting where tools run; [`McpToolHost`]
//!   forwards calls to an MCP server.
//!
//! Both seams are generic parameters of [`Session`], so tests can script
//! them.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{McpToolHost, OpenAiBackend, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = OpenAiBackend::builder("sk-...", "gpt-4o-mini").build();
//! let tools = McpToolHost::connect("http://localhost:8001/mcp/").await?;
//!
//! let mut session = Session::new(backend, tools);
//! let summary = session.process_query("Which artist has the most albums?").await?;
//! for reply in summary.replies {
//!     println!("{reply}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod model;
pub mod providers;
mod session;
pub mod tools;

pub use model::{
    Backend, Conversation, ConversationError, Message, ModelError, ModelRequest, ModelResponse,
    Part, Role, ToolCall, ToolChoice, ToolResult, ToolSpec, Usage,
};
pub use providers::{AnthropicBackend, DEFAULT_MAX_TOKENS, OpenAiBackend};
pub use session::{FollowUp, SYSTEM_PROMPT, Session, TurnError, TurnSummary};
pub use tools::{McpToolHost, ToolError, ToolHost};
