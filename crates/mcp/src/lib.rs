//! MCP (Model Context Protocol) over streamable HTTP.
//!
//! Both ends live here: [`Client`] connects to a remote tool host, and
//! [`serve`] exposes any [`Handler`] at an HTTP path.
//!
//! # Example
//!
//! ```no_run
//! use mcp::Client;
//!
//! # async fn example() -> mcp::Result<()> {
//! let client = Client::connect("http://localhost:8000/mcp/").await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let mut args = serde_json::Map::new();
//! args.insert("table_name".into(), "albums".into());
//! let result = client.call_tool("preview_table", Some(args)).await?;
//! println!("{}", result.first_text().unwrap_or_default());
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod protocol;
mod server;

pub use client::{Client, DEFAULT_CONNECT_TIMEOUT, MAX_OUTPUT_SIZE};
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, LATEST_PROTOCOL_VERSION, ListChanged,
    ListPromptsResult, ListToolsResult, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION_HEADER,
    Prompt, PromptArgument, PromptMessage, PromptRole, RequestId, SESSION_HEADER,
    SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, ServerInfo, Tool, ToolContent,
    negotiate_version,
};
pub use server::{Handler, SESSION_IDLE_TIMEOUT, router, serve};
