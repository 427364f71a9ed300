//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Start-up failures of `sqlchat serve` and `sqlchat chat`.
///
/// Turn failures inside the chat loop are reported and never reach here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The log subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// The tool host could not be reached.
    #[error("cannot reach tool host: {0}")]
    ToolHost(#[from] runtime::ToolError),

    /// The MCP server failed.
    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
